//! Beneficiary-side key reconstruction.
//!
//! Shards arrive independently and out of order, so a [`RecoverySession`]
//! only collects until enough distinct shards are present and combines on an
//! explicit [`RecoverySession::complete`]. [`RecoveryManager`] keeps each
//! session behind its own mutex; sessions never share a lock while mutating.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{RecoveryError, ShamirError};
use crate::package::ShardPackage;
use crate::shamir::{self, SecretShare, MIN_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Collecting,
    Ready,
    Completed,
    Failed,
}

struct CollectedShard {
    share: SecretShare,
    received_at: DateTime<Utc>,
    package_id: Option<Uuid>,
    used: bool,
}

pub struct RecoverySession {
    id: Uuid,
    item_name: String,
    required: u8,
    shards: Vec<CollectedShard>,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failure: Option<String>,
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub item_name: String,
    pub required: u8,
    pub collected: Vec<u8>,
    pub used: Vec<u8>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

impl RecoverySession {
    pub fn start(item_name: &str, required: u8) -> Result<Self, RecoveryError> {
        if required < MIN_THRESHOLD {
            return Err(RecoveryError::InvalidRequirement);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            item_name: item_name.to_string(),
            required,
            shards: Vec::new(),
            status: SessionStatus::Collecting,
            started_at: Utc::now(),
            completed_at: None,
            failure: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn collected(&self) -> usize {
        self.shards.len()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            item_name: self.item_name.clone(),
            required: self.required_shards(),
            collected: self.shards.iter().map(|s| s.share.index).collect(),
            used: self
                .shards
                .iter()
                .filter(|s| s.used)
                .map(|s| s.share.index)
                .collect(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failure: self.failure.clone(),
        }
    }

    /// Accept one shard. Rejections leave the session unchanged.
    pub fn add_shard(&mut self, share: SecretShare) -> Result<SessionStatus, RecoveryError> {
        self.accept(share, None)
    }

    /// Accept the shard carried by a transport package, unless it expired.
    pub fn add_package(
        &mut self,
        package: &ShardPackage,
        now: DateTime<Utc>,
    ) -> Result<SessionStatus, RecoveryError> {
        let share = package.share(now)?;
        self.accept(share, Some(package.id))
    }

    /// Accept a base64 recovery input typed or pasted by hand.
    pub fn add_encoded(&mut self, encoded: &str) -> Result<SessionStatus, RecoveryError> {
        let share = SecretShare::decode(encoded)?;
        self.accept(share, None)
    }

    fn accept(
        &mut self,
        share: SecretShare,
        package_id: Option<Uuid>,
    ) -> Result<SessionStatus, RecoveryError> {
        if self.shards.iter().any(|s| s.share.index == share.index) {
            return Err(RecoveryError::DuplicateShard(share.index));
        }
        if self.status != SessionStatus::Collecting {
            return Err(RecoveryError::SessionNotActive);
        }
        if !share.verify() {
            return Err(ShamirError::CorruptedShare(share.index).into());
        }
        if let Some(first) = self.shards.first() {
            if share.threshold != first.share.threshold
                || share.total_shares != first.share.total_shares
            {
                return Err(ShamirError::IncompatibleShares.into());
            }
        }
        debug!(session = %self.id, shard_index = share.index, "shard collected");
        self.shards.push(CollectedShard {
            share,
            received_at: Utc::now(),
            package_id,
            used: false,
        });
        if self.shards.len() >= self.needed() {
            self.status = SessionStatus::Ready;
            info!(session = %self.id, item = %self.item_name, "recovery session ready");
        }
        Ok(self.status)
    }

    /// Shards needed before combining: the caller's requirement, raised to
    /// the threshold the collected shares were split with.
    fn required_shards(&self) -> u8 {
        let threshold = self.shards.first().map_or(0, |s| s.share.threshold);
        self.required.max(threshold)
    }

    fn needed(&self) -> usize {
        usize::from(self.required_shards())
    }

    /// Reconstruct the key. On a combine failure the session moves to
    /// `failed` and no key material is returned; too few shares leave it
    /// collecting.
    pub fn complete(&mut self) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
        match self.status {
            SessionStatus::Ready => {}
            SessionStatus::Collecting => {
                return Err(RecoveryError::InsufficientShares {
                    have: self.shards.len(),
                    need: self.needed(),
                })
            }
            SessionStatus::Completed | SessionStatus::Failed => {
                return Err(RecoveryError::SessionNotActive)
            }
        }

        let shares: Vec<SecretShare> = self.shards.iter().map(|s| s.share.clone()).collect();
        match shamir::combine(&shares) {
            Ok(key) => {
                let used = shares.first().map(|s| usize::from(s.threshold)).unwrap_or(0);
                for shard in self.shards.iter_mut().take(used) {
                    shard.used = true;
                }
                self.status = SessionStatus::Completed;
                self.completed_at = Some(Utc::now());
                info!(session = %self.id, item = %self.item_name, "recovery completed");
                Ok(key)
            }
            Err(ShamirError::InsufficientShares { have, need }) => {
                self.status = SessionStatus::Collecting;
                Err(RecoveryError::InsufficientShares { have, need })
            }
            Err(e) => {
                self.status = SessionStatus::Failed;
                self.completed_at = Some(Utc::now());
                self.failure = Some(e.to_string());
                warn!(session = %self.id, "recovery failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// When each shard arrived and through which package, in arrival order.
    pub fn arrivals(&self) -> Vec<(u8, DateTime<Utc>, Option<Uuid>)> {
        self.shards
            .iter()
            .map(|s| (s.share.index, s.received_at, s.package_id))
            .collect()
    }
}

/// All recovery sessions of this process.
#[derive(Default)]
pub struct RecoveryManager {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<RecoverySession>>>>,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, item_name: &str, required: u8) -> Result<Uuid, RecoveryError> {
        let session = RecoverySession::start(item_name, required)?;
        let id = session.id();
        self.sessions.write().insert(id, Arc::new(Mutex::new(session)));
        Ok(id)
    }

    fn session(&self, id: Uuid) -> Result<Arc<Mutex<RecoverySession>>, RecoveryError> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RecoveryError::SessionNotFound(id.to_string()))
    }

    pub fn add_shard(&self, id: Uuid, share: SecretShare) -> Result<SessionStatus, RecoveryError> {
        self.session(id)?.lock().add_shard(share)
    }

    pub fn add_package(
        &self,
        id: Uuid,
        package: &ShardPackage,
        now: DateTime<Utc>,
    ) -> Result<SessionStatus, RecoveryError> {
        self.session(id)?.lock().add_package(package, now)
    }

    pub fn add_encoded(&self, id: Uuid, encoded: &str) -> Result<SessionStatus, RecoveryError> {
        self.session(id)?.lock().add_encoded(encoded)
    }

    /// Combine and, on success, discard the session.
    pub fn complete(&self, id: Uuid) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
        let session = self.session(id)?;
        let key = session.lock().complete()?;
        self.sessions.write().remove(&id);
        Ok(key)
    }

    /// Discard a session whatever its state. Returns false if unknown.
    pub fn cancel(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            info!(session = %id, "recovery session cancelled");
        }
        removed
    }

    pub fn summary(&self, id: Uuid) -> Result<SessionSummary, RecoveryError> {
        Ok(self.session(id)?.lock().summary())
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        let handles: Vec<_> = self.sessions.read().values().cloned().collect();
        handles.iter().map(|s| s.lock().summary()).collect()
    }
}
