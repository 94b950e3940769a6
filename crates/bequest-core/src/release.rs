//! Release engine: decides when an inherited item may be recovered.
//!
//! Per item the status moves `locked -> unlocked -> {pendingReview,
//! released}`, and anything past `locked` may end in `failed`. Conditions are
//! evaluated by [`ReleaseEngine::tick`], which callers run on whatever
//! schedule they like (see `scheduler`). A condition that becomes true is
//! acted on at the next tick, so the tick interval is the worst-case unlock
//! delay.
//!
//! The engine also owns the owner-activity tracker and the set of advisory
//! warnings already raised; both persist in `activity.json` next to the
//! catalog so a warning is raised once per (item, trigger, bucket) even
//! across restarts.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN};
use crate::error::ReleaseError;
use crate::events::{EventBus, VaultEvent};
use crate::fs_util::write_atomic;
use crate::inactivity::{InactivityTracker, SECONDS_PER_DAY};
use crate::models::{
    AccessControl, EncryptedKeyShard, ReleaseStatus, TimeLockConfig, VaultItem,
};
use crate::package::ShardPackage;
use crate::settings::VaultSettings;
use crate::shamir::{self, SecretShare};
use crate::store::VaultStore;

const SHARD_AAD_PREFIX: &[u8] = b"bequest.shard.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    Inactivity,
    UnlockDate,
}

/// Who inherits an item and under which conditions.
#[derive(Debug, Clone)]
pub struct InheritancePlan {
    pub beneficiary_id: String,
    pub witness_ids: Vec<String>,
    pub unlock_date: Option<DateTime<Utc>>,
    pub inactivity_days: Option<u32>,
}

impl InheritancePlan {
    fn validate(&self) -> Result<(), ReleaseError> {
        if self.witness_ids.is_empty() {
            return Err(ReleaseError::NoWitnesses);
        }
        if self.unlock_date.is_none() && self.inactivity_days.is_none() {
            return Err(ReleaseError::NoTrigger);
        }
        if self.inactivity_days == Some(0) {
            return Err(ReleaseError::InvalidInactivityDays);
        }
        let mut seen = HashSet::new();
        for witness in &self.witness_ids {
            if *witness == self.beneficiary_id {
                return Err(ReleaseError::BeneficiaryIsWitness(witness.clone()));
            }
            if !seen.insert(witness.as_str()) {
                return Err(ReleaseError::DuplicateWitness(witness.clone()));
            }
        }
        Ok(())
    }
}

/// Shares needed to recover an item with `witnesses` witnesses plus one
/// beneficiary: a strict majority, never fewer than two.
pub fn threshold_for(witnesses: usize) -> u8 {
    let threshold = ((1 + witnesses) / 2 + 1).max(2);
    u8::try_from(threshold).unwrap_or(u8::MAX)
}

/// Handed to the external notifier when an item with a beneficiary unlocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeneficiaryNotice {
    pub item_id: Uuid,
    pub item_name: String,
    pub beneficiary_id: String,
    pub trigger: TriggerKind,
    pub unlocked_at: DateTime<Utc>,
    pub required_shards: u8,
    pub total_shards: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseWarning {
    pub item_id: Uuid,
    pub trigger: TriggerKind,
    pub bucket: u32,
    pub days_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssuedWarning {
    pub item_id: Uuid,
    pub trigger: TriggerKind,
    pub bucket: u32,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub unlocked: Vec<Uuid>,
    pub notices: Vec<BeneficiaryNotice>,
    pub warnings: Vec<ReleaseWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReleaseReport {
    pub item_id: Uuid,
    pub name: String,
    pub status: ReleaseStatus,
    pub beneficiary_id: Option<String>,
    pub unlock_date: Option<DateTime<Utc>>,
    pub inactivity_days: Option<u32>,
    pub days_inactive: u32,
    pub days_remaining: Option<u32>,
    pub required_shards: u8,
    pub total_shards: usize,
    pub distributed_shards: usize,
    pub acknowledged_shards: usize,
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// Delivery of unlock notices to a beneficiary. Implementations may do
/// network I/O; the engine never depends on the outcome.
#[async_trait]
pub trait BeneficiaryNotifier: Send + Sync {
    async fn notify(&self, notice: &BeneficiaryNotice) -> anyhow::Result<()>;
}

/// Notifier that only writes the notice to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl BeneficiaryNotifier for LogNotifier {
    async fn notify(&self, notice: &BeneficiaryNotice) -> anyhow::Result<()> {
        info!(
            item_id = %notice.item_id,
            beneficiary = %notice.beneficiary_id,
            trigger = ?notice.trigger,
            required_shards = notice.required_shards,
            "item unlocked for beneficiary"
        );
        Ok(())
    }
}

/// Hand every notice to `notifier`. Failures are logged and dropped.
/// Returns the number delivered.
pub async fn dispatch_notices(
    notifier: &dyn BeneficiaryNotifier,
    notices: &[BeneficiaryNotice],
) -> usize {
    let mut delivered = 0;
    for notice in notices {
        match notifier.notify(notice).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                item_id = %notice.item_id,
                beneficiary = %notice.beneficiary_id,
                "beneficiary notification failed: {e:#}"
            ),
        }
    }
    delivered
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EngineState {
    tracker: InactivityTracker,
    #[serde(default)]
    issued_warnings: BTreeSet<IssuedWarning>,
}

pub struct ReleaseEngine {
    state: Mutex<EngineState>,
    state_path: Option<PathBuf>,
    warning_buckets: Vec<u32>,
    shard_validity: Duration,
    events: EventBus,
}

impl ReleaseEngine {
    /// Engine with in-memory state only.
    pub fn new(settings: &VaultSettings, events: EventBus, now: DateTime<Utc>) -> Self {
        Self::with_state(
            EngineState {
                tracker: InactivityTracker::new(now, settings.activity_history_days),
                issued_warnings: BTreeSet::new(),
            },
            None,
            settings,
            events,
        )
    }

    /// Engine whose tracker and warnings persist at `path`. A missing file
    /// starts the idle clock at `now`.
    pub fn open(
        path: &Path,
        settings: &VaultSettings,
        events: EventBus,
        now: DateTime<Utc>,
    ) -> Result<Self, ReleaseError> {
        let state = match fs::read(path) {
            Ok(bytes) => {
                let mut state: EngineState = serde_json::from_slice(&bytes)
                    .map_err(|e| ReleaseError::Persist(e.to_string()))?;
                state.tracker.history_days = settings.activity_history_days.max(1);
                state
            }
            Err(e) if e.kind() == ErrorKind::NotFound => EngineState {
                tracker: InactivityTracker::new(now, settings.activity_history_days),
                issued_warnings: BTreeSet::new(),
            },
            Err(e) => return Err(ReleaseError::Persist(e.to_string())),
        };
        let engine = Self::with_state(state, Some(path.to_path_buf()), settings, events);
        engine.persist(&engine.state.lock())?;
        Ok(engine)
    }

    fn with_state(
        state: EngineState,
        state_path: Option<PathBuf>,
        settings: &VaultSettings,
        events: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            state_path,
            warning_buckets: settings.warning_buckets(),
            shard_validity: Duration::days(i64::from(settings.shard_validity_days)),
            events,
        }
    }

    fn persist(&self, state: &EngineState) -> Result<(), ReleaseError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| ReleaseError::Persist(e.to_string()))?;
        write_atomic(path, &bytes).map_err(|e| ReleaseError::Persist(e.to_string()))
    }

    pub fn tracker(&self) -> InactivityTracker {
        self.state.lock().tracker.clone()
    }

    pub fn days_inactive(&self, now: DateTime<Utc>) -> u32 {
        self.state.lock().tracker.days_inactive(now)
    }

    pub fn outstanding_warnings(&self) -> Vec<IssuedWarning> {
        self.state.lock().issued_warnings.iter().cloned().collect()
    }

    /// Note owner activity. The idle clock restarts and every outstanding
    /// inactivity warning is withdrawn; unlocked items stay unlocked.
    /// Returns the number of warnings withdrawn.
    pub fn record_activity(&self, now: DateTime<Utc>) -> Result<usize, ReleaseError> {
        self.record_activity_kind(now, "activity")
    }

    pub fn record_activity_kind(&self, now: DateTime<Utc>, kind: &str) -> Result<usize, ReleaseError> {
        let mut state = self.state.lock();
        state.tracker.record(now, kind);

        let mut cleared: Vec<(Uuid, usize)> = Vec::new();
        state.issued_warnings.retain(|w| {
            if w.trigger != TriggerKind::Inactivity {
                return true;
            }
            match cleared.iter_mut().find(|(id, _)| *id == w.item_id) {
                Some((_, count)) => *count += 1,
                None => cleared.push((w.item_id, 1)),
            }
            false
        });
        self.persist(&state)?;
        drop(state);

        self.events.publish(VaultEvent::ActivityRecorded { at: now });
        let total: usize = cleared.iter().map(|(_, n)| n).sum();
        for (item_id, count) in cleared {
            self.events.publish(VaultEvent::WarningsCleared { item_id, count });
        }
        debug!(kind, cleared = total, "owner activity recorded");
        Ok(total)
    }

    /// Explicit reset: history is discarded and the clock restarts.
    pub fn reset_activity(&self, now: DateTime<Utc>) -> Result<(), ReleaseError> {
        let mut state = self.state.lock();
        state.tracker.reset(now);
        state
            .issued_warnings
            .retain(|w| w.trigger != TriggerKind::Inactivity);
        self.persist(&state)
    }

    /// Evaluate every locked item against `now`.
    pub fn tick(&self, store: &VaultStore, now: DateTime<Utc>) -> Result<TickReport, ReleaseError> {
        let mut state = self.state.lock();
        let days_inactive = state.tracker.days_inactive(now);
        let mut report = TickReport::default();
        let mut dirty = false;

        for item in store.list() {
            let Some(lock) = item.time_lock.as_ref().filter(|l| l.enabled) else {
                continue;
            };
            if lock.status != ReleaseStatus::Locked {
                continue;
            }

            if let Some(trigger) = due_trigger(lock, days_inactive, now) {
                let unlocked = store.update_item(item.id, |it| {
                    if let Some(tl) = it.time_lock.as_mut() {
                        tl.status = ReleaseStatus::Unlocked;
                        tl.unlocked_at = Some(now);
                    }
                    Ok(())
                });
                if let Err(e) = unlocked {
                    // Warnings already raised this tick must not be re-announced.
                    if dirty {
                        if let Err(persist) = self.persist(&state) {
                            warn!(error = %persist, "could not save warning state");
                        }
                    }
                    return Err(e.into());
                }
                let before = state.issued_warnings.len();
                state.issued_warnings.retain(|w| w.item_id != item.id);
                dirty |= before != state.issued_warnings.len();

                info!(item_id = %item.id, trigger = ?trigger, "item unlocked");
                self.events.publish(VaultEvent::StatusChanged {
                    item_id: item.id,
                    from: ReleaseStatus::Locked,
                    to: ReleaseStatus::Unlocked,
                });
                report.unlocked.push(item.id);
                if let Some(beneficiary) = &lock.beneficiary_id {
                    report.notices.push(BeneficiaryNotice {
                        item_id: item.id,
                        item_name: item.name.clone(),
                        beneficiary_id: beneficiary.clone(),
                        trigger,
                        unlocked_at: now,
                        required_shards: lock.required_shard_count,
                        total_shards: u8::try_from(lock.shards.len()).unwrap_or(u8::MAX),
                    });
                }
                continue;
            }

            for (trigger, days_remaining) in remaining_days(lock, days_inactive, now) {
                let Some(bucket) = tightest_bucket(&self.warning_buckets, days_remaining) else {
                    continue;
                };
                let key = IssuedWarning {
                    item_id: item.id,
                    trigger,
                    bucket,
                };
                if !state.issued_warnings.insert(key) {
                    continue;
                }
                dirty = true;
                warn!(item_id = %item.id, trigger = ?trigger, days_remaining, "release approaching");
                self.events.publish(VaultEvent::WarningRaised {
                    item_id: item.id,
                    days_remaining,
                    bucket,
                });
                report.warnings.push(ReleaseWarning {
                    item_id: item.id,
                    trigger,
                    bucket,
                    days_remaining,
                });
            }
        }

        if dirty {
            self.persist(&state)?;
        }
        debug!(
            unlocked = report.unlocked.len(),
            warnings = report.warnings.len(),
            "release tick complete"
        );
        Ok(report)
    }

    /// Split the item key among the beneficiary (shard 1) and witnesses
    /// (shards 2..) and lock the item. Configuring counts as owner activity,
    /// so a fresh inactivity threshold starts counting at `now`.
    pub fn configure_inheritance(
        &self,
        store: &VaultStore,
        id: Uuid,
        plan: InheritancePlan,
        now: DateTime<Utc>,
    ) -> Result<VaultItem, ReleaseError> {
        plan.validate()?;
        let item = store.get(id)?;
        if let Some(existing) = item.time_lock.as_ref().filter(|l| l.enabled) {
            if !matches!(existing.status, ReleaseStatus::Locked | ReleaseStatus::Failed) {
                return Err(ReleaseError::IllegalTransition {
                    from: existing.status,
                    to: ReleaseStatus::Locked,
                });
            }
        }

        let total = 1 + plan.witness_ids.len();
        let threshold = threshold_for(plan.witness_ids.len());
        let item_key = store.item_key(id)?;
        let shares = shamir::split(&item_key[..], threshold, total)?;

        let recipients = std::iter::once(&plan.beneficiary_id).chain(plan.witness_ids.iter());
        let mut shards = Vec::with_capacity(total);
        for (share, recipient) in shares.iter().zip(recipients) {
            shards.push(EncryptedKeyShard {
                index: share.index,
                payload: seal_shard(store.device_key(), id, share)?,
                recipient_id: recipient.clone(),
                distributed_at: None,
                acknowledged_at: None,
            });
        }

        let config = TimeLockConfig {
            enabled: true,
            unlock_date: plan.unlock_date,
            inactivity_days: plan.inactivity_days,
            beneficiary_id: Some(plan.beneficiary_id.clone()),
            witness_ids: plan.witness_ids.clone(),
            status: ReleaseStatus::Locked,
            shards,
            required_shard_count: threshold,
            unlocked_at: None,
        };
        let updated = store.update_item(id, |it| {
            it.time_lock = Some(config);
            it.access_control = AccessControl::TimeLocked;
            Ok(())
        })?;
        self.forget_warnings(id)?;
        self.record_activity_kind(now, "configure_inheritance")?;

        info!(item_id = %id, threshold, total_shares = total, "inheritance configured");
        self.events.publish(VaultEvent::InheritanceConfigured {
            item_id: id,
            threshold,
            total_shares: u8::try_from(total).unwrap_or(u8::MAX),
        });
        Ok(updated)
    }

    /// Remove the time lock and every shard; the item becomes private.
    pub fn disable_inheritance(&self, store: &VaultStore, id: Uuid) -> Result<VaultItem, ReleaseError> {
        let item = store.get(id)?;
        if item.time_lock.is_none() {
            return Err(ReleaseError::NotConfigured(id.to_string()));
        }
        let updated = store.update_time_lock(id, None)?;
        self.forget_warnings(id)?;
        info!(item_id = %id, "inheritance disabled");
        self.events.publish(VaultEvent::InheritanceDisabled { item_id: id });
        Ok(updated)
    }

    pub fn mark_pending_review(&self, store: &VaultStore, id: Uuid) -> Result<VaultItem, ReleaseError> {
        self.transition(store, id, ReleaseStatus::PendingReview)
    }

    pub fn mark_released(&self, store: &VaultStore, id: Uuid) -> Result<VaultItem, ReleaseError> {
        self.transition(store, id, ReleaseStatus::Released)
    }

    pub fn mark_failed(&self, store: &VaultStore, id: Uuid) -> Result<VaultItem, ReleaseError> {
        self.transition(store, id, ReleaseStatus::Failed)
    }

    fn transition(
        &self,
        store: &VaultStore,
        id: Uuid,
        to: ReleaseStatus,
    ) -> Result<VaultItem, ReleaseError> {
        let item = store.get(id)?;
        let from = enabled_lock(&item)?.status;
        if !from.can_transition_to(to) {
            return Err(ReleaseError::IllegalTransition { from, to });
        }
        let updated = store.update_item(id, |it| {
            if let Some(tl) = it.time_lock.as_mut() {
                tl.status = to;
            }
            Ok(())
        })?;
        info!(item_id = %id, from = ?from, to = ?to, "release status changed");
        self.events.publish(VaultEvent::StatusChanged { item_id: id, from, to });
        Ok(updated)
    }

    /// Open the sealed share at `index`. Only for the owner's device.
    pub fn shard_share(
        &self,
        store: &VaultStore,
        id: Uuid,
        index: u8,
    ) -> Result<SecretShare, ReleaseError> {
        let item = store.get(id)?;
        let shard = enabled_lock(&item)?
            .shard(index)
            .ok_or(ReleaseError::ShardNotFound(index))?;
        open_shard(store.device_key(), id, shard)
    }

    /// Build the transport package for shard `index`. Refused until the item
    /// has unlocked. The first packaging stamps `distributed_at`.
    pub fn package_shard(
        &self,
        store: &VaultStore,
        id: Uuid,
        index: u8,
        recipient_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ShardPackage, ReleaseError> {
        let item = store.get(id)?;
        let lock = enabled_lock(&item)?;
        if !lock.status.allows_transport() {
            return Err(ReleaseError::TransportNotAllowed(lock.status));
        }
        let shard = lock.shard(index).ok_or(ReleaseError::ShardNotFound(index))?;
        let share = open_shard(store.device_key(), id, shard)?;
        let package = ShardPackage::new(
            &share,
            &shard.recipient_id,
            &item.name,
            recipient_name,
            now,
            self.shard_validity,
        )?;

        if shard.distributed_at.is_none() {
            store.update_item(id, |it| {
                if let Some(s) = it
                    .time_lock
                    .as_mut()
                    .and_then(|tl| tl.shards.iter_mut().find(|s| s.index == index))
                {
                    s.distributed_at = Some(now);
                }
                Ok(())
            })?;
        }
        info!(item_id = %id, shard_index = index, package_id = %package.id, "shard packaged");
        self.events.publish(VaultEvent::ShardPackaged {
            item_id: id,
            shard_index: index,
            package_id: package.id,
        });
        Ok(package)
    }

    /// Record the recipient's receipt of shard `index`; the first
    /// acknowledgement wins.
    pub fn acknowledge_shard(
        &self,
        store: &VaultStore,
        id: Uuid,
        index: u8,
        now: DateTime<Utc>,
    ) -> Result<VaultItem, ReleaseError> {
        let item = store.get(id)?;
        let shard = enabled_lock(&item)?
            .shard(index)
            .ok_or(ReleaseError::ShardNotFound(index))?;
        if shard.acknowledged_at.is_some() {
            return Ok(item);
        }
        let updated = store.update_item(id, |it| {
            if let Some(s) = it
                .time_lock
                .as_mut()
                .and_then(|tl| tl.shards.iter_mut().find(|s| s.index == index))
            {
                s.acknowledged_at = Some(now);
            }
            Ok(())
        })?;
        self.events.publish(VaultEvent::ShardAcknowledged {
            item_id: id,
            shard_index: index,
        });
        Ok(updated)
    }

    pub fn status_report(&self, store: &VaultStore, now: DateTime<Utc>) -> Vec<ItemReleaseReport> {
        let days_inactive = self.days_inactive(now);
        store
            .list()
            .into_iter()
            .filter_map(|item| {
                let lock = item.time_lock.as_ref().filter(|l| l.enabled)?;
                let days_remaining = (lock.status == ReleaseStatus::Locked).then(|| {
                    if due_trigger(lock, days_inactive, now).is_some() {
                        0
                    } else {
                        remaining_days(lock, days_inactive, now)
                            .into_iter()
                            .map(|(_, d)| d)
                            .min()
                            .unwrap_or(0)
                    }
                });
                Some(ItemReleaseReport {
                    item_id: item.id,
                    name: item.name.clone(),
                    status: lock.status,
                    beneficiary_id: lock.beneficiary_id.clone(),
                    unlock_date: lock.unlock_date,
                    inactivity_days: lock.inactivity_days,
                    days_inactive,
                    days_remaining,
                    required_shards: lock.required_shard_count,
                    total_shards: lock.shards.len(),
                    distributed_shards: lock.shards.iter().filter(|s| s.distributed_at.is_some()).count(),
                    acknowledged_shards: lock
                        .shards
                        .iter()
                        .filter(|s| s.acknowledged_at.is_some())
                        .count(),
                    unlocked_at: lock.unlocked_at,
                })
            })
            .collect()
    }

    fn forget_warnings(&self, id: Uuid) -> Result<(), ReleaseError> {
        let mut state = self.state.lock();
        let before = state.issued_warnings.len();
        state.issued_warnings.retain(|w| w.item_id != id);
        if before != state.issued_warnings.len() {
            self.persist(&state)?;
        }
        Ok(())
    }
}

fn enabled_lock(item: &VaultItem) -> Result<&TimeLockConfig, ReleaseError> {
    item.time_lock
        .as_ref()
        .filter(|l| l.enabled)
        .ok_or_else(|| ReleaseError::NotConfigured(item.id.to_string()))
}

/// The condition that unlocks the item now, if any. A fixed date wins when
/// both hold.
fn due_trigger(lock: &TimeLockConfig, days_inactive: u32, now: DateTime<Utc>) -> Option<TriggerKind> {
    if lock.unlock_date.is_some_and(|date| now >= date) {
        return Some(TriggerKind::UnlockDate);
    }
    if lock.inactivity_days.is_some_and(|days| days_inactive >= days) {
        return Some(TriggerKind::Inactivity);
    }
    None
}

/// Whole days left per configured trigger that has not fired yet. Partial
/// days to a fixed date round up.
fn remaining_days(
    lock: &TimeLockConfig,
    days_inactive: u32,
    now: DateTime<Utc>,
) -> Vec<(TriggerKind, u32)> {
    let mut out = Vec::with_capacity(2);
    if let Some(threshold) = lock.inactivity_days {
        if days_inactive < threshold {
            out.push((TriggerKind::Inactivity, threshold - days_inactive));
        }
    }
    if let Some(date) = lock.unlock_date {
        let secs = (date - now).num_seconds();
        if secs > 0 {
            let days = (secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
            out.push((TriggerKind::UnlockDate, u32::try_from(days).unwrap_or(u32::MAX)));
        }
    }
    out
}

/// Smallest bucket that still covers `days_remaining`.
fn tightest_bucket(buckets: &[u32], days_remaining: u32) -> Option<u32> {
    buckets.iter().copied().filter(|b| days_remaining <= *b).min()
}

fn shard_aad(item_id: Uuid, index: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(SHARD_AAD_PREFIX.len() + 17);
    aad.extend_from_slice(SHARD_AAD_PREFIX);
    aad.extend_from_slice(item_id.as_bytes());
    aad.push(index);
    aad
}

fn seal_shard(
    device_key: &[u8; KEY_LEN],
    item_id: Uuid,
    share: &SecretShare,
) -> Result<String, ReleaseError> {
    let json = Zeroizing::new(serde_json::to_vec(share).map_err(|_| ReleaseError::ShardSeal)?);
    let sealed = crypto::seal(device_key, &json, &shard_aad(item_id, share.index))
        .ok_or(ReleaseError::ShardSeal)?;
    Ok(general_purpose::STANDARD.encode(sealed))
}

fn open_shard(
    device_key: &[u8; KEY_LEN],
    item_id: Uuid,
    shard: &EncryptedKeyShard,
) -> Result<SecretShare, ReleaseError> {
    let sealed = general_purpose::STANDARD
        .decode(&shard.payload)
        .map_err(|_| ReleaseError::ShardSeal)?;
    let json = crypto::open(device_key, &sealed, &shard_aad(item_id, shard.index))
        .ok_or(ReleaseError::ShardSeal)?;
    let share: SecretShare = serde_json::from_slice(&json).map_err(|_| ReleaseError::ShardSeal)?;
    if share.index != shard.index || !share.verify() {
        return Err(ReleaseError::ShardSeal);
    }
    Ok(share)
}
