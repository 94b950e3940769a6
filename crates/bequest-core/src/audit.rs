//! Tamper-evident audit trail.
//!
//! One JSON object per line. Each entry hashes its own body together with
//! the previous entry's hash and is signed with the device's Ed25519 audit
//! key, so edits, deletions and reordering inside a file are detectable with
//! [`AuditLog::verify_chain`]. Files rotate by size; a fresh file restarts
//! the chain at [`CHAIN_START`] while `seq` keeps counting.

use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::events::VaultEvent;

pub const CHAIN_START: &str = "CHAIN_START";
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
const MAX_ROTATIONS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: AuditSeverity,
    pub data: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
    pub signature: String,
}

impl AuditEntry {
    fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "seq": self.seq,
            "timestamp": self.timestamp,
            "event_type": self.event_type,
            "severity": self.severity,
            "data": self.data,
            "prev_hash": self.prev_hash,
        })
    }
}

#[derive(Debug)]
struct ChainState {
    last_seq: u64,
    last_hash: String,
}

pub struct AuditLog {
    path: PathBuf,
    signer: SigningKey,
    state: Mutex<ChainState>,
    max_bytes: u64,
}

impl AuditLog {
    pub fn open<P: AsRef<Path>>(path: P, signer: SigningKey, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let (last_seq, last_hash) = match read_entries(&path)?.last() {
            Some(entry) => (entry.seq, entry.hash.clone()),
            None => (0, CHAIN_START.to_string()),
        };
        Ok(Self {
            path,
            signer,
            state: Mutex::new(ChainState {
                last_seq,
                last_hash,
            }),
            max_bytes,
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signer.verifying_key()
    }

    pub fn append(
        &self,
        event_type: &str,
        severity: AuditSeverity,
        data: serde_json::Value,
    ) -> Result<AuditEntry> {
        let mut state = self.state.lock();
        self.rotate_if_needed(&mut state)?;
        let mut entry = AuditEntry {
            seq: state.last_seq + 1,
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            severity,
            data,
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
            signature: String::new(),
        };
        let body = entry.body();
        entry.hash = hash_body(&body);
        let signature = self.signer.sign(signed_bytes(&body, &entry.hash).as_bytes());
        entry.signature = general_purpose::STANDARD.encode(signature.to_bytes());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        file.flush()?;

        state.last_seq = entry.seq;
        state.last_hash = entry.hash.clone();
        Ok(entry)
    }

    /// Record a bus event with a severity derived from its kind.
    pub fn record(&self, event: &VaultEvent) -> Result<AuditEntry> {
        let severity = match event {
            VaultEvent::StatusChanged { .. } | VaultEvent::ItemDeleted { .. } => {
                AuditSeverity::Critical
            }
            VaultEvent::WarningRaised { .. } | VaultEvent::InheritanceDisabled { .. } => {
                AuditSeverity::Warn
            }
            _ => AuditSeverity::Info,
        };
        self.append(event.label(), severity, serde_json::to_value(event)?)
    }

    fn rotate_if_needed(&self, state: &mut ChainState) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.rotated_path(i);
            if !rotated.exists() {
                continue;
            }
            if i == MAX_ROTATIONS {
                fs::remove_file(&rotated)?;
            } else {
                fs::rename(&rotated, self.rotated_path(i + 1))?;
            }
        }
        fs::rename(&self.path, self.rotated_path(1))?;
        state.last_hash = CHAIN_START.to_string();
        Ok(())
    }

    /// Most recent first, optionally bounded by time and count.
    pub fn read_recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = read_entries(&self.path)?
            .into_iter()
            .filter(|e| since.map(|s| e.timestamp >= s).unwrap_or(true))
            .collect();
        entries.reverse();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Check hashes, links and signatures of the current file. Returns the
    /// number of verified entries.
    pub fn verify_chain(&self) -> Result<usize> {
        let public = self.verifying_key();
        let entries = read_entries(&self.path)?;
        let mut prev = CHAIN_START.to_string();
        for entry in &entries {
            if entry.prev_hash != prev {
                bail!("audit chain broken at seq {}", entry.seq);
            }
            let body = entry.body();
            if hash_body(&body) != entry.hash {
                bail!("audit entry {} hash mismatch", entry.seq);
            }
            let raw = general_purpose::STANDARD
                .decode(&entry.signature)
                .map_err(|e| anyhow!("audit entry {} signature encoding: {e}", entry.seq))?;
            let sig_bytes: [u8; 64] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow!("audit entry {} signature length", entry.seq))?;
            public
                .verify(
                    signed_bytes(&body, &entry.hash).as_bytes(),
                    &Signature::from_bytes(&sig_bytes),
                )
                .map_err(|e| anyhow!("audit entry {} signature invalid: {e}", entry.seq))?;
            prev = entry.hash.clone();
        }
        Ok(entries.len())
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audit.log".to_string());
        self.path.with_file_name(format!("{name}.{index}"))
    }
}

fn hash_body(body: &serde_json::Value) -> String {
    hex::encode(Sha256::digest(body.to_string().as_bytes()))
}

fn signed_bytes(body: &serde_json::Value, hash: &str) -> String {
    let mut signed = body.clone();
    signed["hash"] = serde_json::Value::String(hash.to_string());
    signed.to_string()
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}
