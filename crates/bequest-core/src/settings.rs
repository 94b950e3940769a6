use serde::{Deserialize, Serialize};

use crate::error::KeyStoreError;
use crate::keystore::KeyValueStore;

const SETTINGS_KEY: &str = "bequest.settings";

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;
pub const MAX_ACTIVITY_HISTORY_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Plaintext bytes sealed per AEAD chunk.
    pub chunk_size: usize,
    /// Remaining-day buckets that raise an advisory warning.
    pub warning_days: Vec<u32>,
    /// Seconds between release evaluations; bounds unlock latency.
    pub tick_interval_secs: u64,
    pub shard_validity_days: u32,
    pub activity_history_days: u32,
    pub uri_scheme: String,
    pub compress_packages: bool,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            warning_days: vec![7, 3, 1],
            tick_interval_secs: 60 * 60,
            shard_validity_days: 7,
            activity_history_days: 30,
            uri_scheme: "bequest".into(),
            compress_packages: false,
        }
    }
}

impl VaultSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!(
                "Chunk size must be between {} and {} bytes",
                MIN_CHUNK_SIZE,
                MAX_CHUNK_SIZE
            );
        }
        if self.warning_days.iter().any(|d| *d == 0) {
            anyhow::bail!("Warning days must be positive");
        }
        if self.tick_interval_secs < 10 {
            anyhow::bail!("Tick interval must be at least 10 seconds");
        }
        if self.shard_validity_days == 0 {
            anyhow::bail!("Shard validity must be at least one day");
        }
        if self.activity_history_days == 0 {
            anyhow::bail!("Activity history must keep at least one day");
        }
        if self.activity_history_days > MAX_ACTIVITY_HISTORY_DAYS {
            anyhow::bail!(
                "Activity history is kept for at most {} days",
                MAX_ACTIVITY_HISTORY_DAYS
            );
        }
        let scheme_ok = !self.uri_scheme.is_empty()
            && self
                .uri_scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
            && self.uri_scheme.starts_with(|c: char| c.is_ascii_alphabetic());
        if !scheme_ok {
            anyhow::bail!("URI scheme '{}' is not valid", self.uri_scheme);
        }
        Ok(())
    }

    /// Warning buckets, largest first, without duplicates.
    pub fn warning_buckets(&self) -> Vec<u32> {
        let mut days = self.warning_days.clone();
        days.sort_unstable_by(|a, b| b.cmp(a));
        days.dedup();
        days
    }
}

pub fn load_settings(store: &dyn KeyValueStore) -> Result<VaultSettings, KeyStoreError> {
    if let Some(bytes) = store.get(SETTINGS_KEY)? {
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Ok(VaultSettings::default())
    }
}

pub fn save_settings(store: &dyn KeyValueStore, settings: &VaultSettings) -> anyhow::Result<()> {
    settings.validate()?;
    let data = serde_json::to_vec(settings)?;
    store.set(SETTINGS_KEY, &data)?;
    Ok(())
}
