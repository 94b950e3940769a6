use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub const ALGORITHM_ID: &str = "XChaCha20-Poly1305/chunked-v1";
pub const CURRENT_KEY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AccessControl {
    Private,
    Biometric,
    TimeLocked,
    Delegated,
    KeyProtected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseStatus {
    Locked,
    Unlocked,
    PendingReview,
    Released,
    Failed,
}

impl ReleaseStatus {
    /// Legal edges: locked -> unlocked -> {pendingReview, released},
    /// pendingReview -> released, and anything past locked may fail.
    pub fn can_transition_to(self, next: ReleaseStatus) -> bool {
        use ReleaseStatus::*;
        matches!(
            (self, next),
            (Locked, Unlocked)
                | (Unlocked, PendingReview)
                | (Unlocked, Released)
                | (PendingReview, Released)
                | (Unlocked, Failed)
                | (PendingReview, Failed)
                | (Released, Failed)
        )
    }

    /// Shard packages may only leave the device once the lock has opened.
    pub fn allows_transport(self) -> bool {
        matches!(
            self,
            ReleaseStatus::Unlocked | ReleaseStatus::PendingReview | ReleaseStatus::Released
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    Document,
    Image,
    Video,
    Audio,
    Archive,
    Text,
    Other,
}

impl ContentType {
    /// Classify by file extension of `name`.
    pub fn classify(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return ContentType::Other,
        };
        match ext.as_str() {
            "pdf" | "doc" | "docx" | "odt" | "rtf" | "pages" | "xls" | "xlsx" | "ppt" | "pptx" => {
                ContentType::Document
            }
            "png" | "jpg" | "jpeg" | "gif" | "heic" | "webp" | "bmp" | "tiff" => ContentType::Image,
            "mp4" | "mov" | "mkv" | "avi" | "webm" => ContentType::Video,
            "mp3" | "wav" | "m4a" | "flac" | "ogg" | "aac" => ContentType::Audio,
            "zip" | "tar" | "gz" | "tgz" | "7z" | "rar" | "zst" => ContentType::Archive,
            "txt" | "md" | "csv" | "json" | "xml" | "log" => ContentType::Text,
            _ => ContentType::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedKeyShard {
    pub index: u8,
    /// Base64 of the share sealed under the device key.
    pub payload: String,
    pub recipient_id: String,
    #[serde(default)]
    pub distributed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeLockConfig {
    pub enabled: bool,
    #[serde(default)]
    pub unlock_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inactivity_days: Option<u32>,
    #[serde(default)]
    pub beneficiary_id: Option<String>,
    #[serde(default)]
    pub witness_ids: Vec<String>,
    pub status: ReleaseStatus,
    #[serde(default)]
    pub shards: Vec<EncryptedKeyShard>,
    pub required_shard_count: u8,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl TimeLockConfig {
    /// Check the shard-count invariant; shards go to others, never the owner.
    pub fn validate(&self) -> Result<(), String> {
        if self.required_shard_count < 2 {
            return Err("required shard count must be at least 2".into());
        }
        if usize::from(self.required_shard_count) > self.shards.len() + 1 {
            return Err(format!(
                "required shard count {} exceeds {} shards",
                self.required_shard_count,
                self.shards.len()
            ));
        }
        Ok(())
    }

    pub fn shard(&self, index: u8) -> Option<&EncryptedKeyShard> {
        self.shards.iter().find(|s| s.index == index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultMetadata {
    /// Lowercase hex SHA-256 of the plaintext.
    pub checksum: String,
    /// Lowercase hex SHA-256 of the ciphertext blob.
    pub ciphertext_checksum: String,
    pub algorithm: String,
    pub key_version: u32,
    pub content_type: ContentType,
    /// Item key sealed under the device key, base64.
    pub wrapped_key: String,
    pub chunk_size: u32,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultItem {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub access_control: AccessControl,
    #[serde(default)]
    pub time_lock: Option<TimeLockConfig>,
    /// Blob file name inside the vault's blob directory.
    pub ciphertext_file: String,
    #[serde(default)]
    pub source: Option<String>,
    pub metadata: VaultMetadata,
}

impl VaultItem {
    /// Case-insensitive substring match over name, tags and source.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            || self
                .source
                .as_deref()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
    }

    pub fn time_lock_enabled(&self) -> bool {
        self.time_lock.as_ref().map(|t| t.enabled).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_transitions_follow_state_machine() {
        use ReleaseStatus::*;
        assert!(Locked.can_transition_to(Unlocked));
        assert!(Unlocked.can_transition_to(Released));
        assert!(Unlocked.can_transition_to(PendingReview));
        assert!(PendingReview.can_transition_to(Released));
        assert!(Released.can_transition_to(Failed));
        assert!(!Locked.can_transition_to(Released));
        assert!(!Unlocked.can_transition_to(Locked));
        assert!(!Failed.can_transition_to(Unlocked));
    }

    #[test]
    fn transport_only_after_unlock() {
        assert!(!ReleaseStatus::Locked.allows_transport());
        assert!(ReleaseStatus::Unlocked.allows_transport());
        assert!(!ReleaseStatus::Failed.allows_transport());
    }

    #[test]
    fn classify_by_extension() {
        assert_eq!(ContentType::classify("Will.PDF"), ContentType::Document);
        assert_eq!(ContentType::classify("photo.heic"), ContentType::Image);
        assert_eq!(ContentType::classify("notes.md"), ContentType::Text);
        assert_eq!(ContentType::classify("README"), ContentType::Other);
    }

    #[test]
    fn status_serializes_camel_case() {
        let json = serde_json::to_string(&ReleaseStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pendingReview\"");
        let json = serde_json::to_string(&AccessControl::KeyProtected).unwrap();
        assert_eq!(json, "\"keyProtected\"");
    }

    #[test]
    fn shard_count_invariant() {
        let mut config = TimeLockConfig {
            enabled: true,
            unlock_date: None,
            inactivity_days: Some(30),
            beneficiary_id: Some("heir".into()),
            witness_ids: vec!["w1".into()],
            status: ReleaseStatus::Locked,
            shards: vec![EncryptedKeyShard {
                index: 1,
                payload: String::new(),
                recipient_id: "heir".into(),
                distributed_at: None,
                acknowledged_at: None,
            }],
            required_shard_count: 2,
            unlocked_at: None,
        };
        assert!(config.validate().is_ok());
        config.required_shard_count = 1;
        assert!(config.validate().is_err());
        config.required_shard_count = 3;
        assert!(config.validate().is_err());
    }
}
