//! Transport envelope for a single shard.
//!
//! A package travels either as a URI (`<scheme>://shard?data=<base64url>`,
//! with `&enc=zstd` when the JSON was compressed) suitable for a QR code, or
//! as a standalone `.bqshard` JSON file. Compression is optional and carries
//! no size guarantee.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use url::Url;
use uuid::Uuid;

use crate::error::PackageError;
use crate::fs_util::write_atomic;
use crate::shamir::SecretShare;

pub const PACKAGE_EXTENSION: &str = "bqshard";
pub const DEFAULT_VALIDITY_DAYS: i64 = 7;
const URI_HOST: &str = "shard";
const ENCODING_ZSTD: &str = "zstd";
const ZSTD_LEVEL: i32 = 3;
// Upper bound for a decompressed package; a real one is well under 2 KiB.
const MAX_PACKAGE_BYTES: usize = 64 * 1024;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPackage {
    pub id: Uuid,
    pub shard_index: u8,
    /// Base64 recovery input (an encoded `SecretShare`).
    pub shard_data: String,
    pub recipient_id: String,
    pub item_name: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for ShardPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardPackage")
            .field("id", &self.id)
            .field("shard_index", &self.shard_index)
            .field("shard_data", &"<redacted>")
            .field("recipient_id", &self.recipient_id)
            .field("item_name", &self.item_name)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl ShardPackage {
    pub fn new(
        share: &SecretShare,
        recipient_id: &str,
        item_name: &str,
        recipient_name: Option<&str>,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<Self, PackageError> {
        let shard_data = share
            .encode()
            .map_err(|e| PackageError::Decode(e.to_string()))?;
        Ok(Self {
            id: Uuid::new_v4(),
            shard_index: share.index,
            shard_data,
            recipient_id: recipient_id.to_string(),
            item_name: item_name.to_string(),
            recipient_name: recipient_name.map(str::to_string),
            created_at: now,
            expires_at: now + validity,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The share carried by this package, refused once expired.
    pub fn share(&self, now: DateTime<Utc>) -> Result<SecretShare, PackageError> {
        if self.is_expired(now) {
            return Err(PackageError::Expired(self.id.to_string()));
        }
        let share = SecretShare::decode(&self.shard_data)
            .map_err(|e| PackageError::Decode(e.to_string()))?;
        if share.index != self.shard_index {
            return Err(PackageError::Decode(format!(
                "package claims shard {} but carries shard {}",
                self.shard_index, share.index
            )));
        }
        Ok(share)
    }

    pub fn to_uri(&self, scheme: &str, compress: bool) -> Result<String, PackageError> {
        let json = serde_json::to_vec(self).map_err(|e| PackageError::Decode(e.to_string()))?;
        let payload = if compress {
            zstd::bulk::compress(&json, ZSTD_LEVEL)?
        } else {
            json
        };
        let mut url = Url::parse(&format!("{scheme}://{URI_HOST}"))
            .map_err(|e| PackageError::InvalidUri(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("data", &general_purpose::URL_SAFE_NO_PAD.encode(payload));
            if compress {
                query.append_pair("enc", ENCODING_ZSTD);
            }
        }
        Ok(url.to_string())
    }

    pub fn from_uri(uri: &str) -> Result<Self, PackageError> {
        let url = Url::parse(uri.trim()).map_err(|e| PackageError::InvalidUri(e.to_string()))?;
        if url.host_str() != Some(URI_HOST) {
            return Err(PackageError::InvalidUri(format!(
                "expected host '{URI_HOST}' in {}",
                url.scheme()
            )));
        }
        let mut data = None;
        let mut encoding = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "data" => data = Some(value.into_owned()),
                "enc" => encoding = Some(value.into_owned()),
                _ => {}
            }
        }
        let data = data.ok_or_else(|| PackageError::InvalidUri("missing data parameter".into()))?;
        let raw = general_purpose::URL_SAFE_NO_PAD
            .decode(data.as_bytes())
            .map_err(|e| PackageError::Decode(e.to_string()))?;
        let json = match encoding.as_deref() {
            None => raw,
            Some(ENCODING_ZSTD) => zstd::bulk::decompress(&raw, MAX_PACKAGE_BYTES)
                .map_err(|e| PackageError::Decode(e.to_string()))?,
            Some(other) => return Err(PackageError::UnsupportedEncoding(other.to_string())),
        };
        serde_json::from_slice(&json).map_err(|e| PackageError::Decode(e.to_string()))
    }

    /// `<package id>.bqshard`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, PACKAGE_EXTENSION)
    }

    pub fn write_file(&self, path: &Path) -> Result<(), PackageError> {
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| PackageError::Decode(e.to_string()))?;
        write_atomic(path, &json)?;
        Ok(())
    }

    pub fn read_file(path: &Path) -> Result<Self, PackageError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| PackageError::Decode(e.to_string()))
    }
}
