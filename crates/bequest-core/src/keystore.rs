//! Storage for small secrets: the device key, the audit signing key and the
//! persisted settings.
//!
//! The core only sees [`KeyValueStore`]. Three adapters exist:
//! - [`MemoryStore`]: process-local, for tests and throwaway sessions.
//! - [`EncryptedFileStore`]: a single password-sealed file (Argon2id +
//!   XChaCha20-Poly1305), rewritten in full on every change.
//! - [`KeyringStore`]: the OS credential store.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use keyring::Entry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{self, SymmetricKey};
use crate::error::KeyStoreError;
use crate::fs_util::write_atomic;

pub const DEVICE_KEY_ENTRY: &str = "bequest.device_key";
pub const SIGNING_KEY_ENTRY: &str = "bequest.audit_signing_key";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyStoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError>;
    fn delete(&self, key: &str) -> Result<(), KeyStoreError>;
}

/// Load the device key, generating and storing it on first use.
pub fn load_or_create_device_key(store: &dyn KeyValueStore) -> Result<SymmetricKey, KeyStoreError> {
    if let Some(bytes) = store.get(DEVICE_KEY_ENTRY)? {
        let bytes = Zeroizing::new(bytes);
        return crypto::key_from_slice(&bytes)
            .ok_or_else(|| KeyStoreError::InvalidKey("device key length invalid".into()));
    }
    let key = crypto::generate_key();
    store.set(DEVICE_KEY_ENTRY, key.as_slice())?;
    info!("generated new device key");
    Ok(key)
}

pub fn load_or_create_signing_key(store: &dyn KeyValueStore) -> Result<SigningKey, KeyStoreError> {
    if let Some(bytes) = store.get(SIGNING_KEY_ENTRY)? {
        let bytes = Zeroizing::new(bytes);
        let key_bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyStoreError::InvalidKey("signing key length invalid".into()))?;
        return Ok(SigningKey::from_bytes(&key_bytes));
    }
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    store.set(SIGNING_KEY_ENTRY, &key.to_bytes())?;
    info!("generated new audit signing key");
    Ok(key)
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        Ok(self.entries.read().get(key).map(|v| v.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        self.entries
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KeyStoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

pub const STORE_MAGIC: &[u8] = b"BQKEYS1\0";
pub const STORE_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: crypto::KDF_TIME_COST,
            memory_cost: crypto::KDF_MEMORY_COST,
            parallelism: crypto::KDF_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreHeader {
    pub version: u32,
    pub kdf: KdfParams,
    pub salt: [u8; 32],
}

impl StoreHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..STORE_MAGIC.len()].copy_from_slice(STORE_MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.kdf.time_cost.to_le_bytes());
        buf[16..20].copy_from_slice(&self.kdf.memory_cost.to_le_bytes());
        buf[20..24].copy_from_slice(&self.kdf.parallelism.to_le_bytes());
        buf[24..56].copy_from_slice(&self.salt);
        // remaining bytes stay zero
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, KeyStoreError> {
        if buf.len() < HEADER_SIZE {
            return Err(KeyStoreError::Backend("key store header truncated".into()));
        }
        if &buf[..STORE_MAGIC.len()] != STORE_MAGIC {
            return Err(KeyStoreError::Backend("key store magic invalid".into()));
        }
        let version = read_u32(buf, 8);
        if version != STORE_VERSION {
            return Err(KeyStoreError::Backend(format!(
                "unsupported key store version {version}"
            )));
        }
        let mut salt = [0u8; 32];
        salt.copy_from_slice(&buf[24..56]);
        Ok(Self {
            version,
            kdf: KdfParams {
                time_cost: read_u32(buf, 12),
                memory_cost: read_u32(buf, 16),
                parallelism: read_u32(buf, 20),
            },
            salt,
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[derive(Clone, Serialize, Deserialize)]
struct StorePayload {
    store_id: String,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    entries: HashMap<String, String>,
}

/// Password-sealed key-value file.
pub struct EncryptedFileStore {
    path: PathBuf,
    key: SymmetricKey,
    state: Mutex<FileState>,
}

struct FileState {
    header: StoreHeader,
    payload: StorePayload,
}

impl EncryptedFileStore {
    pub fn create_new<P: AsRef<Path>>(path: P, password: &str) -> Result<Self, KeyStoreError> {
        Self::create_with_params(path, password, KdfParams::default())
    }

    pub fn create_with_params<P: AsRef<Path>>(
        path: P,
        password: &str,
        kdf: KdfParams,
    ) -> Result<Self, KeyStoreError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(KeyStoreError::Backend(format!(
                "key store already exists at {}",
                path.display()
            )));
        }
        let salt = crypto::generate_salt();
        let key = derive(password, &salt, kdf)?;
        let now = Utc::now();
        let store = Self {
            path,
            key,
            state: Mutex::new(FileState {
                header: StoreHeader {
                    version: STORE_VERSION,
                    kdf,
                    salt,
                },
                payload: StorePayload {
                    store_id: Uuid::new_v4().to_string(),
                    created_at: now,
                    last_modified: now,
                    entries: HashMap::new(),
                },
            }),
        };
        store.save()?;
        debug!(path = %store.path.display(), "created key store");
        Ok(store)
    }

    pub fn open<P: AsRef<Path>>(path: P, password: &str) -> Result<Self, KeyStoreError> {
        let path = path.as_ref().to_path_buf();
        let raw = fs::read(&path)?;
        let header = StoreHeader::from_bytes(&raw)?;
        let key = derive(password, &header.salt, header.kdf)?;
        let plaintext = crypto::open(&key, &raw[HEADER_SIZE..], &raw[..HEADER_SIZE])
            .ok_or(KeyStoreError::Unseal)?;
        let payload: StorePayload = serde_json::from_slice(&plaintext)?;
        Ok(Self {
            path,
            key,
            state: Mutex::new(FileState { header, payload }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), KeyStoreError> {
        let mut state = self.state.lock();
        state.payload.last_modified = Utc::now();
        // header is bound as AAD; `seal` draws a fresh nonce per save
        let header = state.header.to_bytes();
        let plaintext = Zeroizing::new(serde_json::to_vec(&state.payload)?);
        let sealed = crypto::seal(&self.key, &plaintext, &header)
            .ok_or_else(|| KeyStoreError::Backend("seal key store".into()))?;
        let mut out = header;
        out.extend_from_slice(&sealed);
        write_atomic(&self.path, &out)?;
        Ok(())
    }
}

fn derive(password: &str, salt: &[u8], kdf: KdfParams) -> Result<SymmetricKey, KeyStoreError> {
    crypto::derive_key_with(password, salt, kdf.memory_cost, kdf.time_cost, kdf.parallelism)
}

impl KeyValueStore for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let state = self.state.lock();
        match state.payload.entries.get(key) {
            Some(value) => general_purpose::STANDARD
                .decode(value)
                .map(Some)
                .map_err(|e| KeyStoreError::Backend(format!("decode entry: {e}"))),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        self.state
            .lock()
            .payload
            .entries
            .insert(key.to_string(), general_purpose::STANDARD.encode(value));
        self.save()
    }

    fn delete(&self, key: &str) -> Result<(), KeyStoreError> {
        let removed = self.state.lock().payload.entries.remove(key).is_some();
        if removed {
            self.save()?;
        }
        Ok(())
    }
}

const SERVICE_NAME: &str = "Bequest";

/// OS keyring adapter. Values are base64 encoded passwords under one
/// service name, scoped by a profile so several vaults can coexist.
pub struct KeyringStore {
    profile: String,
}

impl KeyringStore {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, KeyStoreError> {
        Entry::new(SERVICE_NAME, &format!("{}:{}", self.profile, key))
            .map_err(|e| KeyStoreError::Backend(format!("keyring init: {e}")))
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        match self.entry(key)?.get_password() {
            Ok(encoded) => general_purpose::STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| KeyStoreError::Backend(format!("decode keyring entry: {e}"))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeyStoreError::Backend(format!("load {key}: {e}"))),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        self.entry(key)?
            .set_password(&general_purpose::STANDARD.encode(value))
            .map_err(|e| KeyStoreError::Backend(format!("store {key}: {e}")))
    }

    fn delete(&self, key: &str) -> Result<(), KeyStoreError> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyStoreError::Backend(format!("delete {key}: {e}"))),
        }
    }
}
