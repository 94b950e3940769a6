use anyhow::{anyhow, Context, Result};
use bequest_core::audit::{AuditLog, AuditSeverity};
use bequest_core::keystore::{
    load_or_create_device_key, load_or_create_signing_key, EncryptedFileStore, KeyValueStore,
    KeyringStore,
};
use bequest_core::paths::{activity_path, audit_log_path, data_dir, key_store_path, log_dir};
use bequest_core::settings::{load_settings, save_settings, VaultSettings};
use bequest_core::{EventBus, ReleaseEngine, VaultEvent, VaultStore};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::password::{prompt_password_once, prompt_password_twice};

/// Where the small secrets live.
#[derive(Debug, Clone)]
pub enum KeyBackend {
    /// Password-sealed `keys.dat` under the data directory.
    File,
    /// OS credential store, scoped by profile.
    Keyring(String),
}

impl KeyBackend {
    pub fn from_flag(profile: Option<String>) -> Self {
        match profile {
            Some(p) => KeyBackend::Keyring(p),
            None => KeyBackend::File,
        }
    }
}

pub fn resolve_root(data_dir_override: Option<PathBuf>) -> Result<PathBuf> {
    match data_dir_override {
        Some(dir) => Ok(dir),
        None => data_dir(),
    }
}

/// Everything a vault command needs, opened and unlocked.
pub struct VaultContext {
    pub root: PathBuf,
    pub keys: Box<dyn KeyValueStore>,
    pub settings: VaultSettings,
    pub store: Arc<VaultStore>,
    pub engine: Arc<ReleaseEngine>,
    pub audit: Arc<AuditLog>,
    events: broadcast::Receiver<VaultEvent>,
}

/// Create the key store, keys, default settings and the on-disk layout.
pub fn init_vault(root: &Path, backend: &KeyBackend) -> Result<VaultContext> {
    std::fs::create_dir_all(root)?;
    std::fs::create_dir_all(log_dir(root))?;
    let keys: Box<dyn KeyValueStore> = match backend {
        KeyBackend::File => {
            let path = key_store_path(root);
            if path.exists() {
                return Err(anyhow!("vault already exists at {}", root.display()));
            }
            let password = prompt_password_twice("Create vault password: ")?;
            Box::new(EncryptedFileStore::create_new(&path, &password)?)
        }
        KeyBackend::Keyring(profile) => Box::new(KeyringStore::new(profile.clone())),
    };
    let settings = load_settings(keys.as_ref())?;
    save_settings(keys.as_ref(), &settings)?;
    let ctx = assemble(root, keys, settings)?;
    ctx.audit.append(
        "VAULT_INITIALISED",
        AuditSeverity::Info,
        serde_json::json!({ "root": root.display().to_string() }),
    )?;
    Ok(ctx)
}

/// Open an existing vault, prompting for the password when the keys live in
/// the sealed file.
pub fn open_vault(root: &Path, backend: &KeyBackend) -> Result<VaultContext> {
    let keys: Box<dyn KeyValueStore> = match backend {
        KeyBackend::File => {
            let path = key_store_path(root);
            if !path.exists() {
                return Err(anyhow!("vault missing at {}; run init first", root.display()));
            }
            let password = prompt_password_once("Vault password: ")?;
            Box::new(
                EncryptedFileStore::open(&path, &password).context("unlock vault key store")?,
            )
        }
        KeyBackend::Keyring(profile) => Box::new(KeyringStore::new(profile.clone())),
    };
    let settings = load_settings(keys.as_ref())?;
    assemble(root, keys, settings)
}

/// Open the vault for a command the owner issues. Counts as owner activity:
/// the idle clock restarts and inactivity warnings are withdrawn.
pub fn open_as_owner(root: &Path, backend: &KeyBackend, action: &str) -> Result<VaultContext> {
    let ctx = open_vault(root, backend)?;
    ctx.engine.record_activity_kind(Utc::now(), action)?;
    Ok(ctx)
}

fn assemble(
    root: &Path,
    keys: Box<dyn KeyValueStore>,
    settings: VaultSettings,
) -> Result<VaultContext> {
    let device_key = load_or_create_device_key(keys.as_ref())?;
    let signing_key = load_or_create_signing_key(keys.as_ref())?;
    let events = EventBus::new();
    let receiver = events.subscribe();
    let store = VaultStore::open(root, device_key, settings.chunk_size, events.clone())?;
    let engine = ReleaseEngine::open(&activity_path(root), &settings, events, Utc::now())?;
    let audit = AuditLog::open(
        audit_log_path(root),
        signing_key,
        bequest_core::audit::DEFAULT_MAX_BYTES,
    )?;
    Ok(VaultContext {
        root: root.to_path_buf(),
        keys,
        settings,
        store: Arc::new(store),
        engine: Arc::new(engine),
        audit: Arc::new(audit),
        events: receiver,
    })
}

impl VaultContext {
    /// Append every event published so far to the audit log.
    pub fn flush_audit(&mut self) -> Result<usize> {
        let mut recorded = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.audit.record(&event)?;
                    recorded += 1;
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "audit fell behind the event bus");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        debug!(recorded, "audit flushed");
        Ok(recorded)
    }

    /// Record events as they arrive until `shutdown` fires.
    pub fn spawn_audit_forwarder(
        &self,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let mut events = self.events.resubscribe();
        let audit = self.audit.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    received = events.recv() => received,
                };
                match event {
                    Ok(event) => {
                        if let Err(e) = audit.record(&event) {
                            warn!("audit append failed: {e:#}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "audit fell behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }
}

/// Token cancelled on Ctrl-C, for long file operations.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            child.cancel();
        }
    });
    token
}
