//! bequest-core: encrypted vault with threshold-shared digital inheritance
//!
//! # Design principles
//! - No custom crypto; AEAD, KDF, hashing and signatures come from audited crates.
//! - Each item has its own key; only that key is ever split into shards.
//! - Secrets are zeroized on drop and never logged.
//! - Release conditions are evaluated by an explicit `tick`, never by a hidden timer.
//!
//! # Module layout
//! - `field`        arithmetic modulo the prime 2^256 + 297
//! - `shamir`       (k, n) secret sharing with per-share checksums
//! - `crypto`       XChaCha20-Poly1305 sealing, Argon2id, key wrapping
//! - `cipher`       chunked streaming AEAD for item payloads
//! - `keystore`     key-value storage for the device key and settings
//! - `store`        item catalog and blob files
//! - `inactivity`   owner activity tracking
//! - `release`      inheritance configuration and the release state machine
//! - `scheduler`    periodic release loop
//! - `package`      shard transport envelopes (URI / file)
//! - `recovery`     beneficiary-side shard collection and key reconstruction
//! - `events`       broadcast change notifications
//! - `audit`        hash-chained, signed audit trail

pub mod audit;
pub mod cipher;
pub mod crypto;
pub mod error;
pub mod events;
pub mod field;
mod fs_util;
pub mod inactivity;
pub mod keystore;
pub mod models;
pub mod package;
pub mod paths;
pub mod recovery;
pub mod release;
pub mod scheduler;
pub mod settings;
pub mod shamir;
pub mod store;

pub use error::{
    CipherError, FieldError, KeyStoreError, PackageError, RecoveryError, ReleaseError,
    ShamirError, StoreError,
};
pub use events::{EventBus, VaultEvent};
pub use models::{AccessControl, ReleaseStatus, VaultItem};
pub use package::ShardPackage;
pub use recovery::{RecoveryManager, RecoverySession, SessionStatus};
pub use release::{InheritancePlan, ReleaseEngine};
pub use settings::VaultSettings;
pub use store::VaultStore;
