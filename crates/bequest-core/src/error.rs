use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("division by zero in prime field")]
    DivisionByZero,

    #[error("value is not a canonical field element")]
    OutOfRange,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShamirError {
    #[error("threshold must be at least 2")]
    ThresholdTooLow,

    #[error("threshold exceeds total shares")]
    ThresholdExceedsTotalShares,

    #[error("at most 255 shares are supported")]
    TooManyShares,

    #[error("secret exceeds 32 bytes")]
    SecretTooLarge,

    #[error("secret is empty")]
    EmptySecret,

    #[error("no shares supplied")]
    NoShares,

    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("shares come from different splits")]
    IncompatibleShares,

    #[error("share {0} failed checksum verification")]
    CorruptedShare(u8),

    #[error("share index {0} supplied twice")]
    DuplicateShare(u8),

    #[error("malformed share encoding: {0}")]
    Malformed(String),

    #[error(transparent)]
    Field(#[from] FieldError),
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("source is empty")]
    FileEmpty,

    #[error("cannot open file: {0}")]
    CannotOpenFile(String),

    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("AEAD decryption failed (wrong key or tampered ciphertext)")]
    DecryptionFailed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("malformed ciphertext blob: {0}")]
    MalformedBlob(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CipherError {
    fn from(e: std::io::Error) -> Self {
        CipherError::Io(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store backend failure: {0}")]
    Backend(String),

    #[error("stored key material invalid: {0}")]
    InvalidKey(String),

    #[error("key store is sealed with a different password or is corrupt")]
    Unseal,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("invalid access control: {0}")]
    InvalidAccessControl(String),

    #[error("invalid item name: {0}")]
    InvalidName(String),

    #[error("invalid time lock: {0}")]
    InvalidTimeLock(String),

    #[error("item key for {0} could not be unwrapped")]
    KeyUnwrap(String),

    #[error("catalog corrupt: {0}")]
    CatalogCorrupt(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("inheritance requires at least one witness")]
    NoWitnesses,

    #[error("inheritance requires an unlock date or an inactivity threshold")]
    NoTrigger,

    #[error("inactivity threshold must be at least one day")]
    InvalidInactivityDays,

    #[error("beneficiary {0} cannot also be a witness")]
    BeneficiaryIsWitness(String),

    #[error("duplicate witness: {0}")]
    DuplicateWitness(String),

    #[error("item {0} has no inheritance configured")]
    NotConfigured(String),

    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: crate::models::ReleaseStatus,
        to: crate::models::ReleaseStatus,
    },

    #[error("shards cannot leave the device while the item is {0:?}")]
    TransportNotAllowed(crate::models::ReleaseStatus),

    #[error("shard {0} not found")]
    ShardNotFound(u8),

    #[error("shard payload could not be opened")]
    ShardSeal,

    #[error("release state persistence failed: {0}")]
    Persist(String),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Shamir(#[from] ShamirError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("recovery session not found: {0}")]
    SessionNotFound(String),

    #[error("recovery session is not collecting shards")]
    SessionNotActive,

    #[error("shard {0} already collected")]
    DuplicateShard(u8),

    #[error("insufficient shards: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("recovery requires at least 2 shards")]
    InvalidRequirement,

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Shamir(#[from] ShamirError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PackageError {
    #[error("not a shard URI: {0}")]
    InvalidUri(String),

    #[error("unsupported package encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("package decode failed: {0}")]
    Decode(String),

    #[error("shard package {0} expired")]
    Expired(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PackageError {
    fn from(e: std::io::Error) -> Self {
        PackageError::Io(e.to_string())
    }
}
