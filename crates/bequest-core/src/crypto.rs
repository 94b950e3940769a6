use argon2::{Argon2, Params};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::KeyStoreError;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

pub type SymmetricKey = Zeroizing<[u8; KEY_LEN]>;

pub fn derive_key(password: &str, salt: &[u8]) -> Result<SymmetricKey, KeyStoreError> {
    derive_key_with(password, salt, KDF_MEMORY_COST, KDF_TIME_COST, KDF_PARALLELISM)
}

pub fn derive_key_with(
    password: &str,
    salt: &[u8],
    memory_cost: u32,
    time_cost: u32,
    parallelism: u32,
) -> Result<SymmetricKey, KeyStoreError> {
    let params = Params::new(memory_cost, time_cost, parallelism, Some(KEY_LEN))
        .map_err(|e| KeyStoreError::Backend(format!("argon2 params: {e}")))?;
    let argon = Argon2::from(params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| KeyStoreError::Backend(format!("argon2 derive: {e}")))?;
    Ok(key)
}

pub fn generate_key() -> SymmetricKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Seal `plaintext` as `nonce || ciphertext || tag` with a fresh nonce.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = generate_nonce();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .ok()?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Some(out)
}

/// Open a blob produced by [`seal`]. `None` on tag mismatch or truncation.
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8], aad: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .ok()
        .map(Zeroizing::new)
}

/// Encrypt an item key under the device key.
pub fn wrap_key(wrapping: &[u8; KEY_LEN], key: &[u8; KEY_LEN], context: &[u8]) -> Option<Vec<u8>> {
    seal(wrapping, key, context)
}

pub fn unwrap_key(wrapping: &[u8; KEY_LEN], wrapped: &[u8], context: &[u8]) -> Option<SymmetricKey> {
    let plaintext = open(wrapping, wrapped, context)?;
    key_from_slice(&plaintext)
}

pub fn key_from_slice(bytes: &[u8]) -> Option<SymmetricKey> {
    if bytes.len() != KEY_LEN {
        return None;
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(bytes);
    Some(key)
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_key();
        let sealed = seal(&key, b"payload", b"ctx").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 7 + TAG_LEN);
        assert_eq!(open(&key, &sealed, b"ctx").unwrap().as_slice(), b"payload");
    }

    #[test]
    fn open_rejects_wrong_context_and_key() {
        let key = generate_key();
        let sealed = seal(&key, b"payload", b"ctx").unwrap();
        assert!(open(&key, &sealed, b"other").is_none());
        assert!(open(&generate_key(), &sealed, b"ctx").is_none());
        assert!(open(&key, &sealed[..10], b"ctx").is_none());
    }

    #[test]
    fn wrapped_key_unwraps() {
        let device = generate_key();
        let item = generate_key();
        let wrapped = wrap_key(&device, &item, b"item-1").unwrap();
        let unwrapped = unwrap_key(&device, &wrapped, b"item-1").unwrap();
        assert_eq!(*unwrapped, *item);
        assert!(unwrap_key(&device, &wrapped, b"item-2").is_none());
    }

    #[test]
    fn sha256_hex_is_lowercase() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn derived_keys_depend_on_salt() {
        let a = derive_key_with("pw", &[1u8; 16], 1024, 1, 1).unwrap();
        let b = derive_key_with("pw", &[2u8; 16], 1024, 1, 1).unwrap();
        assert_ne!(*a, *b);
    }
}
