//! Vault persistence and ambient plumbing across restarts.
//!
//! Tests cover:
//!  1. Catalog and inheritance state survive a reopen
//!  2. Device key round trip through the password-sealed key store
//!  3. Zero secret recovered from any three of five shares
//!  4. Cancelled import leaves neither blob nor catalog entry
//!  5. Bus events recorded into a verifiable audit chain

use bequest_core::audit::{AuditLog, DEFAULT_MAX_BYTES};
use bequest_core::crypto::generate_key;
use bequest_core::events::EventBus;
use bequest_core::keystore::{
    load_or_create_device_key, load_or_create_signing_key, EncryptedFileStore, KdfParams,
};
use bequest_core::paths;
use bequest_core::release::{InheritancePlan, ReleaseEngine};
use bequest_core::settings::VaultSettings;
use bequest_core::shamir;
use bequest_core::store::VaultStore;
use bequest_core::{CipherError, ReleaseStatus, StoreError};
use chrono::{Duration, Utc};
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tempfile::tempdir;

const PASSWORD: &str = "correct horse battery staple";

fn fast_kdf() -> KdfParams {
    KdfParams {
        time_cost: 1,
        memory_cost: 1024,
        parallelism: 1,
    }
}

fn blob_count(root: &Path) -> usize {
    fs::read_dir(paths::blobs_dir(root)).unwrap().count()
}

// ─── Test 1: reopen ─────────────────────────────────────────────────────────

#[test]
fn test_catalog_and_release_state_survive_reopen() {
    let dir = tempdir().unwrap();
    let device_key = generate_key();
    let settings = VaultSettings::default();
    let activity = paths::activity_path(dir.path());
    let start = Utc::now() - Duration::days(10);

    let id = {
        let store =
            VaultStore::open(dir.path(), device_key.clone(), 4096, EventBus::new()).unwrap();
        let engine = ReleaseEngine::open(&activity, &settings, EventBus::new(), start).unwrap();
        let id = store.import_bytes("will.pdf", b"%PDF-1.7", None).unwrap().id;
        store.add_tag(id, "legal").unwrap();
        engine
            .configure_inheritance(
                &store,
                id,
                InheritancePlan {
                    beneficiary_id: "spouse".into(),
                    witness_ids: vec!["notary".into(), "sister".into()],
                    unlock_date: None,
                    inactivity_days: Some(90),
                },
                start,
            )
            .unwrap();
        id
    };

    let store = VaultStore::open(dir.path(), device_key, 4096, EventBus::new()).unwrap();
    let engine = ReleaseEngine::open(&activity, &settings, EventBus::new(), Utc::now()).unwrap();

    let item = store.get(id).unwrap();
    assert!(item.tags.contains("legal"));
    assert_eq!(item.time_lock.unwrap().status, ReleaseStatus::Locked);
    assert_eq!(store.export(id).unwrap().as_slice(), b"%PDF-1.7");
    // The idle clock keeps counting from the first open.
    assert_eq!(engine.days_inactive(Utc::now()), 10);
}

// ─── Test 2: key store ──────────────────────────────────────────────────────

#[test]
fn test_device_key_persists_in_sealed_key_store() {
    let dir = tempdir().unwrap();
    let path = paths::key_store_path(dir.path());

    let first = {
        let keys = EncryptedFileStore::create_with_params(&path, PASSWORD, fast_kdf()).unwrap();
        load_or_create_signing_key(&keys).unwrap();
        load_or_create_device_key(&keys).unwrap()
    };

    let keys = EncryptedFileStore::open(&path, PASSWORD).unwrap();
    let second = load_or_create_device_key(&keys).unwrap();
    assert_eq!(first, second);

    assert!(EncryptedFileStore::open(&path, "wrong password").is_err());
}

// ─── Test 3: zero secret ────────────────────────────────────────────────────

#[test]
fn test_zero_secret_recovered_from_any_three() {
    let secret = [0u8; 32];
    let shares = shamir::split(&secret, 3, 5).unwrap();

    for picks in [[1usize, 3, 4], [0, 2, 4]] {
        let subset: Vec<_> = picks.iter().map(|i| shares[*i].clone()).collect();
        let recovered = shamir::combine(&subset).unwrap();
        assert_eq!(recovered.as_slice(), &secret);
    }
}

// ─── Test 4: cancellation ───────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_import_leaves_nothing_behind() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");
    let store = VaultStore::open(&vault, generate_key(), 4096, EventBus::new()).unwrap();
    let source = dir.path().join("photos.zip");
    fs::write(&source, vec![7u8; 64 * 1024]).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = store.import_file(&source, &cancel).await.unwrap_err();
    assert!(matches!(err, StoreError::Cipher(CipherError::Cancelled)));
    assert!(store.list().is_empty());
    assert_eq!(blob_count(&vault), 0);

    let item = store
        .import_file(&source, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(item.name, "photos.zip");
    assert_eq!(blob_count(&vault), 1);
}

// ─── Test 5: audit trail ────────────────────────────────────────────────────

#[test]
fn test_events_recorded_into_verifiable_audit_chain() {
    let dir = tempdir().unwrap();
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let store = VaultStore::open(dir.path(), generate_key(), 4096, events).unwrap();
    let id = store.import_bytes("a.txt", b"a", None).unwrap().id;
    store.rename(id, "b.txt").unwrap();
    store.delete(id).unwrap();

    let signer = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
    let audit = AuditLog::open(paths::audit_log_path(dir.path()), signer, DEFAULT_MAX_BYTES).unwrap();
    while let Ok(event) = rx.try_recv() {
        audit.record(&event).unwrap();
    }

    assert_eq!(audit.verify_chain().unwrap(), 3);
    let recent = audit.read_recent(None, Some(1)).unwrap();
    assert_eq!(recent[0].event_type, "ITEM_DELETED");
}
