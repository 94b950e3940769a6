//! End-to-end inheritance scenarios.
//!
//! Tests cover:
//!  1. Import → configure → idle → tick → package → recover → decrypt
//!  2. Inactivity threshold: 31 idle days unlock, activity on day 29 holds
//!  3. Fixed unlock date in the past
//!  4. Recovery with too few shards never yields a key
//!  5. Events published along the way

use bequest_core::cipher::{Cipher, ExpectedChecksums};
use bequest_core::crypto::{generate_key, key_from_slice};
use bequest_core::events::{EventBus, VaultEvent};
use bequest_core::package::ShardPackage;
use bequest_core::recovery::{RecoveryManager, SessionStatus};
use bequest_core::release::{InheritancePlan, ReleaseEngine};
use bequest_core::settings::VaultSettings;
use bequest_core::store::VaultStore;
use bequest_core::{RecoveryError, ReleaseStatus};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fs;
use tempfile::{tempdir, TempDir};

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 6, 1, 8, 30, 0).unwrap() + Duration::days(n)
}

struct Vault {
    _dir: TempDir,
    store: VaultStore,
    engine: ReleaseEngine,
    events: EventBus,
}

fn vault() -> Vault {
    let dir = tempdir().unwrap();
    let events = EventBus::new();
    let settings = VaultSettings {
        chunk_size: 4096,
        ..VaultSettings::default()
    };
    let store =
        VaultStore::open(dir.path(), generate_key(), settings.chunk_size, events.clone()).unwrap();
    let engine = ReleaseEngine::open(
        &dir.path().join("activity.json"),
        &settings,
        events.clone(),
        day(0),
    )
    .unwrap();
    Vault {
        _dir: dir,
        store,
        engine,
        events,
    }
}

fn plan(inactivity_days: Option<u32>, unlock_date: Option<DateTime<Utc>>) -> InheritancePlan {
    InheritancePlan {
        beneficiary_id: "daughter".into(),
        witness_ids: vec!["lawyer".into(), "brother".into(), "friend".into()],
        unlock_date,
        inactivity_days,
    }
}

// ─── Test 1: full inheritance flow ──────────────────────────────────────────

#[test]
fn test_full_inheritance_flow() {
    let v = vault();
    let letter: Vec<u8> = b"The deed is in the blue folder. "
        .iter()
        .cycle()
        .take(10_000)
        .copied()
        .collect();
    let item = v
        .store
        .import_bytes("Letter", &letter, Some("letter.txt"))
        .unwrap();
    let configured = v
        .engine
        .configure_inheritance(&v.store, item.id, plan(Some(30), None), day(0))
        .unwrap();
    let required = configured.time_lock.as_ref().unwrap().required_shard_count;
    assert_eq!(required, 3);

    let report = v.engine.tick(&v.store, day(31)).unwrap();
    assert_eq!(report.unlocked, vec![item.id]);
    assert_eq!(report.notices[0].beneficiary_id, "daughter");

    // Beneficiary plus two witnesses send their shards as URIs.
    let uris: Vec<String> = [1u8, 3, 4]
        .iter()
        .map(|index| {
            v.engine
                .package_shard(&v.store, item.id, *index, None, day(31))
                .unwrap()
                .to_uri("bequest", *index == 3)
                .unwrap()
        })
        .collect();

    let manager = RecoveryManager::new();
    let session = manager.start("Letter", required).unwrap();
    for (i, uri) in uris.iter().enumerate() {
        let package = ShardPackage::from_uri(uri).unwrap();
        let status = manager.add_package(session, &package, day(32)).unwrap();
        let expected = if i == 2 {
            SessionStatus::Ready
        } else {
            SessionStatus::Collecting
        };
        assert_eq!(status, expected);
    }
    let recovered = manager.complete(session).unwrap();
    let key = key_from_slice(&recovered).unwrap();

    // The beneficiary decrypts the blob with nothing but the recovered key
    // and the catalog checksum.
    let item = v.store.get(item.id).unwrap();
    let blob = fs::read(v.store.blob_path(&item)).unwrap();
    let plaintext =
        Cipher::decrypt_bytes(&key, &blob, &ExpectedChecksums::plaintext(&item.metadata.checksum))
            .unwrap();
    assert_eq!(plaintext.as_slice(), letter.as_slice());

    let lock = item.time_lock.unwrap();
    assert_eq!(lock.status, ReleaseStatus::Unlocked);
    assert_eq!(
        lock.shards.iter().filter(|s| s.distributed_at.is_some()).count(),
        3
    );
    v.engine.mark_released(&v.store, item.id).unwrap();
}

// ─── Test 2: inactivity threshold ───────────────────────────────────────────

#[test]
fn test_thirty_one_idle_days_unlock() {
    let v = vault();
    let id = v.store.import_bytes("a", b"a", None).unwrap().id;
    v.engine
        .configure_inheritance(&v.store, id, plan(Some(30), None), day(0))
        .unwrap();
    for d in 1..=31 {
        v.engine.tick(&v.store, day(d)).unwrap();
    }
    let status = v.store.get(id).unwrap().time_lock.unwrap().status;
    assert_eq!(status, ReleaseStatus::Unlocked);
}

#[test]
fn test_activity_on_day_29_holds_lock_past_day_31() {
    let v = vault();
    let id = v.store.import_bytes("a", b"a", None).unwrap().id;
    v.engine
        .configure_inheritance(&v.store, id, plan(Some(30), None), day(0))
        .unwrap();
    for d in 1..=35 {
        if d == 29 {
            v.engine.record_activity(day(d)).unwrap();
        }
        v.engine.tick(&v.store, day(d)).unwrap();
    }
    let status = v.store.get(id).unwrap().time_lock.unwrap().status;
    assert_eq!(status, ReleaseStatus::Locked);
}

// ─── Test 3: fixed unlock date ──────────────────────────────────────────────

#[test]
fn test_past_unlock_date_unlocks_on_next_tick() {
    let v = vault();
    let id = v.store.import_bytes("a", b"a", None).unwrap().id;
    v.engine
        .configure_inheritance(&v.store, id, plan(None, Some(day(-3))), day(0))
        .unwrap();
    assert_eq!(
        v.store.get(id).unwrap().time_lock.unwrap().status,
        ReleaseStatus::Locked
    );
    v.engine.tick(&v.store, day(0)).unwrap();
    assert_eq!(
        v.store.get(id).unwrap().time_lock.unwrap().status,
        ReleaseStatus::Unlocked
    );
}

// ─── Test 4: insufficient shards ────────────────────────────────────────────

#[test]
fn test_two_shards_cannot_recover_three_of_four() {
    let v = vault();
    let id = v.store.import_bytes("a", b"secret", None).unwrap().id;
    v.engine
        .configure_inheritance(&v.store, id, plan(Some(1), None), day(0))
        .unwrap();
    v.engine.tick(&v.store, day(2)).unwrap();

    let manager = RecoveryManager::new();
    let session = manager.start("a", 3).unwrap();
    for index in [2u8, 4] {
        let pkg = v
            .engine
            .package_shard(&v.store, id, index, None, day(2))
            .unwrap();
        manager.add_package(session, &pkg, day(2)).unwrap();
    }
    assert_eq!(
        manager.complete(session).unwrap_err(),
        RecoveryError::InsufficientShares { have: 2, need: 3 }
    );
    assert_eq!(
        manager.summary(session).unwrap().status,
        SessionStatus::Collecting
    );
}

// ─── Test 5: events ─────────────────────────────────────────────────────────

#[test]
fn test_events_follow_the_lifecycle() {
    let v = vault();
    let mut rx = v.events.subscribe();
    let id = v.store.import_bytes("a", b"a", None).unwrap().id;
    v.engine
        .configure_inheritance(&v.store, id, plan(Some(2), None), day(0))
        .unwrap();
    v.engine.tick(&v.store, day(3)).unwrap();

    let mut labels = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let VaultEvent::StatusChanged { from, to, .. } = &event {
            assert_eq!((*from, *to), (ReleaseStatus::Locked, ReleaseStatus::Unlocked));
        }
        labels.push(event.label());
    }
    assert_eq!(labels.first(), Some(&"ITEM_IMPORTED"));
    assert!(labels.contains(&"INHERITANCE_CONFIGURED"));
    assert_eq!(labels.last(), Some(&"STATUS_CHANGED"));
}
