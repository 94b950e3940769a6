//! The vault catalog: encrypted items, their metadata and blob files.
//!
//! Layout under the vault root:
//!
//! ```text
//! catalog.json        whole-document catalog, rewritten atomically
//! blobs/<id>.blob     one sealed blob per item (see `cipher`)
//! ```
//!
//! Every mutation works on a copy of the catalog, persists the copy and only
//! then swaps it in, so a failed write leaves both disk and memory unchanged.

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cipher::{Cipher, ExpectedChecksums, SealedOutput};
use crate::crypto::{self, SymmetricKey, KEY_LEN};
use crate::error::StoreError;
use crate::events::{EventBus, VaultEvent};
use crate::fs_util::{cleanup_staging, restrict_dir_permissions, write_atomic};
use crate::models::{
    AccessControl, ContentType, TimeLockConfig, VaultItem, VaultMetadata, ALGORITHM_ID,
    CURRENT_KEY_VERSION,
};
use crate::paths;

pub const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: u32,
    pub items: Vec<VaultItem>,
}

impl Default for CatalogDocument {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            items: Vec::new(),
        }
    }
}

pub struct VaultStore {
    root: PathBuf,
    device_key: SymmetricKey,
    cipher: Cipher,
    catalog: RwLock<CatalogDocument>,
    events: EventBus,
}

impl VaultStore {
    /// Open (or initialise) the vault rooted at `root`.
    pub fn open<P: AsRef<Path>>(
        root: P,
        device_key: SymmetricKey,
        chunk_size: usize,
        events: EventBus,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let blobs = paths::blobs_dir(&root);
        fs::create_dir_all(&blobs)?;
        restrict_dir_permissions(&root);
        cleanup_staging(&root);
        cleanup_staging(&blobs);

        let catalog = load_catalog(&paths::catalog_path(&root))?;
        info!(
            root = %root.display(),
            items = catalog.items.len(),
            "vault catalog loaded"
        );
        Ok(Self {
            root,
            device_key,
            cipher: Cipher::new(chunk_size),
            catalog: RwLock::new(catalog),
            events,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn device_key(&self) -> &[u8; KEY_LEN] {
        &self.device_key
    }

    pub fn blob_path(&self, item: &VaultItem) -> PathBuf {
        paths::blobs_dir(&self.root).join(&item.ciphertext_file)
    }

    pub fn list(&self) -> Vec<VaultItem> {
        self.catalog.read().items.clone()
    }

    pub fn get(&self, id: Uuid) -> Result<VaultItem, StoreError> {
        self.catalog
            .read()
            .items
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| StoreError::ItemNotFound(id.to_string()))
    }

    pub fn search(&self, query: &str) -> Vec<VaultItem> {
        self.catalog
            .read()
            .items
            .iter()
            .filter(|i| i.matches(query))
            .cloned()
            .collect()
    }

    pub fn import_bytes(
        &self,
        name: &str,
        data: &[u8],
        source: Option<&str>,
    ) -> Result<VaultItem, StoreError> {
        let id = Uuid::new_v4();
        let item_key = crypto::generate_key();
        let (blob, sealed) = self.cipher.encrypt_bytes(&item_key, data)?;
        let blob_name = blob_file_name(id);
        let blob_path = paths::blobs_dir(&self.root).join(&blob_name);
        write_atomic(&blob_path, &blob)?;
        self.register(id, name, source, &item_key, blob_name, sealed)
    }

    /// Encrypt the file at `path` into the vault. The display name and the
    /// source label are the file name.
    pub async fn import_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<VaultItem, StoreError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        let id = Uuid::new_v4();
        let item_key = crypto::generate_key();
        let blob_name = blob_file_name(id);
        let blob_path = paths::blobs_dir(&self.root).join(&blob_name);
        let sealed = self
            .cipher
            .encrypt_file(&item_key, path, &blob_path, cancel)
            .await?;
        self.register(id, &name, Some(&name), &item_key, blob_name, sealed)
    }

    fn register(
        &self,
        id: Uuid,
        name: &str,
        source: Option<&str>,
        item_key: &[u8; KEY_LEN],
        blob_name: String,
        sealed: SealedOutput,
    ) -> Result<VaultItem, StoreError> {
        let blob_path = paths::blobs_dir(&self.root).join(&blob_name);
        let wrapped = match crypto::wrap_key(&self.device_key, item_key, id.as_bytes()) {
            Some(w) => w,
            None => {
                let _ = fs::remove_file(&blob_path);
                return Err(StoreError::KeyUnwrap(id.to_string()));
            }
        };
        let now = Utc::now();
        let classify_from = source.unwrap_or(name);
        let item = VaultItem {
            id,
            name: name.to_string(),
            size: sealed.plaintext_len,
            created_at: now,
            updated_at: now,
            tags: BTreeSet::new(),
            access_control: AccessControl::Private,
            time_lock: None,
            ciphertext_file: blob_name,
            source: source.map(str::to_string),
            metadata: VaultMetadata {
                checksum: sealed.plaintext_checksum,
                ciphertext_checksum: sealed.ciphertext_checksum,
                algorithm: ALGORITHM_ID.to_string(),
                key_version: CURRENT_KEY_VERSION,
                content_type: ContentType::classify(classify_from),
                wrapped_key: general_purpose::STANDARD.encode(wrapped),
                chunk_size: self.cipher.chunk_size() as u32,
                custom: BTreeMap::new(),
            },
        };

        let mut catalog = self.catalog.write();
        let mut next = catalog.clone();
        next.items.push(item.clone());
        if let Err(e) = self.persist(&next) {
            let _ = fs::remove_file(&blob_path);
            return Err(e);
        }
        *catalog = next;
        drop(catalog);

        info!(item_id = %id, size = item.size, "imported item");
        self.events.publish(VaultEvent::ItemImported {
            item_id: id,
            name: item.name.clone(),
            size: item.size,
        });
        Ok(item)
    }

    /// Decrypt an item into memory after verifying both checksums.
    pub fn export(&self, id: Uuid) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let item = self.get(id)?;
        let key = self.item_key(id)?;
        let blob = fs::read(self.blob_path(&item))?;
        let expected = ExpectedChecksums::both(
            &item.metadata.checksum,
            &item.metadata.ciphertext_checksum,
        );
        let plaintext = Cipher::decrypt_bytes(&key, &blob, &expected)?;
        debug!(item_id = %id, "exported item to memory");
        Ok(plaintext)
    }

    pub async fn export_to_file(
        &self,
        id: Uuid,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let item = self.get(id)?;
        let key = self.item_key(id)?;
        let expected = ExpectedChecksums::both(
            &item.metadata.checksum,
            &item.metadata.ciphertext_checksum,
        );
        let written =
            Cipher::decrypt_file(&key, &self.blob_path(&item), dest, &expected, cancel).await?;
        info!(item_id = %id, dest = %dest.display(), "exported item to file");
        Ok(written)
    }

    /// Unwrap the item key under the device key.
    pub fn item_key(&self, id: Uuid) -> Result<SymmetricKey, StoreError> {
        let item = self.get(id)?;
        let wrapped = general_purpose::STANDARD
            .decode(&item.metadata.wrapped_key)
            .map_err(|_| StoreError::KeyUnwrap(id.to_string()))?;
        crypto::unwrap_key(&self.device_key, &wrapped, id.as_bytes())
            .ok_or_else(|| StoreError::KeyUnwrap(id.to_string()))
    }

    pub fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut catalog = self.catalog.write();
        let mut next = catalog.clone();
        let pos = next
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| StoreError::ItemNotFound(id.to_string()))?;
        let removed = next.items.remove(pos);
        self.persist(&next)?;
        *catalog = next;
        drop(catalog);

        // Catalog first: a crash here leaves an orphan blob, never a dangling entry.
        match fs::remove_file(self.blob_path(&removed)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(item_id = %id, "blob removal failed: {}", e),
        }
        info!(item_id = %id, "deleted item");
        self.events.publish(VaultEvent::ItemDeleted { item_id: id });
        Ok(())
    }

    pub fn rename(&self, id: Uuid, name: &str) -> Result<VaultItem, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidName("name cannot be empty".into()));
        }
        self.mutate(id, |item| {
            item.name = name.to_string();
            Ok(())
        })
    }

    pub fn set_tags<I, S>(&self, id: Uuid, tags: I) -> Result<VaultItem, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: BTreeSet<String> = tags
            .into_iter()
            .map(Into::into)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self.mutate(id, |item| {
            item.tags = tags;
            Ok(())
        })
    }

    pub fn add_tag(&self, id: Uuid, tag: &str) -> Result<VaultItem, StoreError> {
        let tag = tag.trim().to_string();
        self.mutate(id, |item| {
            if !tag.is_empty() {
                item.tags.insert(tag);
            }
            Ok(())
        })
    }

    pub fn remove_tag(&self, id: Uuid, tag: &str) -> Result<VaultItem, StoreError> {
        self.mutate(id, |item| {
            item.tags.remove(tag.trim());
            Ok(())
        })
    }

    pub fn update_access_control(
        &self,
        id: Uuid,
        access: AccessControl,
    ) -> Result<VaultItem, StoreError> {
        self.mutate(id, |item| {
            if access == AccessControl::TimeLocked && !item.time_lock_enabled() {
                return Err(StoreError::InvalidAccessControl(
                    "timeLocked requires an enabled time lock".into(),
                ));
            }
            item.access_control = access;
            Ok(())
        })
    }

    /// Replace the item's time lock. Clearing or disabling the lock on a
    /// `timeLocked` item drops its access control back to `private`.
    pub fn update_time_lock(
        &self,
        id: Uuid,
        time_lock: Option<TimeLockConfig>,
    ) -> Result<VaultItem, StoreError> {
        if let Some(config) = time_lock.as_ref().filter(|c| c.enabled) {
            config.validate().map_err(StoreError::InvalidTimeLock)?;
        }
        self.mutate(id, |item| {
            item.time_lock = time_lock;
            if item.access_control == AccessControl::TimeLocked && !item.time_lock_enabled() {
                item.access_control = AccessControl::Private;
            }
            Ok(())
        })
    }

    /// Apply `f` to the time lock and access control together; used by the
    /// release engine so both land in one catalog write.
    pub(crate) fn update_item<F>(&self, id: Uuid, f: F) -> Result<VaultItem, StoreError>
    where
        F: FnOnce(&mut VaultItem) -> Result<(), StoreError>,
    {
        self.mutate(id, |item| {
            f(item)?;
            if let Some(config) = item.time_lock.as_ref().filter(|c| c.enabled) {
                config.validate().map_err(StoreError::InvalidTimeLock)?;
            }
            if item.access_control == AccessControl::TimeLocked && !item.time_lock_enabled() {
                return Err(StoreError::InvalidAccessControl(
                    "timeLocked requires an enabled time lock".into(),
                ));
            }
            Ok(())
        })
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> Result<VaultItem, StoreError>
    where
        F: FnOnce(&mut VaultItem) -> Result<(), StoreError>,
    {
        let mut catalog = self.catalog.write();
        let mut next = catalog.clone();
        let item = next
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::ItemNotFound(id.to_string()))?;
        f(item)?;
        item.updated_at = Utc::now();
        let updated = item.clone();
        self.persist(&next)?;
        *catalog = next;
        drop(catalog);

        debug!(item_id = %id, "item updated");
        self.events.publish(VaultEvent::ItemUpdated { item_id: id });
        Ok(updated)
    }

    fn persist(&self, doc: &CatalogDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        write_atomic(&paths::catalog_path(&self.root), &bytes)?;
        Ok(())
    }
}

fn blob_file_name(id: Uuid) -> String {
    format!("{id}.blob")
}

fn load_catalog(path: &Path) -> Result<CatalogDocument, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CatalogDocument::default()),
        Err(e) => return Err(e.into()),
    };
    let doc: CatalogDocument =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::CatalogCorrupt(e.to_string()))?;
    if doc.version > CATALOG_VERSION {
        return Err(StoreError::CatalogCorrupt(format!(
            "unsupported catalog version {}",
            doc.version
        )));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReleaseStatus;
    use tempfile::tempdir;

    fn open_store(root: &Path, key: &SymmetricKey) -> VaultStore {
        VaultStore::open(root, key.clone(), 4096, EventBus::new()).unwrap()
    }

    fn time_lock() -> TimeLockConfig {
        TimeLockConfig {
            enabled: true,
            unlock_date: None,
            inactivity_days: Some(30),
            beneficiary_id: Some("heir".into()),
            witness_ids: vec!["w1".into()],
            status: ReleaseStatus::Locked,
            shards: vec![
                crate::models::EncryptedKeyShard {
                    index: 1,
                    payload: String::new(),
                    recipient_id: "heir".into(),
                    distributed_at: None,
                    acknowledged_at: None,
                },
                crate::models::EncryptedKeyShard {
                    index: 2,
                    payload: String::new(),
                    recipient_id: "w1".into(),
                    distributed_at: None,
                    acknowledged_at: None,
                },
            ],
            required_shard_count: 2,
            unlocked_at: None,
        }
    }

    #[test]
    fn import_export_roundtrip() {
        let dir = tempdir().unwrap();
        let key = crypto::generate_key();
        let store = open_store(dir.path(), &key);
        let item = store
            .import_bytes("letter.txt", b"to my family", Some("letter.txt"))
            .unwrap();
        assert_eq!(item.size, 12);
        assert_eq!(item.metadata.content_type, ContentType::Text);
        assert_eq!(item.metadata.checksum, crypto::sha256_hex(b"to my family"));
        assert!(store.blob_path(&item).exists());
        assert_eq!(store.export(item.id).unwrap().as_slice(), b"to my family");
    }

    #[test]
    fn catalog_survives_reopen() {
        let dir = tempdir().unwrap();
        let key = crypto::generate_key();
        let id = {
            let store = open_store(dir.path(), &key);
            let item = store.import_bytes("deed.pdf", b"deed", None).unwrap();
            store.set_tags(item.id, ["legal", "house"]).unwrap();
            item.id
        };
        let store = open_store(dir.path(), &key);
        let item = store.get(id).unwrap();
        assert!(item.tags.contains("legal"));
        assert_eq!(store.export(id).unwrap().as_slice(), b"deed");
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &crypto::generate_key());
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id), Err(StoreError::ItemNotFound(_))));
        assert!(matches!(store.delete(id), Err(StoreError::ItemNotFound(_))));
        assert!(matches!(store.rename(id, "x"), Err(StoreError::ItemNotFound(_))));
        assert!(matches!(store.export(id), Err(StoreError::ItemNotFound(_))));
    }

    #[test]
    fn delete_removes_blob_and_entry() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &crypto::generate_key());
        let item = store.import_bytes("a.bin", b"abc", None).unwrap();
        let blob = store.blob_path(&item);
        store.delete(item.id).unwrap();
        assert!(!blob.exists());
        assert!(store.list().is_empty());
    }

    #[test]
    fn search_matches_name_tags_and_source() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &crypto::generate_key());
        let a = store.import_bytes("Passwords", b"1", Some("vault.kdbx")).unwrap();
        let b = store.import_bytes("Photo", b"2", None).unwrap();
        store.add_tag(b.id, "Family").unwrap();
        assert_eq!(store.search("pass").len(), 1);
        assert_eq!(store.search("KDBX")[0].id, a.id);
        assert_eq!(store.search("family")[0].id, b.id);
        assert_eq!(store.search("").len(), 2);
        store.remove_tag(b.id, "Family").unwrap();
        assert!(store.search("family").is_empty());
    }

    #[test]
    fn time_locked_access_requires_enabled_lock() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &crypto::generate_key());
        let item = store.import_bytes("will.pdf", b"will", None).unwrap();
        assert!(matches!(
            store.update_access_control(item.id, AccessControl::TimeLocked),
            Err(StoreError::InvalidAccessControl(_))
        ));
        store.update_time_lock(item.id, Some(time_lock())).unwrap();
        let updated = store
            .update_access_control(item.id, AccessControl::TimeLocked)
            .unwrap();
        assert_eq!(updated.access_control, AccessControl::TimeLocked);

        let cleared = store.update_time_lock(item.id, None).unwrap();
        assert_eq!(cleared.access_control, AccessControl::Private);
    }

    #[test]
    fn invalid_time_lock_is_rejected_without_mutation() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &crypto::generate_key());
        let item = store.import_bytes("will.pdf", b"will", None).unwrap();
        let mut config = time_lock();
        config.required_shard_count = 9;
        assert!(matches!(
            store.update_time_lock(item.id, Some(config)),
            Err(StoreError::InvalidTimeLock(_))
        ));
        assert!(store.get(item.id).unwrap().time_lock.is_none());
    }

    #[test]
    fn tampered_blob_fails_export() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &crypto::generate_key());
        let item = store.import_bytes("a.bin", b"some payload", None).unwrap();
        let path = store.blob_path(&item);
        let mut blob = fs::read(&path).unwrap();
        blob[20] ^= 1;
        fs::write(&path, blob).unwrap();
        assert!(matches!(store.export(item.id), Err(StoreError::Cipher(_))));
    }

    #[test]
    fn corrupt_catalog_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(paths::catalog_path(dir.path()), b"{not json").unwrap();
        let result = VaultStore::open(dir.path(), crypto::generate_key(), 4096, EventBus::new());
        assert!(matches!(result, Err(StoreError::CatalogCorrupt(_))));
    }

    #[test]
    fn item_key_needs_the_right_device_key() {
        let dir = tempdir().unwrap();
        let key = crypto::generate_key();
        let id = open_store(dir.path(), &key)
            .import_bytes("a", b"a", None)
            .unwrap()
            .id;
        let other = open_store(dir.path(), &crypto::generate_key());
        assert!(matches!(other.item_key(id), Err(StoreError::KeyUnwrap(_))));
    }

    #[tokio::test]
    async fn file_import_and_export() {
        let dir = tempdir().unwrap();
        let vault_root = dir.path().join("vault");
        let store = open_store(&vault_root, &crypto::generate_key());
        let src = dir.path().join("scan.png");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
        fs::write(&src, &data).unwrap();

        let token = CancellationToken::new();
        let item = store.import_file(&src, &token).await.unwrap();
        assert_eq!(item.name, "scan.png");
        assert_eq!(item.metadata.content_type, ContentType::Image);

        let out = dir.path().join("restored.png");
        let written = store.export_to_file(item.id, &out, &token).await.unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(fs::read(&out).unwrap(), data);
    }
}
