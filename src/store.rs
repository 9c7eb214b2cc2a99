//! Shared item store.
//!
//! The store is the only coordination channel between the capture and
//! compression stages. `ItemStore` is the inspection/mutation interface both
//! stages use; `FsStore` is the directory-per-item layout on disk and
//! `InMemoryStore` is the same contract without I/O.
//!
//! Write-once rules enforced by every implementation:
//! - `create_item` is exclusive;
//! - `remove_item` only discards an Item the compression stage has not
//!   produced anything for;
//! - an original can only be written into an Item that has neither an
//!   original nor a derived artifact, so a `derived-present-only` Item never
//!   regains its original.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::item::{ItemId, DERIVED_FILE, ORIGINAL_FILE};

pub trait ItemStore: Send + Sync {
    /// All Item identifiers in the store, ascending.
    fn list_items(&self) -> Result<Vec<ItemId>>;

    /// Create an empty Item. Fails if the Item already exists.
    fn create_item(&self, id: &ItemId) -> Result<()>;

    /// Write the original artifact and return its stored size in bytes.
    fn write_original(&self, id: &ItemId, bytes: &[u8]) -> Result<u64>;

    /// Size of the original artifact, `None` when absent.
    fn original_len(&self, id: &ItemId) -> Result<Option<u64>>;

    fn read_original(&self, id: &ItemId) -> Result<Vec<u8>>;

    fn remove_original(&self, id: &ItemId) -> Result<()>;

    /// Size of the derived artifact, `None` when absent.
    fn derived_len(&self, id: &ItemId) -> Result<Option<u64>>;

    fn write_derived(&self, id: &ItemId, bytes: &[u8]) -> Result<u64>;

    /// Delete an Item whose original was never committed. Refuses Items that
    /// already carry a derived artifact.
    fn remove_item(&self, id: &ItemId) -> Result<()>;

    /// Recursive byte size of everything in the store.
    fn total_bytes(&self) -> Result<u64>;
}

// ----------------------------------------------------------------------------
// Filesystem store
// ----------------------------------------------------------------------------

/// Directory-per-item store rooted at a local path.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open the store, creating the root directory if it does not exist.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create store dir {}", root.display()))?;
        Ok(Self { root })
    }

    /// Open an existing store without creating anything.
    pub fn open_existing<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(anyhow!("store dir {} does not exist", root.display()));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_dir(&self, id: &ItemId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn file_len(path: &Path) -> Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow!("failed to stat {}: {}", path.display(), e)),
        }
    }

    fn write_new(path: &Path, bytes: &[u8]) -> Result<u64> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }
}

fn dir_size(path: &Path) -> Result<u64> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        // Items can be removed concurrently; a vanished directory is empty.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(anyhow!("failed to read {}: {}", path.display(), e)),
    };
    let mut total = 0u64;
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    Ok(total)
}

impl ItemStore for FsStore {
    fn list_items(&self) -> Result<Vec<ItemId>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to list store {}", self.root.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(id) = ItemId::parse(name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn create_item(&self, id: &ItemId) -> Result<()> {
        let dir = self.item_dir(id);
        fs::create_dir(&dir).map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                anyhow!("item {} already exists", id)
            } else {
                anyhow!("failed to create item dir {}: {}", dir.display(), e)
            }
        })
    }

    fn write_original(&self, id: &ItemId, bytes: &[u8]) -> Result<u64> {
        let dir = self.item_dir(id);
        if Self::file_len(&dir.join(DERIVED_FILE))?.is_some() {
            return Err(anyhow!("item {} is already processed", id));
        }
        Self::write_new(&dir.join(ORIGINAL_FILE), bytes)
    }

    fn original_len(&self, id: &ItemId) -> Result<Option<u64>> {
        Self::file_len(&self.item_dir(id).join(ORIGINAL_FILE))
    }

    fn read_original(&self, id: &ItemId) -> Result<Vec<u8>> {
        let path = self.item_dir(id).join(ORIGINAL_FILE);
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn remove_original(&self, id: &ItemId) -> Result<()> {
        let path = self.item_dir(id).join(ORIGINAL_FILE);
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))
    }

    fn derived_len(&self, id: &ItemId) -> Result<Option<u64>> {
        Self::file_len(&self.item_dir(id).join(DERIVED_FILE))
    }

    fn write_derived(&self, id: &ItemId, bytes: &[u8]) -> Result<u64> {
        Self::write_new(&self.item_dir(id).join(DERIVED_FILE), bytes)
    }

    fn remove_item(&self, id: &ItemId) -> Result<()> {
        let dir = self.item_dir(id);
        if Self::file_len(&dir.join(DERIVED_FILE))?.is_some() {
            return Err(anyhow!("item {} is already processed", id));
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!("failed to remove item dir {}: {}", dir.display(), e)),
        }
    }

    fn total_bytes(&self) -> Result<u64> {
        dir_size(&self.root)
    }
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
struct InMemoryItem {
    original: Option<Vec<u8>>,
    derived: Option<Vec<u8>>,
}

/// Store without I/O. Same write-once contract as `FsStore`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: Mutex<BTreeMap<ItemId, InMemoryItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_items<T>(&self, f: impl FnOnce(&mut BTreeMap<ItemId, InMemoryItem>) -> T) -> T {
        let mut items = self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut items)
    }

    /// Replace the original bytes of an existing Item, bypassing the
    /// write-once check. Simulates a writer that is still mid-write.
    pub fn set_original_in_progress(&self, id: &ItemId, bytes: &[u8]) -> Result<()> {
        self.with_items(|items| {
            let item = items
                .get_mut(id)
                .ok_or_else(|| anyhow!("item {} not found", id))?;
            item.original = Some(bytes.to_vec());
            Ok(())
        })
    }
}

impl ItemStore for InMemoryStore {
    fn list_items(&self) -> Result<Vec<ItemId>> {
        Ok(self.with_items(|items| items.keys().cloned().collect()))
    }

    fn create_item(&self, id: &ItemId) -> Result<()> {
        self.with_items(|items| {
            if items.contains_key(id) {
                return Err(anyhow!("item {} already exists", id));
            }
            items.insert(id.clone(), InMemoryItem::default());
            Ok(())
        })
    }

    fn write_original(&self, id: &ItemId, bytes: &[u8]) -> Result<u64> {
        self.with_items(|items| {
            let item = items
                .get_mut(id)
                .ok_or_else(|| anyhow!("item {} not found", id))?;
            if item.derived.is_some() {
                return Err(anyhow!("item {} is already processed", id));
            }
            if item.original.is_some() {
                return Err(anyhow!("item {} already has an original", id));
            }
            item.original = Some(bytes.to_vec());
            Ok(bytes.len() as u64)
        })
    }

    fn original_len(&self, id: &ItemId) -> Result<Option<u64>> {
        Ok(self.with_items(|items| {
            items
                .get(id)
                .and_then(|item| item.original.as_ref())
                .map(|bytes| bytes.len() as u64)
        }))
    }

    fn read_original(&self, id: &ItemId) -> Result<Vec<u8>> {
        self.with_items(|items| {
            items
                .get(id)
                .and_then(|item| item.original.clone())
                .ok_or_else(|| anyhow!("item {} has no original", id))
        })
    }

    fn remove_original(&self, id: &ItemId) -> Result<()> {
        self.with_items(|items| {
            items
                .get_mut(id)
                .and_then(|item| item.original.take())
                .map(|_| ())
                .ok_or_else(|| anyhow!("item {} has no original", id))
        })
    }

    fn derived_len(&self, id: &ItemId) -> Result<Option<u64>> {
        Ok(self.with_items(|items| {
            items
                .get(id)
                .and_then(|item| item.derived.as_ref())
                .map(|bytes| bytes.len() as u64)
        }))
    }

    fn write_derived(&self, id: &ItemId, bytes: &[u8]) -> Result<u64> {
        self.with_items(|items| {
            let item = items
                .get_mut(id)
                .ok_or_else(|| anyhow!("item {} not found", id))?;
            if item.derived.is_some() {
                return Err(anyhow!("item {} already has a derived artifact", id));
            }
            item.derived = Some(bytes.to_vec());
            Ok(bytes.len() as u64)
        })
    }

    fn remove_item(&self, id: &ItemId) -> Result<()> {
        self.with_items(|items| {
            if items.get(id).is_some_and(|item| item.derived.is_some()) {
                return Err(anyhow!("item {} is already processed", id));
            }
            items.remove(id);
            Ok(())
        })
    }

    fn total_bytes(&self) -> Result<u64> {
        Ok(self.with_items(|items| {
            items
                .values()
                .map(|item| {
                    item.original.as_ref().map_or(0, |b| b.len() as u64)
                        + item.derived.as_ref().map_or(0, |b| b.len() as u64)
                })
                .sum()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ItemId {
        ItemId::parse(name).unwrap()
    }

    fn exercise_lifecycle(store: &dyn ItemStore) {
        let a = id("2026-01-01_00-00-00.000001");
        store.create_item(&a).unwrap();
        assert!(store.create_item(&a).is_err(), "create must be exclusive");
        assert_eq!(store.original_len(&a).unwrap(), None);

        let size = store.write_original(&a, b"original-bytes").unwrap();
        assert_eq!(size, 14);
        assert_eq!(store.original_len(&a).unwrap(), Some(14));
        assert!(store.write_original(&a, b"again").is_err());

        store.write_derived(&a, b"derived").unwrap();
        store.remove_original(&a).unwrap();
        assert_eq!(store.original_len(&a).unwrap(), None);
        assert_eq!(store.derived_len(&a).unwrap(), Some(7));
        assert_eq!(store.total_bytes().unwrap(), 7);

        // derived-present-only never regains an original.
        assert!(store.write_original(&a, b"resurrected").is_err());
        assert_eq!(store.original_len(&a).unwrap(), None);

        // A processed Item cannot be discarded; an uncommitted one can.
        assert!(store.remove_item(&a).is_err());
        let b = id("2026-01-01_00-00-00.000002");
        store.create_item(&b).unwrap();
        store.remove_item(&b).unwrap();
        assert_eq!(store.list_items().unwrap(), vec![a.clone()]);
        // Removing twice is harmless.
        store.remove_item(&b).unwrap();
    }

    #[test]
    fn in_memory_store_lifecycle() {
        exercise_lifecycle(&InMemoryStore::new());
    }

    #[test]
    fn fs_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().join("data")).unwrap();
        exercise_lifecycle(&store);
    }

    #[test]
    fn open_existing_does_not_create_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nowhere");
        assert!(FsStore::open_existing(&missing).is_err());
        assert!(!missing.exists());

        FsStore::open(&missing).unwrap();
        assert!(FsStore::open_existing(&missing).is_ok());
    }

    #[test]
    fn fs_store_lists_only_item_directories_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let later = id("2026-01-01_00-00-02.000000");
        let earlier = id("2026-01-01_00-00-01.000000");
        store.create_item(&later).unwrap();
        store.create_item(&earlier).unwrap();
        fs::create_dir(dir.path().join("scratch")).unwrap();
        fs::write(dir.path().join("2026-01-01_00-00-03.000000"), b"not a dir").unwrap();

        assert_eq!(store.list_items().unwrap(), vec![earlier, later]);
        // Stray files still count against the quota.
        assert_eq!(store.total_bytes().unwrap(), 9);
    }
}
