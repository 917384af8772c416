//! Durable in-memory index of path -> (embedding, mtime), one map per modality.
//!
//! File format (`file_index.json`):
//!
//! ```json
//! {
//!   "text":   { "/abs/path/a.txt": { "embedding": [0.1, ...], "mtime": 1700000000.123 } },
//!   "images": { "/abs/path/b.png": { "embedding": [0.4, ...], "mtime": 1700000000.5 } }
//! }
//! ```
//!
//! Writers take the write lock only for a single upsert/remove. Readers copy a
//! modality's map of `Arc`s under the read lock, so a snapshot never observes
//! a half-written entry and a long pass never starves searches.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::semantic::index::{IndexEntry, Modality, Snapshot};
use crate::storage::StorageManager;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to persist index: {0}")]
    Persistence(#[source] std::io::Error),

    #[error("failed to encode index: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("index file is corrupt: {0}")]
    CorruptIndex(#[source] serde_json::Error),

    #[error("failed to read index: {0}")]
    Read(#[source] std::io::Error),
}

#[derive(Default)]
struct IndexData {
    text: Snapshot,
    images: Snapshot,
}

impl IndexData {
    fn map(&self, modality: Modality) -> &Snapshot {
        match modality {
            Modality::Text => &self.text,
            Modality::Image => &self.images,
        }
    }

    fn map_mut(&mut self, modality: Modality) -> &mut Snapshot {
        match modality {
            Modality::Text => &mut self.text,
            Modality::Image => &mut self.images,
        }
    }
}

/// Borrowed view used for writing; sorted keys keep the file diffable.
#[derive(Serialize)]
struct PersistedRef<'a> {
    text: BTreeMap<&'a str, &'a IndexEntry>,
    images: BTreeMap<&'a str, &'a IndexEntry>,
}

#[derive(Deserialize)]
struct Persisted {
    #[serde(default)]
    text: HashMap<String, IndexEntry>,
    #[serde(default)]
    images: HashMap<String, IndexEntry>,
}

impl From<Persisted> for IndexData {
    fn from(p: Persisted) -> Self {
        let wrap = |m: HashMap<String, IndexEntry>| -> Snapshot {
            m.into_iter().map(|(k, v)| (k, Arc::new(v))).collect()
        };
        IndexData {
            text: wrap(p.text),
            images: wrap(p.images),
        }
    }
}

pub struct IndexStore {
    storage: Arc<dyn StorageManager>,
    file_name: String,
    data: RwLock<IndexData>,
    /// Serializes whole-file writes
    save_lock: Mutex<()>,
}

impl IndexStore {
    /// Create an empty store backed by `file_name` inside `storage`.
    /// Nothing is read until [`IndexStore::load`] is called.
    pub fn new(storage: Arc<dyn StorageManager>, file_name: &str) -> Self {
        Self {
            storage,
            file_name: file_name.to_string(),
            data: RwLock::new(IndexData::default()),
            save_lock: Mutex::new(()),
        }
    }

    /// Create a store and load the persisted snapshot.
    pub fn open(storage: Arc<dyn StorageManager>, file_name: &str) -> Self {
        let store = Self::new(storage, file_name);
        store.load();
        store
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn get(&self, modality: Modality, path: &str) -> Option<Arc<IndexEntry>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.map(modality).get(path).cloned()
    }

    /// Insert or replace the entry for `path`.
    pub fn upsert(&self, modality: Modality, path: &str, entry: IndexEntry) {
        let entry = Arc::new(entry);
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.map_mut(modality).insert(path.to_string(), entry);
    }

    pub fn remove(&self, modality: Modality, path: &str) -> Option<Arc<IndexEntry>> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.map_mut(modality).remove(path)
    }

    /// Copy of the whole mapping for one modality.
    pub fn snapshot_all(&self, modality: Modality) -> Snapshot {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.map(modality).clone()
    }

    /// All indexed paths for one modality.
    pub fn paths(&self, modality: Modality) -> Vec<String> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.map(modality).keys().cloned().collect()
    }

    pub fn len(&self, modality: Modality) -> usize {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.map(modality).len()
    }

    pub fn is_empty(&self) -> bool {
        Modality::ALL.iter().all(|m| self.len(*m) == 0)
    }

    /// Replace the in-memory content with the persisted snapshot.
    ///
    /// A missing file yields an empty store. An unreadable or corrupt file is
    /// logged and also yields an empty store; it is overwritten on the next
    /// successful save.
    pub fn load(&self) {
        let loaded = match self.read_persisted() {
            Ok(Some(persisted)) => {
                let data = IndexData::from(persisted);
                log::info!(
                    "loaded index {}: {} text, {} image entries",
                    self.file_name,
                    data.text.len(),
                    data.images.len()
                );
                data
            }
            Ok(None) => {
                log::info!("no existing index at {}, starting fresh", self.file_name);
                IndexData::default()
            }
            Err(e) => {
                log::error!("{e}; starting with an empty index");
                IndexData::default()
            }
        };

        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *data = loaded;
    }

    fn read_persisted(&self) -> Result<Option<Persisted>, StoreError> {
        if !self.storage.exists(&self.file_name) {
            return Ok(None);
        }

        let bytes = match self.storage.read(&self.file_name) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Read(e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(StoreError::CorruptIndex)
    }

    /// Write the full current mapping atomically.
    ///
    /// The read lock is held only while encoding; the file write happens
    /// after it is released. On failure the in-memory state is untouched.
    pub fn save(&self) -> Result<(), StoreError> {
        let _saving = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let bytes = {
            let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
            let view = PersistedRef {
                text: data.text.iter().map(|(k, v)| (k.as_str(), v.as_ref())).collect(),
                images: data.images.iter().map(|(k, v)| (k.as_str(), v.as_ref())).collect(),
            };
            serde_json::to_vec(&view).map_err(StoreError::Encode)?
        };

        self.storage
            .write(&self.file_name, &bytes)
            .map_err(StoreError::Persistence)?;

        log::debug!("saved index {} ({} bytes)", self.file_name, bytes.len());
        Ok(())
    }
}
