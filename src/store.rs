//! Key-value persistence seam
//!
//! The engine persists its saved places and reads the host's history log
//! through this narrow interface. Both sides may hold the same store: the
//! engine never caches history, it re-reads on every pattern evaluation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::DetectError;

/// Key holding the saved places list
pub const PLACES_KEY: &str = "si_savedPlaces";

/// Key holding the host application state (contains `allSegments`)
pub const APP_STATE_KEY: &str = "segmentIntending";

/// Opaque durable string store
pub trait KeyValueStore {
    /// Read a value, `Ok(None)` when the key was never written
    fn load(&self, key: &str) -> Result<Option<String>, DetectError>;

    fn save(&self, key: &str, value: &str) -> Result<(), DetectError>;
}

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, DetectError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), DetectError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Directory-backed store, one `<key>.json` file per key
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DetectError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, DetectError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DetectError::Store(format!(
                "Failed to read {}: {}",
                self.path_for(key).display(),
                e
            ))),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), DetectError> {
        let path = self.path_for(key);
        fs::write(&path, value)
            .map_err(|e| DetectError::Store(format!("Failed to write {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_clones_share_data() {
        let store = MemoryStore::new();
        let host_view = store.clone();

        host_view.save("k", "v").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.load("missing").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("smart-detect-store-{}", uuid::Uuid::new_v4()));
        let store = FileStore::open(&dir).unwrap();

        assert_eq!(store.load(PLACES_KEY).unwrap(), None);
        store.save(PLACES_KEY, "[]").unwrap();
        assert_eq!(store.load(PLACES_KEY).unwrap().as_deref(), Some("[]"));
        assert!(store.path_for(PLACES_KEY).ends_with("si_savedPlaces.json"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
