//! Session Storage - client-local key-value persistence
//!
//! The manager only ever touches two keys, `auth_token` and `user`.

use parking_lot::Mutex;
use pluto_core::{storage_error, PlutoConfig, PlutoError, PlutoResult, StorageBackend};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Key holding the bearer token string
pub const TOKEN_KEY: &str = "auth_token";
/// Key holding the JSON-serialized `UserRecord`
pub const USER_KEY: &str = "user";

/// Synchronous string key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> PlutoResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> PlutoResult<()>;

    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> PlutoResult<()>;
}

/// In-process store. Clones share the same map, which lets tests simulate a
/// restart by handing the same store to a fresh manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> PlutoResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PlutoResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PlutoResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One file per key under a directory
pub struct FileStore {
    storage_dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the storage directory
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> PlutoResult<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&storage_dir).map_err(|e| {
            storage_error!(
                format!("Failed to create {}", storage_dir.display()),
                "file_store",
                e
            )
        })?;

        info!("Session storage initialized at: {}", storage_dir.display());

        Ok(Self { storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn path_for(&self, key: &str) -> PlutoResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(storage_error!(
                format!("Invalid storage key: {:?}", key),
                "file_store"
            ));
        }
        Ok(self.storage_dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> PlutoResult<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error!(
                format!("Failed to read {}", path.display()),
                "file_store",
                e
            )),
        }
    }

    fn set(&self, key: &str, value: &str) -> PlutoResult<()> {
        let path = self.path_for(key)?;
        // Write then rename so a crash never leaves a half-written value
        let tmp_path = path.with_extension("tmp");

        write_private(&tmp_path, value).map_err(|e| {
            storage_error!(
                format!("Failed to write {}", tmp_path.display()),
                "file_store",
                e
            )
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            storage_error!(
                format!("Failed to replace {}", path.display()),
                "file_store",
                e
            )
        })?;

        debug!("Stored {} in {}", key, path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> PlutoResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error!(
                format!("Failed to remove {}", path.display()),
                "file_store",
                e
            )),
        }
    }
}

/// Write `value` to a file readable only by the owner on unix
fn write_private(path: &Path, value: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(value.as_bytes())?;
    file.sync_all()
}

/// Build the store selected by `config.storage.backend`
pub fn open_store(config: &PlutoConfig) -> PlutoResult<Arc<dyn KeyValueStore>> {
    match config.storage.backend {
        StorageBackend::File => Ok(Arc::new(FileStore::new(config.resolved_data_dir())?)),
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
