//! Message-id stores.
//!
//! A client records every outbound QoS 1/2 publish until the broker
//! acknowledges it. The store is either in memory, lost with the process, or
//! a directory holding one file per unacknowledged message.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Setting value selecting the in-memory store.
pub const MEMORY_STORE: &str = ":memory:";

const FILE_EXTENSION: &str = "msg";

/// Where a client keeps its message-id tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    /// Ephemeral tracking.
    Memory,
    /// Durable tracking under a directory.
    File(PathBuf),
}

impl Persistence {
    /// Interpret the `store` setting. Empty values and [`MEMORY_STORE`]
    /// select the in-memory store; anything else is a directory path.
    pub fn from_setting(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == MEMORY_STORE {
            Self::Memory
        } else {
            Self::File(PathBuf::from(value))
        }
    }

    /// Whether this persistence survives a restart.
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// Storage of in-flight messages keyed by packet direction and id.
pub trait MessageStore: Send + Sync {
    /// Store a message record.
    fn put(&self, key: &str, record: &[u8]) -> io::Result<()>;

    /// Remove a message record. Missing keys are ignored.
    fn del(&self, key: &str) -> io::Result<()>;

    /// All stored keys, sorted.
    fn keys(&self) -> io::Result<Vec<String>>;

    /// Remove every record.
    fn reset(&self) -> io::Result<()>;
}

/// Dynamic store wrapper for trait objects.
pub type DynStore = Arc<dyn MessageStore>;

/// Key of an outbound publish record.
pub fn outbound_key(pkid: u16) -> String {
    format!("o.{}", pkid)
}

/// Open the store selected by `persistence`. File stores create their
/// directory on open.
pub fn open_store(persistence: &Persistence) -> io::Result<DynStore> {
    Ok(match persistence {
        Persistence::Memory => Arc::new(MemoryStore::default()),
        Persistence::File(dir) => Arc::new(FileStore::open(dir)?),
    })
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MessageStore for MemoryStore {
    fn put(&self, key: &str, record: &[u8]) -> io::Result<()> {
        self.records.lock().insert(key.to_string(), record.to_vec());
        Ok(())
    }

    fn del(&self, key: &str) -> io::Result<()> {
        self.records.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        Ok(self.records.lock().keys().cloned().collect())
    }

    fn reset(&self) -> io::Result<()> {
        self.records.lock().clear();
        Ok(())
    }
}

/// Directory backed store, one `<key>.msg` file per record.
pub struct FileStore {
    dir: PathBuf,
    // Serializes file operations on the directory.
    lock: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        tracing::debug!("Opened file store at {}", dir.display());
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, FILE_EXTENSION))
    }
}

impl MessageStore for FileStore {
    fn put(&self, key: &str, record: &[u8]) -> io::Result<()> {
        let _guard = self.lock.lock();
        // Records are replaced atomically.
        let tmp = self.dir.join(format!("{}.tmp", key));
        fs::write(&tmp, record)?;
        fs::rename(&tmp, self.path(key))
    }

    fn del(&self, key: &str) -> io::Result<()> {
        let _guard = self.lock.lock();
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let _guard = self.lock.lock();
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn reset(&self) -> io::Result<()> {
        for key in self.keys()? {
            self.del(&key)?;
        }
        Ok(())
    }
}
