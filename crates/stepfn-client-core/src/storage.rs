use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

const STORAGE_SCHEMA_VERSION: u32 = 1;

/// Key of the single unkeyed draft used while the document has no id.
pub const DRAFT_STORAGE_KEY: &str = "stepfn:draft";
pub const CAPABILITY_KEY_PREFIX: &str = "key:";

#[must_use]
pub fn capability_storage_key(id: &str) -> String {
    format!("{CAPABILITY_KEY_PREFIX}{id}")
}

/// String key/value persistence, the local-storage port of the session.
///
/// A successful `set` must be durable before it returns: capability keys are
/// written exactly once and nothing else records document ownership.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: Persistence + ?Sized> Persistence for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

/// In-memory storage. Clones share the same entries, so a second session built
/// from a clone observes everything the first one wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Persistence for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StorageDocument {
    version: u32,
    entries: Vec<StoredEntry>,
}

type Entries = BTreeMap<String, StoredEntry>;

/// JSON-file storage shared by every process pointed at the same path.
///
/// Each write holds an exclusive lock on `<path>.lock`, re-reads the file,
/// applies the one change and replaces the file through a temporary file and a
/// rename. Entries written by other processes in the meantime are kept.
///
/// A file that exists but cannot be used (corrupt, or written by a different
/// schema version) is moved to `<path>.corrupt-<millis>` rather than
/// overwritten, so the capability keys in it can still be recovered by hand.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileStorage {
    /// Opens the store at `path`. A missing file is an empty store. A read
    /// failure other than "not found" is an error: nothing is written over a
    /// file this process could not read.
    pub fn load(path: PathBuf) -> Result<Self, StorageError> {
        let storage = Self {
            path,
            entries: Mutex::new(BTreeMap::new()),
        };
        if storage.path.exists() {
            let _lock = storage.lock_file()?;
            let entries = storage.read_entries()?;
            *storage.entries() = entries;
        }
        Ok(storage)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_path(&self) -> PathBuf {
        sibling_path(&self.path, ".lock")
    }

    fn ensure_parent(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| StorageError::Write {
                message: format!("mkdir {}: {error}", parent.display()),
            })?;
        }
        Ok(())
    }

    /// Blocks until this process holds the cross-process write lock. The lock
    /// is released when the returned file is dropped.
    fn lock_file(&self) -> Result<File, StorageError> {
        self.ensure_parent()?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|error| StorageError::Write {
                message: format!("open {}: {error}", lock_path.display()),
            })?;
        file.lock_exclusive().map_err(|error| StorageError::Write {
            message: format!("lock {}: {error}", lock_path.display()),
        })?;
        Ok(file)
    }

    /// Reads the current file contents. Callers must hold the file lock.
    fn read_entries(&self) -> Result<Entries, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(error) => {
                return Err(StorageError::Read {
                    message: format!("read {}: {error}", self.path.display()),
                });
            }
        };
        match serde_json::from_str::<StorageDocument>(raw.as_str()) {
            Ok(document) if document.version == STORAGE_SCHEMA_VERSION => Ok(document
                .entries
                .into_iter()
                .map(|entry| (entry.key.clone(), entry))
                .collect()),
            Ok(document) => {
                self.quarantine(&format!("unsupported version {}", document.version))?;
                Ok(BTreeMap::new())
            }
            Err(error) => {
                self.quarantine(&error.to_string())?;
                Ok(BTreeMap::new())
            }
        }
    }

    fn quarantine(&self, reason: &str) -> Result<PathBuf, StorageError> {
        let target = sibling_path(
            &self.path,
            &format!(".corrupt-{}", Utc::now().timestamp_millis()),
        );
        fs::rename(&self.path, &target).map_err(|error| StorageError::Write {
            message: format!("move aside {}: {error}", self.path.display()),
        })?;
        tracing::warn!(
            path = %self.path.display(),
            moved_to = %target.display(),
            reason,
            "Moved unusable storage file aside"
        );
        Ok(target)
    }

    /// Read-modify-write under the file lock. `apply` returns whether it
    /// changed anything; unchanged maps are not written back.
    fn update(&self, apply: impl FnOnce(&mut Entries) -> bool) -> Result<(), StorageError> {
        let mut cached = self.entries();
        let _lock = self.lock_file()?;
        let mut entries = self.read_entries()?;
        if apply(&mut entries) {
            self.flush(&entries)?;
        }
        *cached = entries;
        Ok(())
    }

    fn flush(&self, entries: &Entries) -> Result<(), StorageError> {
        let encoded = serde_json::to_string_pretty(&StorageDocument {
            version: STORAGE_SCHEMA_VERSION,
            entries: entries.values().cloned().collect(),
        })
        .map_err(|error| StorageError::Encode {
            message: error.to_string(),
        })?;

        let staging = self.path.with_extension("tmp");
        fs::write(&staging, encoded).map_err(|error| StorageError::Write {
            message: format!("write {}: {error}", staging.display()),
        })?;
        restrict_permissions(&staging)?;
        fs::rename(&staging, &self.path).map_err(|error| StorageError::Write {
            message: format!("rename into {}: {error}", self.path.display()),
        })
    }
}

impl Persistence for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(
                key.to_string(),
                StoredEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                    updated_at: Utc::now().to_rfc3339(),
                },
            );
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| entries.remove(key).is_some())
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

// The file holds bearer tokens.
fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|error| {
            StorageError::Write {
                message: format!("chmod {}: {error}", path.display()),
            }
        })?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
