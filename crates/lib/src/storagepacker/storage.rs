//! Physical key/value storage backing the packer.
//!
//! # Storage Layout
//!
//! [`FileStorage`] maps each key onto a file below its root directory, with
//! `/` separating directories:
//!
//! ```text
//! {storage_dir}/
//! └── packer/group/buckets/
//!     ├── 0           # JSON-encoded Bucket
//!     ├── 17
//!     └── ...
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// A physical storage entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
  pub key: String,
  pub value: Vec<u8>,
}

impl Entry {
  pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
    Self { key: key.into(), value }
  }
}

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("invalid storage key '{0}'")]
  InvalidKey(String),

  #[error("failed to read storage entry '{key}': {source}")]
  Read {
    key: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to write storage entry '{key}': {source}")]
  Write {
    key: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to delete storage entry '{key}': {source}")]
  Delete {
    key: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to list storage prefix '{prefix}': {source}")]
  List {
    prefix: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to write storage entry '{key}' and could not roll back {unrestored:?}: {source}")]
  RollbackIncomplete {
    key: String,
    unrestored: Vec<String>,
    #[source]
    source: io::Error,
  },

  #[error("storage backend unavailable: {0}")]
  Unavailable(String),
}

/// Durable key/value storage.
///
/// `put_batch` is all-or-nothing: when it returns an error no entry of the
/// batch is visible to later reads.
pub trait Storage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Entry>, StorageError>;

  fn put_batch(&self, entries: &[Entry]) -> Result<(), StorageError>;

  fn delete(&self, key: &str) -> Result<(), StorageError>;

  /// Keys stored directly below `prefix`, in lexical order.
  fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

  fn put(&self, entry: Entry) -> Result<(), StorageError> {
    self.put_batch(std::slice::from_ref(&entry))
  }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
  let valid = !key.is_empty()
    && !key.starts_with('/')
    && key
      .split('/')
      .all(|segment| !segment.is_empty() && segment != "." && segment != ".." && !segment.ends_with(TEMP_SUFFIX));
  if valid {
    Ok(())
  } else {
    Err(StorageError::InvalidKey(key.to_string()))
  }
}

fn is_direct_child(prefix: &str, key: &str) -> bool {
  key
    .strip_prefix(prefix)
    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
}

/// In-process storage. Batches are applied under a single write lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }
}

impl Storage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<Entry>, StorageError> {
    validate_key(key)?;
    Ok(self.entries.read().get(key).map(|value| Entry::new(key, value.clone())))
  }

  fn put_batch(&self, entries: &[Entry]) -> Result<(), StorageError> {
    for entry in entries {
      validate_key(&entry.key)?;
    }
    let mut map = self.entries.write();
    for entry in entries {
      map.insert(entry.key.clone(), entry.value.clone());
    }
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<(), StorageError> {
    validate_key(key)?;
    self.entries.write().remove(key);
    Ok(())
  }

  fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    Ok(
      self
        .entries
        .read()
        .keys()
        .filter(|key| is_direct_child(prefix, key))
        .cloned()
        .collect(),
    )
  }
}

const TEMP_SUFFIX: &str = ".tmp";

/// File-backed storage with atomic writes (write to temp, then rename).
#[derive(Debug)]
pub struct FileStorage {
  root: PathBuf,
  write_lock: Mutex<()>,
}

impl FileStorage {
  pub fn new(root: PathBuf) -> Self {
    Self {
      root,
      write_lock: Mutex::new(()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
    validate_key(key)?;
    Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
  }

  fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
  }

  fn read_path(key: &str, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
      Ok(value) => Ok(Some(value)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(StorageError::Read {
        key: key.to_string(),
        source,
      }),
    }
  }

  fn write_temp(path: &Path, value: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    let temp = Self::temp_path(path);
    fs::write(&temp, value)?;
    Ok(temp)
  }

  /// Put back what was there before a failed batch.
  fn restore(path: &Path, previous: Option<&[u8]>) -> io::Result<()> {
    match previous {
      Some(value) => fs::write(path, value),
      None => match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
      },
    }
  }

  /// Restore every already-renamed entry; returns the keys left in the new state.
  fn rollback(done: &[Staged<'_>]) -> Vec<String> {
    let mut unrestored = Vec::new();
    for (entry, path, previous) in done {
      if let Err(e) = Self::restore(path, previous.as_deref()) {
        warn!(key = %entry.key, error = %e, "failed to restore storage entry after aborted batch");
        unrestored.push(entry.key.clone());
      }
    }
    unrestored
  }
}

/// An entry queued for a batch: target path and the value it replaces.
type Staged<'a> = (&'a Entry, PathBuf, Option<Vec<u8>>);

impl Storage for FileStorage {
  fn get(&self, key: &str) -> Result<Option<Entry>, StorageError> {
    let path = self.entry_path(key)?;
    Ok(Self::read_path(key, &path)?.map(|value| Entry::new(key, value)))
  }

  fn put_batch(&self, entries: &[Entry]) -> Result<(), StorageError> {
    let _guard = self.write_lock.lock();

    let mut staged: Vec<Staged<'_>> = Vec::with_capacity(entries.len());
    for entry in entries {
      let path = self.entry_path(&entry.key)?;
      let previous = Self::read_path(&entry.key, &path)?;
      staged.push((entry, path, previous));
    }

    let mut temps: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (entry, path, _) in &staged {
      match Self::write_temp(path, &entry.value) {
        Ok(temp) => temps.push(temp),
        Err(source) => {
          for temp in &temps {
            let _ = fs::remove_file(temp);
          }
          return Err(StorageError::Write {
            key: entry.key.clone(),
            source,
          });
        }
      }
    }

    for (idx, ((entry, path, _), temp)) in staged.iter().zip(&temps).enumerate() {
      if let Err(source) = fs::rename(temp, path) {
        let unrestored = Self::rollback(&staged[..idx]);
        for pending in &temps[idx..] {
          let _ = fs::remove_file(pending);
        }
        let key = entry.key.clone();
        if unrestored.is_empty() {
          return Err(StorageError::Write { key, source });
        }
        return Err(StorageError::RollbackIncomplete { key, unrestored, source });
      }
    }

    debug!(count = entries.len(), root = %self.root.display(), "storage batch written");
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<(), StorageError> {
    let path = self.entry_path(key)?;
    let _guard = self.write_lock.lock();
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StorageError::Delete {
        key: key.to_string(),
        source,
      }),
    }
  }

  fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    let dir = prefix
      .split('/')
      .filter(|segment| !segment.is_empty())
      .fold(self.root.clone(), |path, segment| path.join(segment));

    let read_dir = match fs::read_dir(&dir) {
      Ok(read_dir) => read_dir,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => {
        return Err(StorageError::List {
          prefix: prefix.to_string(),
          source,
        });
      }
    };

    let mut keys = Vec::new();
    for dir_entry in read_dir {
      let dir_entry = dir_entry.map_err(|source| StorageError::List {
        prefix: prefix.to_string(),
        source,
      })?;
      let is_file = dir_entry.file_type().map(|t| t.is_file()).unwrap_or(false);
      let Some(name) = dir_entry.file_name().to_str().map(str::to_string) else {
        continue;
      };
      if is_file && !name.ends_with(TEMP_SUFFIX) {
        keys.push(format!("{prefix}{name}"));
      }
    }
    keys.sort();
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn exercise_backend(storage: &dyn Storage) {
    assert!(storage.get("a/b/1").unwrap().is_none());

    storage
      .put_batch(&[
        Entry::new("a/b/1", b"one".to_vec()),
        Entry::new("a/b/2", b"two".to_vec()),
        Entry::new("a/c", b"nested-sibling".to_vec()),
      ])
      .unwrap();

    assert_eq!(storage.get("a/b/1").unwrap().unwrap().value, b"one");
    assert_eq!(storage.list("a/b/").unwrap(), ["a/b/1", "a/b/2"]);
    assert_eq!(storage.list("a/").unwrap(), ["a/c"]);

    storage.put(Entry::new("a/b/1", b"uno".to_vec())).unwrap();
    assert_eq!(storage.get("a/b/1").unwrap().unwrap().value, b"uno");

    storage.delete("a/b/1").unwrap();
    storage.delete("a/b/1").unwrap();
    assert!(storage.get("a/b/1").unwrap().is_none());
    assert_eq!(storage.list("a/b/").unwrap(), ["a/b/2"]);
  }

  #[test]
  fn memory_storage_basic_operations() {
    exercise_backend(&MemoryStorage::new());
  }

  #[test]
  fn file_storage_basic_operations() {
    let temp = TempDir::new().unwrap();
    exercise_backend(&FileStorage::new(temp.path().to_path_buf()));
  }

  #[test]
  fn rejects_keys_escaping_the_root() {
    let storage = MemoryStorage::new();
    for key in ["", "/abs", "a//b", "../x", "a/./b", "a/b.tmp"] {
      assert!(
        matches!(storage.get(key), Err(StorageError::InvalidKey(_))),
        "key {key:?} should be rejected"
      );
    }
  }

  #[test]
  fn invalid_key_aborts_whole_batch() {
    let storage = MemoryStorage::new();
    let err = storage
      .put_batch(&[Entry::new("ok", vec![1]), Entry::new("../bad", vec![2])])
      .unwrap_err();
    assert!(matches!(err, StorageError::InvalidKey(_)));
    assert!(storage.is_empty());
  }

  #[test]
  fn file_storage_leaves_no_temp_files() {
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::new(temp.path().to_path_buf());
    storage.put(Entry::new("p/1", b"x".to_vec())).unwrap();

    let names: Vec<_> = fs::read_dir(temp.path().join("p"))
      .unwrap()
      .map(|e| e.unwrap().file_name().into_string().unwrap())
      .collect();
    assert_eq!(names, ["1"]);
  }

  #[test]
  fn file_storage_batch_failure_keeps_previous_contents() {
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::new(temp.path().to_path_buf());
    storage.put(Entry::new("p/1", b"old".to_vec())).unwrap();

    // A plain file where the second entry's parent directory should be.
    fs::write(temp.path().join("blocked"), b"not a directory").unwrap();

    let result = storage.put_batch(&[Entry::new("p/1", b"new".to_vec()), Entry::new("blocked/2", b"x".to_vec())]);
    assert!(result.is_err());
    assert_eq!(storage.get("p/1").unwrap().unwrap().value, b"old");
    assert_eq!(storage.list("p/").unwrap(), ["p/1"]);
  }

  #[test]
  fn rollback_reports_entries_it_cannot_restore() {
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::new(temp.path().to_path_buf());
    storage.put(Entry::new("p/1", b"new".to_vec())).unwrap();
    fs::write(temp.path().join("blocked"), b"not a directory").unwrap();

    let restorable = Entry::new("p/1", Vec::new());
    let stuck = Entry::new("blocked/2", Vec::new());
    let done = [
      (&restorable, storage.entry_path("p/1").unwrap(), Some(b"old".to_vec())),
      (&stuck, storage.entry_path("blocked/2").unwrap(), Some(b"old".to_vec())),
    ];

    assert_eq!(FileStorage::rollback(&done), ["blocked/2"]);
    assert_eq!(storage.get("p/1").unwrap().unwrap().value, b"old");
  }

  #[test]
  fn rollback_removes_entries_that_did_not_exist() {
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::new(temp.path().to_path_buf());
    storage.put(Entry::new("p/fresh", b"x".to_vec())).unwrap();

    let fresh = Entry::new("p/fresh", Vec::new());
    let done = [(&fresh, storage.entry_path("p/fresh").unwrap(), None)];

    assert!(FileStorage::rollback(&done).is_empty());
    assert!(storage.get("p/fresh").unwrap().is_none());
  }

  #[test]
  fn file_storage_list_of_missing_prefix_is_empty() {
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::new(temp.path().join("never-created"));
    assert!(storage.list("packer/group/buckets/").unwrap().is_empty());
  }
}
