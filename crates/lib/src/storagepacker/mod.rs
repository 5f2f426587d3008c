//! Bucket-sharded packing of many small records into few storage entries.
//!
//! Each item id hashes to one of `bucket_count` buckets under the packer's
//! view prefix. A bucket is a single JSON entry holding every item that
//! hashes to it, so the number of physical entries stays bounded no matter
//! how many items are stored.
//!
//! The bucket count is recorded under `<prefix>config` with the first write.
//! Opening a view with a different count is refused, since every item would
//! hash to a different bucket than the one holding it.

mod storage;
mod types;

pub use storage::{Entry, FileStorage, MemoryStorage, Storage, StorageError};
pub use types::{Bucket, Item};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace};

use crate::consts::DEFAULT_BUCKET_COUNT;

/// Largest supported bucket count (bucket index is derived from two hash bytes).
pub const MAX_BUCKET_COUNT: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum PackerError {
  #[error("missing item ID")]
  MissingItemId,

  #[error("bucket count must be between 1 and {MAX_BUCKET_COUNT}, got {0}")]
  InvalidBucketCount(usize),

  #[error("failed to decode bucket '{key}': {source}")]
  DecodeBucket {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to encode bucket '{key}': {source}")]
  EncodeBucket {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("view '{prefix}' was written with {stored} buckets, configured for {configured}")]
  BucketCountMismatch {
    prefix: String,
    stored: usize,
    configured: usize,
  },

  #[error("failed to decode packer config '{key}': {source}")]
  DecodeConfig {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// Layout settings persisted alongside the buckets of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ViewLayout {
  bucket_count: usize,
}

/// Packer settings for one storage view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerConfig {
  pub view_prefix: String,
  pub bucket_count: usize,
}

impl Default for PackerConfig {
  fn default() -> Self {
    Self {
      view_prefix: crate::consts::GROUP_BUCKETS_PREFIX.to_string(),
      bucket_count: DEFAULT_BUCKET_COUNT,
    }
  }
}

pub struct StoragePacker {
  storage: Arc<dyn Storage>,
  view_prefix: String,
  bucket_count: usize,
  // Bucket updates are read-modify-write.
  write_lock: Mutex<()>,
  layout_recorded: AtomicBool,
}

impl std::fmt::Debug for StoragePacker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StoragePacker")
      .field("view_prefix", &self.view_prefix)
      .field("bucket_count", &self.bucket_count)
      .finish_non_exhaustive()
  }
}

impl StoragePacker {
  pub fn new(storage: Arc<dyn Storage>, config: &PackerConfig) -> Result<Self, PackerError> {
    if config.bucket_count == 0 || config.bucket_count > MAX_BUCKET_COUNT {
      return Err(PackerError::InvalidBucketCount(config.bucket_count));
    }
    let mut view_prefix = config.view_prefix.clone();
    if !view_prefix.is_empty() && !view_prefix.ends_with('/') {
      view_prefix.push('/');
    }
    let packer = Self {
      storage,
      view_prefix,
      bucket_count: config.bucket_count,
      write_lock: Mutex::new(()),
      layout_recorded: AtomicBool::new(false),
    };

    if let Some(layout) = packer.stored_layout()? {
      if layout.bucket_count != packer.bucket_count {
        return Err(PackerError::BucketCountMismatch {
          prefix: packer.view_prefix.clone(),
          stored: layout.bucket_count,
          configured: packer.bucket_count,
        });
      }
      packer.layout_recorded.store(true, Ordering::Release);
    }
    Ok(packer)
  }

  fn layout_key(&self) -> String {
    format!("{}config", self.view_prefix)
  }

  fn stored_layout(&self) -> Result<Option<ViewLayout>, PackerError> {
    let key = self.layout_key();
    let Some(entry) = self.storage.get(&key)? else {
      return Ok(None);
    };
    let layout = serde_json::from_slice(&entry.value).map_err(|source| PackerError::DecodeConfig { key, source })?;
    Ok(Some(layout))
  }

  fn layout_entry(&self) -> Result<Entry, PackerError> {
    let layout = ViewLayout {
      bucket_count: self.bucket_count,
    };
    let value = serde_json::to_vec(&layout).map_err(|source| PackerError::EncodeBucket {
      key: self.layout_key(),
      source,
    })?;
    Ok(Entry::new(self.layout_key(), value))
  }

  pub fn bucket_count(&self) -> usize {
    self.bucket_count
  }

  fn buckets_prefix(&self) -> String {
    format!("{}buckets/", self.view_prefix)
  }

  /// Storage key of the bucket holding `item_id`.
  pub fn bucket_key(&self, item_id: &str) -> String {
    let digest = Sha256::digest(item_id.as_bytes());
    let index = usize::from(u16::from_be_bytes([digest[0], digest[1]])) % self.bucket_count;
    format!("{}{}", self.buckets_prefix(), index)
  }

  pub fn get_bucket(&self, key: &str) -> Result<Option<Bucket>, PackerError> {
    let Some(entry) = self.storage.get(key)? else {
      return Ok(None);
    };
    let mut bucket: Bucket = serde_json::from_slice(&entry.value).map_err(|source| PackerError::DecodeBucket {
      key: key.to_string(),
      source,
    })?;
    // Lookups binary-search, so do not trust the stored order.
    bucket.key = key.to_string();
    bucket.items.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Some(bucket))
  }

  fn encode(bucket: &Bucket) -> Result<Entry, PackerError> {
    let value = serde_json::to_vec(bucket).map_err(|source| PackerError::EncodeBucket {
      key: bucket.key.clone(),
      source,
    })?;
    Ok(Entry::new(bucket.key.clone(), value))
  }

  pub fn get_item(&self, id: &str) -> Result<Option<Item>, PackerError> {
    if id.is_empty() {
      return Err(PackerError::MissingItemId);
    }
    let key = self.bucket_key(id);
    trace!(id, bucket = %key, "reading packed item");
    Ok(self.get_bucket(&key)?.and_then(|bucket| bucket.find(id).cloned()))
  }

  pub fn put_item(&self, item: Item) -> Result<(), PackerError> {
    self.put_items(vec![item])
  }

  /// Store several items with a single storage batch.
  ///
  /// Items landing in different buckets are written together or not at all.
  pub fn put_items(&self, items: Vec<Item>) -> Result<(), PackerError> {
    if items.iter().any(|item| item.id.is_empty()) {
      return Err(PackerError::MissingItemId);
    }

    let _guard = self.write_lock.lock();

    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();
    for item in items {
      let key = self.bucket_key(&item.id);
      if !buckets.contains_key(&key) {
        let bucket = self.get_bucket(&key)?.unwrap_or_else(|| Bucket::new(key.clone()));
        buckets.insert(key.clone(), bucket);
      }
      if let Some(bucket) = buckets.get_mut(&key) {
        bucket.upsert(item);
      }
    }

    let mut entries = buckets.values().map(Self::encode).collect::<Result<Vec<_>, _>>()?;
    let bucket_count = entries.len();
    let record_layout = !self.layout_recorded.load(Ordering::Acquire);
    if record_layout {
      entries.push(self.layout_entry()?);
    }
    self.storage.put_batch(&entries)?;
    if record_layout {
      self.layout_recorded.store(true, Ordering::Release);
    }
    debug!(buckets = bucket_count, prefix = %self.view_prefix, "packed items stored");
    Ok(())
  }

  /// Remove an item. Removing an unknown id succeeds.
  pub fn delete_item(&self, id: &str) -> Result<(), PackerError> {
    if id.is_empty() {
      return Err(PackerError::MissingItemId);
    }

    let _guard = self.write_lock.lock();

    let key = self.bucket_key(id);
    let Some(mut bucket) = self.get_bucket(&key)? else {
      return Ok(());
    };
    if !bucket.remove(id) {
      return Ok(());
    }
    if bucket.items.is_empty() {
      self.storage.delete(&key)?;
    } else {
      self.storage.put(Self::encode(&bucket)?)?;
    }
    debug!(id, bucket = %key, "packed item deleted");
    Ok(())
  }

  /// Every bucket currently stored for this view, in key order.
  pub fn buckets(&self) -> Result<Vec<Bucket>, PackerError> {
    let mut buckets = Vec::new();
    for key in self.storage.list(&self.buckets_prefix())? {
      if let Some(bucket) = self.get_bucket(&key)? {
        buckets.push(bucket);
      }
    }
    Ok(buckets)
  }

  /// Every item stored for this view.
  pub fn all_items(&self) -> Result<Vec<Item>, PackerError> {
    Ok(self.buckets()?.into_iter().flat_map(|bucket| bucket.items).collect())
  }
}
