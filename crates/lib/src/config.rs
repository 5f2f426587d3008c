//! TOML configuration for the identity store.
//!
//! ```toml
//! [storage]
//! path = "/var/lib/idstore/storage"
//! bucket_count = 256
//!
//! [[mounts]]
//! accessor = "auth_userpass_1234"
//! type = "userpass"
//! path = "userpass/"
//!
//! [features]
//! group_aliases = true
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{DEFAULT_BUCKET_COUNT, GROUP_BUCKETS_PREFIX};
use crate::gate::ConfigGate;
use crate::mount::{MountEntry, MountTable};
use crate::platform::paths::storage_dir;
use crate::storagepacker::PackerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config file '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("duplicate mount accessor '{0}' in config")]
  DuplicateMount(String),
}

fn default_bucket_count() -> usize {
  DEFAULT_BUCKET_COUNT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
  /// Storage directory; defaults to the platform data directory.
  pub path: Option<PathBuf>,
  #[serde(default = "default_bucket_count")]
  pub bucket_count: usize,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      bucket_count: DEFAULT_BUCKET_COUNT,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub mounts: Vec<MountEntry>,
  #[serde(default)]
  pub features: ConfigGate,
}

impl Config {
  pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
    let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    let mut seen = std::collections::HashSet::new();
    for mount in &config.mounts {
      if !seen.insert(mount.accessor.as_str()) {
        return Err(ConfigError::DuplicateMount(mount.accessor.clone()));
      }
    }

    Ok(config)
  }

  /// Load the config file at `path`. A missing file yields the defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Self::default());
      }
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    let config = Self::parse(&content, path)?;
    debug!(path = %path.display(), mounts = config.mounts.len(), "config loaded");
    Ok(config)
  }

  pub fn storage_path(&self) -> PathBuf {
    self.storage.path.clone().unwrap_or_else(storage_dir)
  }

  pub fn packer_config(&self) -> PackerConfig {
    PackerConfig {
      view_prefix: GROUP_BUCKETS_PREFIX.to_string(),
      bucket_count: self.storage.bucket_count,
    }
  }

  pub fn mount_table(&self) -> MountTable {
    MountTable::new(self.mounts.iter().cloned())
  }
}
