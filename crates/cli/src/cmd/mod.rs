//! Subcommand implementations.
//!
//! Each command loads the configuration, checks the feature gate, takes the
//! storage lock and opens the identity store before calling into the engine.

mod group;
mod group_alias;
mod mounts;

pub use group::{GroupCommand, cmd_group};
pub use group_alias::{GroupAliasCommand, cmd_group_alias};
pub use mounts::cmd_mounts;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use idstore_lib::config::Config;
use idstore_lib::gate::{Feature, FeatureGate};
use idstore_lib::identity::IdentityStore;
use idstore_lib::platform::paths;
use idstore_lib::storagepacker::FileStorage;
use idstore_lib::store_lock::{LockMode, StoreLock};

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
  let path = path.map(Path::to_path_buf).unwrap_or_else(paths::config_file);
  Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// An opened identity store together with the storage lock guarding it.
pub struct Session {
  pub store: IdentityStore,
  _lock: StoreLock,
}

impl Session {
  pub fn open(config: &Config, feature: Feature, mode: LockMode, command: &str) -> Result<Self> {
    config.features.check(feature)?;

    let storage_path = config.storage_path();
    let lock = StoreLock::acquire(&storage_path, mode, command).context("Failed to acquire storage lock")?;
    debug!(path = %storage_path.display(), command, "opening identity store");

    let store = IdentityStore::open(
      Arc::new(FileStorage::new(storage_path)),
      Arc::new(config.mount_table()),
      &config.packer_config(),
    )?;

    Ok(Self { store, _lock: lock })
  }
}
