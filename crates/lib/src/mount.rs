//! Resolution of mount accessors to the auth mounts they name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical identity of one configured authentication mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
  pub accessor: String,
  #[serde(rename = "type")]
  pub mount_type: String,
  #[serde(default)]
  pub path: String,
}

/// Resolves a mount accessor, returning `None` for unknown accessors.
pub trait MountValidator: Send + Sync {
  fn resolve(&self, accessor: &str) -> Option<MountEntry>;
}

impl<F> MountValidator for F
where
  F: Fn(&str) -> Option<MountEntry> + Send + Sync,
{
  fn resolve(&self, accessor: &str) -> Option<MountEntry> {
    self(accessor)
  }
}

/// Fixed table of known mounts keyed by accessor.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
  mounts: BTreeMap<String, MountEntry>,
}

impl MountTable {
  pub fn new(entries: impl IntoIterator<Item = MountEntry>) -> Self {
    Self {
      mounts: entries
        .into_iter()
        .map(|entry| (entry.accessor.clone(), entry))
        .collect(),
    }
  }

  pub fn entries(&self) -> impl Iterator<Item = &MountEntry> {
    self.mounts.values()
  }

  pub fn len(&self) -> usize {
    self.mounts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.mounts.is_empty()
  }
}

impl MountValidator for MountTable {
  fn resolve(&self, accessor: &str) -> Option<MountEntry> {
    self.mounts.get(accessor).cloned()
  }
}
