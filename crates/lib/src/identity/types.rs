//! Group and alias records as they are indexed and persisted.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binding of an external principal, scoped to one auth mount, to a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
  pub id: String,
  pub name: String,
  pub mount_accessor: String,
  /// Mount type resolved when the alias was last written.
  pub mount_type: String,
  pub group_id: String,
  #[serde(default)]
  pub creation_time: u64,
  #[serde(default)]
  pub last_update_time: u64,
}

impl Alias {
  /// The `(mount_accessor, name)` pair that must be unique across all aliases.
  pub fn factors(&self) -> (String, String) {
    (self.mount_accessor.clone(), self.name.clone())
  }
}

/// An internal group owning zero or more aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub policies: Vec<String>,
  #[serde(default)]
  pub metadata: BTreeMap<String, String>,
  #[serde(default)]
  pub aliases: Vec<Alias>,
  #[serde(default)]
  pub creation_time: u64,
  #[serde(default)]
  pub last_update_time: u64,
}

impl Group {
  pub fn alias(&self, alias_id: &str) -> Option<&Alias> {
    self.aliases.iter().find(|alias| alias.id == alias_id)
  }

  /// Detach an alias from this group, returning it if it was present.
  pub fn remove_alias(&mut self, alias_id: &str) -> Option<Alias> {
    let idx = self.aliases.iter().position(|alias| alias.id == alias_id)?;
    Some(self.aliases.remove(idx))
  }

  /// Replace the alias with the same id in place, or append it.
  pub fn upsert_alias(&mut self, alias: Alias) {
    match self.aliases.iter_mut().find(|existing| existing.id == alias.id) {
      Some(existing) => *existing = alias,
      None => self.aliases.push(alias),
    }
  }
}

/// Flattened read view of an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasView {
  pub id: String,
  pub name: String,
  pub mount_accessor: String,
  pub mount_type: String,
  pub group_id: String,
  pub creation_time: u64,
  pub last_update_time: u64,
}

impl From<&Alias> for AliasView {
  fn from(alias: &Alias) -> Self {
    Self {
      id: alias.id.clone(),
      name: alias.name.clone(),
      mount_accessor: alias.mount_accessor.clone(),
      mount_type: alias.mount_type.clone(),
      group_id: alias.group_id.clone(),
      creation_time: alias.creation_time,
      last_update_time: alias.last_update_time,
    }
  }
}

pub(crate) fn generate_id() -> String {
  Uuid::new_v4().to_string()
}

pub(crate) fn now_unix() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// Assign an id, a default name and timestamps to a group about to be written.
pub(crate) fn sanitize_group(group: &mut Group, now: u64) {
  if group.id.is_empty() {
    group.id = generate_id();
  }
  if group.name.is_empty() {
    group.name = format!("group_{}", group.id);
  }
  if group.creation_time == 0 {
    group.creation_time = now;
  }
  group.last_update_time = now;
}

/// Assign an id and timestamps to an alias about to be written.
pub(crate) fn sanitize_alias(alias: &mut Alias, now: u64) {
  if alias.id.is_empty() {
    alias.id = generate_id();
  }
  if alias.creation_time == 0 {
    alias.creation_time = now;
  }
  alias.last_update_time = now;
}
