use std::collections::HashSet;
use std::sync::Arc;

use im::OrdMap;
use tracing::trace;

use crate::identity::types::{Alias, Group};

use super::IndexError;

/// One immutable generation of the index.
///
/// Cloning is cheap: the maps share structure until one side is modified.
#[derive(Debug, Clone, Default)]
pub struct Tables {
  groups: OrdMap<String, Arc<Group>>,
  group_names: OrdMap<String, String>,
  aliases: OrdMap<String, Arc<Alias>>,
  alias_factors: OrdMap<(String, String), String>,
  alias_groups: OrdMap<String, String>,
}

impl Tables {
  pub fn group_by_id(&self, id: &str) -> Option<Arc<Group>> {
    self.groups.get(id).cloned()
  }

  pub fn group_by_name(&self, name: &str) -> Option<Arc<Group>> {
    self.group_names.get(name).and_then(|id| self.group_by_id(id))
  }

  /// The group whose alias set currently contains `alias_id`.
  pub fn group_by_alias_id(&self, alias_id: &str) -> Option<Arc<Group>> {
    self.alias_groups.get(alias_id).and_then(|id| self.group_by_id(id))
  }

  pub fn alias_by_id(&self, id: &str) -> Option<Arc<Alias>> {
    self.aliases.get(id).cloned()
  }

  pub fn alias_by_factors(&self, mount_accessor: &str, name: &str) -> Option<Arc<Alias>> {
    self
      .alias_factors
      .get(&(mount_accessor.to_string(), name.to_string()))
      .and_then(|id| self.alias_by_id(id))
  }

  /// Alias ids in ascending order.
  pub fn alias_ids(&self) -> impl Iterator<Item = &str> + '_ {
    self.aliases.keys().map(String::as_str)
  }

  /// Group ids in ascending order.
  pub fn group_ids(&self) -> impl Iterator<Item = &str> + '_ {
    self.groups.keys().map(String::as_str)
  }

  pub fn alias_count(&self) -> usize {
    self.aliases.len()
  }

  pub fn group_count(&self) -> usize {
    self.groups.len()
  }

  fn check_group(&self, group: &Group) -> Result<(), IndexError> {
    if group.id.is_empty() {
      return Err(IndexError::MissingId { table: "group" });
    }

    if let Some(owner) = self.group_names.get(&group.name)
      && owner != &group.id
    {
      return Err(IndexError::UniqueViolation {
        index: "group.name",
        value: group.name.clone(),
      });
    }

    let mut seen_ids = HashSet::new();
    let mut seen_factors = HashSet::new();
    for alias in &group.aliases {
      if alias.id.is_empty() {
        return Err(IndexError::MissingId { table: "group_alias" });
      }
      if !seen_ids.insert(alias.id.as_str()) {
        return Err(IndexError::UniqueViolation {
          index: "group_alias.id",
          value: alias.id.clone(),
        });
      }
      let factors = alias.factors();
      let taken_elsewhere = self.alias_factors.get(&factors).is_some_and(|owner| owner != &alias.id);
      if taken_elsewhere || !seen_factors.insert(factors) {
        return Err(IndexError::UniqueViolation {
          index: "group_alias.factors",
          value: format!("{}/{}", alias.mount_accessor, alias.name),
        });
      }
    }

    Ok(())
  }

  fn remove_alias_rows(&mut self, alias: &Alias) {
    if self.alias_factors.get(&alias.factors()) == Some(&alias.id) {
      self.alias_factors.remove(&alias.factors());
    }
    self.aliases.remove(&alias.id);
    self.alias_groups.remove(&alias.id);
  }

  /// Insert or replace a group together with the rows of its aliases.
  ///
  /// Alias rows are only dropped while this group still owns them, so the
  /// two groups of a transfer can be upserted in either order.
  pub(super) fn upsert_group(&mut self, group: &Group) -> Result<(), IndexError> {
    self.check_group(group)?;

    if let Some(previous) = self.groups.get(&group.id).cloned() {
      if previous.name != group.name && self.group_names.get(&previous.name) == Some(&group.id) {
        self.group_names.remove(&previous.name);
      }
      for old in &previous.aliases {
        if self.alias_groups.get(&old.id) != Some(&group.id) {
          continue;
        }
        match group.alias(&old.id) {
          Some(current) if current.factors() == old.factors() => {}
          Some(_) => {
            if self.alias_factors.get(&old.factors()) == Some(&old.id) {
              self.alias_factors.remove(&old.factors());
            }
          }
          None => self.remove_alias_rows(old),
        }
      }
    }

    for alias in &group.aliases {
      // A transferred alias may still carry rows for its old factors.
      if let Some(existing) = self.aliases.get(&alias.id).cloned()
        && existing.factors() != alias.factors()
        && self.alias_factors.get(&existing.factors()) == Some(&alias.id)
      {
        self.alias_factors.remove(&existing.factors());
      }
      self.aliases.insert(alias.id.clone(), Arc::new(alias.clone()));
      self.alias_factors.insert(alias.factors(), alias.id.clone());
      self.alias_groups.insert(alias.id.clone(), group.id.clone());
    }

    self.group_names.insert(group.name.clone(), group.id.clone());
    self.groups.insert(group.id.clone(), Arc::new(group.clone()));
    trace!(group_id = %group.id, aliases = group.aliases.len(), "group staged in index");
    Ok(())
  }
}
