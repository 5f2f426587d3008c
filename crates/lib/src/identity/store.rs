//! Group alias binding engine.
//!
//! Every mutation runs under one process-wide lock covering all groups and
//! aliases, because `(mount_accessor, name)` uniqueness spans groups and a
//! transfer rewrites two groups at once. A mutation stages the new group
//! values in an index write transaction, persists them through the packer
//! in a single batch, and only then commits the transaction. Reads use index
//! snapshots and never take the lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::memdb::{MemDb, ReadTxn};
use crate::mount::{MountEntry, MountValidator};
use crate::storagepacker::{Item, PackerConfig, Storage, StoragePacker};

use super::error::{IdentityError, UserError};
use super::request::{GroupAliasRequest, GroupRequest, RegisterResponse, field};
use super::types::{Alias, AliasView, Group, now_unix, sanitize_alias, sanitize_group};

/// Group an alias is created under.
enum GroupTarget {
  Existing(Group),
  New,
}

/// Groups a mutation has to write.
enum Placement {
  Single { group: Group },
  Transfer { target: Group, previous: Group },
}

impl Placement {
  fn group_id(&self) -> &str {
    match self {
      Placement::Single { group } => &group.id,
      Placement::Transfer { target, .. } => &target.id,
    }
  }

  fn groups(&self) -> Vec<&Group> {
    match self {
      Placement::Single { group } => vec![group],
      Placement::Transfer { target, previous } => vec![target, previous],
    }
  }
}

pub struct IdentityStore {
  db: MemDb,
  packer: StoragePacker,
  mounts: Arc<dyn MountValidator>,
  group_lock: Mutex<()>,
}

impl std::fmt::Debug for IdentityStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IdentityStore")
      .field("packer", &self.packer)
      .field("generation", &self.db.generation())
      .finish_non_exhaustive()
  }
}

impl IdentityStore {
  /// Open the store and index every group already persisted in `storage`.
  pub fn open(
    storage: Arc<dyn Storage>,
    mounts: Arc<dyn MountValidator>,
    config: &PackerConfig,
  ) -> Result<Self, IdentityError> {
    let store = Self {
      db: MemDb::new(),
      packer: StoragePacker::new(storage, config)?,
      mounts,
      group_lock: Mutex::new(()),
    };
    store.load_groups()?;
    Ok(store)
  }

  fn load_groups(&self) -> Result<(), IdentityError> {
    let _guard = self.group_lock.lock();
    let buckets = self.packer.buckets()?;

    // Item id -> bucket it was read from.
    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut txn = self.db.write_txn();
    let mut alias_count = 0;
    for bucket in &buckets {
      for item in &bucket.items {
        if let Some(first) = seen.insert(&item.id, &bucket.key) {
          return Err(IdentityError::Inconsistent(format!(
            "group {:?} is stored in both {first:?} and {:?}",
            item.id, bucket.key
          )));
        }
        let expected = self.packer.bucket_key(&item.id);
        if expected != bucket.key {
          return Err(IdentityError::Inconsistent(format!(
            "group {:?} is stored in {:?} but hashes to {expected:?}",
            item.id, bucket.key
          )));
        }
      }
    }

    for item in buckets.iter().flat_map(|bucket| &bucket.items) {
      let group: Group = serde_json::from_slice(&item.message).map_err(|source| IdentityError::Decode {
        id: item.id.clone(),
        source,
      })?;
      if group.id != item.id {
        return Err(IdentityError::Inconsistent(format!(
          "group stored under item {:?} has id {:?}",
          item.id, group.id
        )));
      }
      for alias in &group.aliases {
        if let Some(owner) = txn.group_by_alias_id(&alias.id) {
          return Err(IdentityError::Inconsistent(format!(
            "group alias {:?} belongs to both group {:?} and group {:?}",
            alias.id, owner.id, group.id
          )));
        }
      }
      txn
        .upsert_group(&group)
        .map_err(|e| IdentityError::Inconsistent(format!("failed to index stored group {:?}: {e}", group.id)))?;
      alias_count += group.aliases.len();
    }
    let generation = txn.commit();

    info!(groups = seen.len(), aliases = alias_count, generation, "loaded groups from storage");
    Ok(())
  }

  /// The index backing this store, for snapshots and change subscriptions.
  pub fn index(&self) -> &MemDb {
    &self.db
  }

  /// Create a new group alias, or update an existing one when `request.id` is set.
  pub fn register_group_alias(&self, request: &GroupAliasRequest) -> Result<RegisterResponse, IdentityError> {
    let id = field(&request.id);
    if !id.is_empty() {
      return self.update_group_alias_by_id(id, request);
    }

    let _guard = self.group_lock.lock();
    self.upsert_group_alias(request, None)
  }

  /// Update the group alias `id` with the fields of `request`.
  pub fn update_group_alias_by_id(
    &self,
    id: &str,
    request: &GroupAliasRequest,
  ) -> Result<RegisterResponse, IdentityError> {
    if id.is_empty() {
      return Err(UserError::EmptyAliasId.into());
    }

    let _guard = self.group_lock.lock();
    let existing = self.db.txn().alias_by_id(id).ok_or(UserError::InvalidAliasId)?;
    self.upsert_group_alias(request, Some(Alias::clone(&existing)))
  }

  /// Shared create/update path. Callers hold `group_lock`.
  fn upsert_group_alias(
    &self,
    request: &GroupAliasRequest,
    existing: Option<Alias>,
  ) -> Result<RegisterResponse, IdentityError> {
    let txn = self.db.txn();

    let name = field(&request.name);
    if name.is_empty() {
      return Err(UserError::MissingAliasName.into());
    }

    let accessor = field(&request.mount_accessor);
    if accessor.is_empty() {
      return Err(UserError::MissingMountAccessor.into());
    }
    let mount = self
      .mounts
      .resolve(accessor)
      .ok_or_else(|| UserError::InvalidMountAccessor(accessor.to_string()))?;

    let requested_group = match field(&request.group_id) {
      "" => None,
      group_id => {
        let group = txn.group_by_id(group_id).ok_or(UserError::InvalidGroupId)?;
        Some(Group::clone(&group))
      }
    };

    let factor_match = txn.alias_by_factors(&mount.accessor, name);
    let now = now_unix();
    let mut warnings = Vec::new();

    let (alias_id, placement) = match existing {
      None => {
        if factor_match.is_some() {
          return Err(UserError::AliasInUse.into());
        }
        let target = match requested_group {
          Some(group) => GroupTarget::Existing(group),
          None => GroupTarget::New,
        };
        Self::place_new_alias(target, name, &mount, now)
      }
      Some(mut alias) => {
        if let Some(other) = &factor_match
          && other.id != alias.id
        {
          return Err(UserError::AliasInUse.into());
        }

        // The reverse lookup is authoritative; the alias's own group_id is not consulted.
        let owner = txn
          .group_by_alias_id(&alias.id)
          .ok_or_else(|| IdentityError::OrphanAlias {
            alias_id: alias.id.clone(),
          })?;
        let mut owner = Group::clone(&owner);

        let placement = match requested_group {
          Some(mut target) if target.id != owner.id => {
            owner.remove_alias(&alias.id);
            sanitize_group(&mut owner, now);
            sanitize_group(&mut target, now);
            apply_fields(&mut alias, name, &mount, &target.id, now);
            target.aliases.push(alias.clone());

            let warning = format!(
              "group alias is being transferred from group {:?} to {:?}",
              owner.id, target.id
            );
            warn!(alias_id = %alias.id, from = %owner.id, to = %target.id, "{warning}");
            warnings.push(warning);

            Placement::Transfer {
              target,
              previous: owner,
            }
          }
          _ => {
            sanitize_group(&mut owner, now);
            apply_fields(&mut alias, name, &mount, &owner.id, now);
            owner.upsert_alias(alias.clone());
            Placement::Single { group: owner }
          }
        };
        (alias.id, placement)
      }
    };
    drop(txn);

    let generation = self.persist(&placement.groups())?;
    let group_id = placement.group_id().to_string();
    info!(
      alias_id = %alias_id,
      group_id = %group_id,
      transferred = matches!(placement, Placement::Transfer { .. }),
      generation,
      "group alias stored"
    );

    Ok(RegisterResponse {
      id: alias_id,
      group_id,
      warnings,
    })
  }

  fn place_new_alias(target: GroupTarget, name: &str, mount: &MountEntry, now: u64) -> (String, Placement) {
    let mut group = match target {
      GroupTarget::Existing(group) => group,
      GroupTarget::New => Group::default(),
    };
    sanitize_group(&mut group, now);

    let mut alias = Alias::default();
    apply_fields(&mut alias, name, mount, &group.id, now);
    let alias_id = alias.id.clone();
    group.aliases.push(alias);

    (alias_id, Placement::Single { group })
  }

  /// Stage `groups` in the index, write them as one packer batch, then commit.
  fn persist(&self, groups: &[&Group]) -> Result<u64, IdentityError> {
    let mut txn = self.db.write_txn();
    for group in groups {
      txn.upsert_group(group)?;
    }

    let items = groups
      .iter()
      .map(|group| {
        serde_json::to_vec(group)
          .map(|message| Item::new(group.id.clone(), message))
          .map_err(|source| IdentityError::Encode {
            id: group.id.clone(),
            source,
          })
      })
      .collect::<Result<Vec<_>, _>>()?;
    self.packer.put_items(items)?;

    Ok(txn.commit())
  }

  /// Read a group alias by id. `Ok(None)` means the id is unknown.
  pub fn read_group_alias(&self, id: &str) -> Result<Option<AliasView>, IdentityError> {
    if id.is_empty() {
      return Err(UserError::EmptyAliasId.into());
    }
    let view = self.db.txn().alias_by_id(id).map(|alias| AliasView::from(alias.as_ref()));
    debug!(id, found = view.is_some(), "group alias lookup");
    Ok(view)
  }

  /// Delete a group alias. Deleting an unknown id succeeds.
  pub fn delete_group_alias(&self, id: &str) -> Result<(), IdentityError> {
    if id.is_empty() {
      return Err(UserError::MissingAliasId.into());
    }

    let _guard = self.group_lock.lock();
    let txn = self.db.txn();
    if txn.alias_by_id(id).is_none() {
      debug!(id, "group alias already absent");
      return Ok(());
    }

    let owner = txn
      .group_by_alias_id(id)
      .ok_or_else(|| IdentityError::OrphanAlias { alias_id: id.to_string() })?;
    let mut group = Group::clone(&owner);
    drop(txn);

    group.remove_alias(id);
    sanitize_group(&mut group, now_unix());
    let generation = self.persist(&[&group])?;

    info!(alias_id = id, group_id = %group.id, generation, "group alias deleted");
    Ok(())
  }

  /// Ids of every group alias at the moment of the call.
  pub fn list_group_alias_ids(&self) -> AliasIdList {
    AliasIdList { txn: self.db.txn() }
  }

  /// Create a group explicitly.
  pub fn create_group(&self, request: &GroupRequest) -> Result<Group, IdentityError> {
    let _guard = self.group_lock.lock();

    let name = field(&request.name);
    if !name.is_empty() && self.db.txn().group_by_name(name).is_some() {
      return Err(UserError::GroupNameInUse.into());
    }

    let mut group = Group {
      name: name.to_string(),
      policies: request.policies.clone(),
      metadata: request.metadata.clone(),
      ..Default::default()
    };
    sanitize_group(&mut group, now_unix());
    let generation = self.persist(&[&group])?;

    info!(group_id = %group.id, name = %group.name, generation, "group created");
    Ok(group)
  }

  pub fn read_group(&self, id: &str) -> Result<Option<Group>, IdentityError> {
    if id.is_empty() {
      return Err(UserError::EmptyGroupId.into());
    }
    Ok(self.db.txn().group_by_id(id).map(|group| Group::clone(&group)))
  }

  pub fn list_group_ids(&self) -> Vec<String> {
    self.db.txn().group_ids().map(str::to_string).collect()
  }
}

fn apply_fields(alias: &mut Alias, name: &str, mount: &MountEntry, group_id: &str, now: u64) {
  alias.name = name.to_string();
  alias.mount_type = mount.mount_type.clone();
  alias.mount_accessor = mount.accessor.clone();
  alias.group_id = group_id.to_string();
  sanitize_alias(alias, now);
}

/// Point-in-time list of alias ids; iterating it again yields the same ids.
#[derive(Debug, Clone)]
pub struct AliasIdList {
  txn: ReadTxn,
}

impl AliasIdList {
  pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
    self.txn.alias_ids()
  }

  pub fn len(&self) -> usize {
    self.txn.alias_count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Index generation the list was taken at.
  pub fn generation(&self) -> u64 {
    self.txn.generation()
  }

  pub fn to_vec(&self) -> Vec<String> {
    self.iter().map(str::to_string).collect()
  }
}

impl<'a> IntoIterator for &'a AliasIdList {
  type Item = &'a str;
  type IntoIter = Box<dyn Iterator<Item = &'a str> + 'a>;

  fn into_iter(self) -> Self::IntoIter {
    Box::new(self.iter())
  }
}
