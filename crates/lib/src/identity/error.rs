use thiserror::Error;

use crate::memdb::IndexError;
use crate::storagepacker::PackerError;

/// Problems with the caller's input. Reported back without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
  #[error("empty group alias id")]
  EmptyAliasId,

  #[error("missing group alias ID")]
  MissingAliasId,

  #[error("invalid group alias ID")]
  InvalidAliasId,

  #[error("missing alias name")]
  MissingAliasName,

  #[error("missing mount_accessor")]
  MissingMountAccessor,

  #[error("invalid mount accessor {0:?}")]
  InvalidMountAccessor(String),

  #[error("invalid group ID")]
  InvalidGroupId,

  #[error("combination of mount and group alias name is already in use")]
  AliasInUse,

  #[error("empty group id")]
  EmptyGroupId,

  #[error("group name is already in use")]
  GroupNameInUse,
}

#[derive(Debug, Error)]
pub enum IdentityError {
  #[error(transparent)]
  InvalidRequest(#[from] UserError),

  /// An alias is indexed without an owning group.
  #[error("group alias is not associated with a group")]
  OrphanAlias { alias_id: String },

  /// Stored state contradicts the index invariants.
  #[error("inconsistent identity state: {0}")]
  Inconsistent(String),

  #[error("failed to persist group: {0}")]
  Packer(#[from] PackerError),

  #[error("index transaction failed: {0}")]
  Index(#[from] IndexError),

  #[error("failed to encode group '{id}': {source}")]
  Encode {
    id: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to decode stored group '{id}': {source}")]
  Decode {
    id: String,
    #[source]
    source: serde_json::Error,
  },
}

impl IdentityError {
  /// True for errors caused by the request rather than by the store.
  pub fn is_user_error(&self) -> bool {
    matches!(self, IdentityError::InvalidRequest(_))
  }

  pub fn user_error(&self) -> Option<&UserError> {
    match self {
      IdentityError::InvalidRequest(e) => Some(e),
      _ => None,
    }
  }
}
