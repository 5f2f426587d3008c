//! Decoded request fields and responses for identity operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Fields of a group alias register/update request. Absent and empty are equivalent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAliasRequest {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub mount_accessor: Option<String>,
  #[serde(default)]
  pub group_id: Option<String>,
}

impl GroupAliasRequest {
  pub fn new(name: impl Into<String>, mount_accessor: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      mount_accessor: Some(mount_accessor.into()),
      ..Default::default()
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
    self.group_id = Some(group_id.into());
    self
  }
}

/// Fields of an explicit group creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub policies: Vec<String>,
  #[serde(default)]
  pub metadata: BTreeMap<String, String>,
}

/// Result of registering or updating a group alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
  pub id: String,
  pub group_id: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<String>,
}

pub(crate) fn field(value: &Option<String>) -> &str {
  value.as_deref().unwrap_or_default()
}
