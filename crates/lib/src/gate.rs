//! Capability checks applied by request adapters before they call the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
  Groups,
  GroupAliases,
}

impl Feature {
  pub fn as_str(self) -> &'static str {
    match self {
      Feature::Groups => "groups",
      Feature::GroupAliases => "group_aliases",
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
  #[error("feature '{}' is not enabled", .0.as_str())]
  Disabled(Feature),
}

pub trait FeatureGate: Send + Sync {
  fn check(&self, feature: Feature) -> Result<(), GateError>;
}

/// Gate that allows every feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl FeatureGate for Unrestricted {
  fn check(&self, _feature: Feature) -> Result<(), GateError> {
    Ok(())
  }
}

fn enabled() -> bool {
  true
}

/// Feature switches read from the `[features]` configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigGate {
  #[serde(default = "enabled")]
  pub groups: bool,
  #[serde(default = "enabled")]
  pub group_aliases: bool,
}

impl Default for ConfigGate {
  fn default() -> Self {
    Self {
      groups: true,
      group_aliases: true,
    }
  }
}

impl FeatureGate for ConfigGate {
  fn check(&self, feature: Feature) -> Result<(), GateError> {
    let allowed = match feature {
      Feature::Groups => self.groups,
      Feature::GroupAliases => self.group_aliases,
    };
    if allowed { Ok(()) } else { Err(GateError::Disabled(feature)) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_gate_blocks_disabled_features() {
    let gate = ConfigGate {
      group_aliases: false,
      ..Default::default()
    };
    assert_eq!(gate.check(Feature::Groups), Ok(()));
    assert_eq!(
      gate.check(Feature::GroupAliases),
      Err(GateError::Disabled(Feature::GroupAliases))
    );
    assert_eq!(
      gate.check(Feature::GroupAliases).unwrap_err().to_string(),
      "feature 'group_aliases' is not enabled"
    );
  }

  #[test]
  fn unrestricted_allows_everything() {
    assert!(Unrestricted.check(Feature::GroupAliases).is_ok());
  }
}
