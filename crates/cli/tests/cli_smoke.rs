//! CLI smoke tests for idstore.
//!
//! Each test gets its own config file and storage directory, then drives the
//! binary through register/update/read/delete/list and checks the output and
//! exit status.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use serial_test::serial;
use tempfile::TempDir;

const USERPASS: &str = "auth_userpass_1234";

/// A scratch environment: config file plus storage directory.
struct Env {
  temp: TempDir,
}

impl Env {
  fn new() -> Self {
    Self::with_features("")
  }

  fn with_features(features: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let config = format!(
      r#"
[storage]
path = "{storage}"
bucket_count = 16

[[mounts]]
accessor = "auth_userpass_1234"
type = "userpass"
path = "userpass/"

[[mounts]]
accessor = "auth_ldap_5678"
type = "ldap"
path = "ldap/"

{features}
"#,
      storage = temp.path().join("storage").display().to_string().replace('\\', "/"),
    );
    std::fs::write(temp.path().join("config.toml"), config).unwrap();
    Self { temp }
  }

  fn config_path(&self) -> PathBuf {
    self.temp.path().join("config.toml")
  }

  fn storage(&self) -> PathBuf {
    self.temp.path().join("storage")
  }

  /// Get a Command for the idstore binary bound to this environment.
  fn cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("idstore");
    cmd
      .env("IDSTORE_CONFIG", self.config_path())
      .env_remove("IDSTORE_STORAGE")
      .env_remove("RUST_LOG");
    cmd
  }

  /// Run a command with `-o json` and parse stdout.
  fn json(&self, args: &[&str]) -> Value {
    let output = self.cmd().args(args).args(["-o", "json"]).output().unwrap();
    assert!(
      output.status.success(),
      "command {:?} failed: {}",
      args,
      String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
  }

  fn register(&self, name: &str, extra: &[&str]) -> Value {
    let mut args = vec!["group-alias", "register", "--name", name, "--mount-accessor", USERPASS];
    args.extend_from_slice(extra);
    self.json(&args)
  }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
  value[key].as_str().unwrap_or_else(|| panic!("missing {key} in {value}"))
}

fn has_bucket_files(storage: &Path) -> bool {
  std::fs::read_dir(storage.join("packer/group/buckets"))
    .map(|entries| entries.count() > 0)
    .unwrap_or(false)
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cargo_bin_cmd!("idstore")
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cargo_bin_cmd!("idstore")
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("idstore"));
}

#[test]
fn subcommand_help_works() {
  for args in [
    ["group-alias", "register"],
    ["group-alias", "update"],
    ["group-alias", "read"],
    ["group-alias", "delete"],
    ["group-alias", "list"],
    ["group", "create"],
  ] {
    cargo_bin_cmd!("idstore")
      .args(args)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// group-alias register / read
// =============================================================================

#[test]
#[serial]
fn register_creates_group_and_persists() {
  let env = Env::new();
  let resp = env.register("alice", &[]);
  let alias_id = str_field(&resp, "id");
  let group_id = str_field(&resp, "group_id");
  assert!(resp.get("warnings").is_none());
  assert!(has_bucket_files(&env.storage()));

  let alias = env.json(&["group-alias", "read", alias_id]);
  assert_eq!(str_field(&alias, "name"), "alice");
  assert_eq!(str_field(&alias, "mount_type"), "userpass");
  assert_eq!(str_field(&alias, "group_id"), group_id);

  let group = env.json(&["group", "read", group_id]);
  assert_eq!(group["aliases"].as_array().unwrap().len(), 1);
  assert_eq!(str_field(&group, "name"), format!("group_{group_id}"));
}

#[test]
#[serial]
fn register_text_output() {
  let env = Env::new();
  env
    .cmd()
    .args(["group-alias", "register", "--name", "alice", "--mount-accessor", USERPASS])
    .assert()
    .success()
    .stdout(predicate::str::contains("Registered group alias"))
    .stdout(predicate::str::contains("Group"));
}

#[test]
#[serial]
fn duplicate_register_is_rejected() {
  let env = Env::new();
  env.register("alice", &[]);

  env
    .cmd()
    .args(["group-alias", "register", "--name", "alice", "--mount-accessor", USERPASS])
    .assert()
    .code(2)
    .stderr(predicate::str::contains(
      "combination of mount and group alias name is already in use",
    ));

  let list = env.json(&["group-alias", "list"]);
  assert_eq!(list["keys"].as_array().unwrap().len(), 1);
}

#[test]
#[serial]
fn validation_errors_exit_with_invalid_request() {
  let env = Env::new();

  env
    .cmd()
    .args(["group-alias", "register", "--mount-accessor", USERPASS])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("missing alias name"));

  env
    .cmd()
    .args(["group-alias", "register", "--name", "alice"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("missing mount_accessor"));

  env
    .cmd()
    .args(["group-alias", "register", "--name", "alice", "--mount-accessor", "auth_nope"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("invalid mount accessor"));

  env
    .cmd()
    .args([
      "group-alias",
      "register",
      "--name",
      "alice",
      "--mount-accessor",
      USERPASS,
      "--group-id",
      "missing",
    ])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("invalid group ID"));

  env
    .cmd()
    .args(["group-alias", "update", "missing", "--name", "alice", "--mount-accessor", USERPASS])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("invalid group alias ID"));

  env
    .cmd()
    .args(["group-alias", "read", ""])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("empty group alias id"));
}

#[test]
#[serial]
fn read_unknown_alias_fails() {
  let env = Env::new();
  env
    .cmd()
    .args(["group-alias", "read", "does-not-exist"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("not found"));
}

// =============================================================================
// group-alias update / transfer
// =============================================================================

#[test]
#[serial]
fn update_transfers_between_groups_with_warning() {
  let env = Env::new();
  let alias = env.register("alice", &[]);
  let alias_id = str_field(&alias, "id");
  let from = str_field(&alias, "group_id");
  let target = env.json(&["group", "create", "--name", "target"]);
  let to = str_field(&target, "id");

  env
    .cmd()
    .args([
      "group-alias",
      "update",
      alias_id,
      "--name",
      "alice",
      "--mount-accessor",
      USERPASS,
      "--group-id",
      to,
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Updated group alias"))
    .stderr(predicate::str::contains("group alias is being transferred"));

  let old_group = env.json(&["group", "read", from]);
  assert!(old_group["aliases"].as_array().unwrap().is_empty());
  let new_group = env.json(&["group", "read", to]);
  assert_eq!(str_field(&new_group["aliases"][0], "id"), alias_id);
  assert_eq!(str_field(&env.json(&["group-alias", "read", alias_id]), "group_id"), to);
}

#[test]
#[serial]
fn register_with_id_updates_in_place() {
  let env = Env::new();
  let alias = env.register("alice", &[]);
  let alias_id = str_field(&alias, "id");

  let resp = env.json(&[
    "group-alias",
    "register",
    "--id",
    alias_id,
    "--name",
    "alicia",
    "--mount-accessor",
    "auth_ldap_5678",
  ]);
  assert_eq!(str_field(&resp, "id"), alias_id);
  assert_eq!(str_field(&resp, "group_id"), str_field(&alias, "group_id"));

  let view = env.json(&["group-alias", "read", alias_id]);
  assert_eq!(str_field(&view, "name"), "alicia");
  assert_eq!(str_field(&view, "mount_type"), "ldap");
}

// =============================================================================
// group-alias delete / list
// =============================================================================

#[test]
#[serial]
fn delete_is_idempotent() {
  let env = Env::new();
  let alias = env.register("alice", &[]);
  let alias_id = str_field(&alias, "id");

  for _ in 0..2 {
    env
      .cmd()
      .args(["group-alias", "delete", alias_id])
      .assert()
      .success()
      .stdout(predicate::str::contains("Deleted group alias"));
  }

  let list = env.json(&["group-alias", "list"]);
  assert!(list["keys"].as_array().unwrap().is_empty());

  // The group outlives its last alias.
  let group = env.json(&["group", "read", str_field(&alias, "group_id")]);
  assert!(group["aliases"].as_array().unwrap().is_empty());
}

#[test]
#[serial]
fn list_reports_all_aliases() {
  let env = Env::new();
  env
    .cmd()
    .args(["group-alias", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No group aliases found"));

  let ids: Vec<String> = ["alice", "bob", "carol"]
    .iter()
    .map(|name| str_field(&env.register(name, &[]), "id").to_string())
    .collect();

  let list = env.json(&["group-alias", "list"]);
  let mut listed: Vec<String> = list["keys"]
    .as_array()
    .unwrap()
    .iter()
    .map(|v| v.as_str().unwrap().to_string())
    .collect();
  let mut expected = ids.clone();
  listed.sort();
  expected.sort();
  assert_eq!(listed, expected);

  env
    .cmd()
    .args(["group-alias", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("3 group alias(es) total"));
}

// =============================================================================
// group / mounts
// =============================================================================

#[test]
#[serial]
fn group_create_with_attributes() {
  let env = Env::new();
  let created = env.json(&[
    "group",
    "create",
    "--name",
    "infra",
    "--policy",
    "ops",
    "--policy",
    "deploy",
    "--meta",
    "team=platform",
  ]);
  let group_id = str_field(&created, "id");

  let group = env.json(&["group", "read", group_id]);
  assert_eq!(group["policies"], serde_json::json!(["ops", "deploy"]));
  assert_eq!(group["metadata"]["team"], "platform");

  env
    .cmd()
    .args(["group", "create", "--name", "infra"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("group name is already in use"));
}

#[test]
#[serial]
fn mounts_lists_configured_accessors() {
  let env = Env::new();
  env
    .cmd()
    .arg("mounts")
    .assert()
    .success()
    .stdout(predicate::str::contains(USERPASS))
    .stdout(predicate::str::contains("2 mount(s) configured"));
}

// =============================================================================
// Error Handling
// =============================================================================

#[test]
#[serial]
fn disabled_feature_is_refused() {
  let env = Env::with_features("[features]\ngroup_aliases = false\n");
  env
    .cmd()
    .args(["group-alias", "list"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not enabled"));

  env.cmd().args(["group", "list"]).assert().success();
}

#[test]
#[serial]
fn invalid_config_fails() {
  let env = Env::new();
  std::fs::write(env.config_path(), "this is not [valid toml").unwrap();

  env
    .cmd()
    .args(["group-alias", "list"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load config"));
}
