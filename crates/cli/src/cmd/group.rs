use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use clap::Subcommand;
use serde::Serialize;

use idstore_lib::config::Config;
use idstore_lib::gate::Feature;
use idstore_lib::identity::{Group, GroupRequest};
use idstore_lib::store_lock::LockMode;

use super::Session;
use crate::output::{OutputFormat, format_timestamp, print_info, print_json, print_stat, print_success};

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
  /// Create a group
  Create {
    /// Group name (defaults to group_<id>)
    #[arg(long)]
    name: Option<String>,

    /// Policy attached to the group (repeatable)
    #[arg(long = "policy")]
    policies: Vec<String>,

    /// Metadata entry as KEY=VALUE (repeatable)
    #[arg(long = "meta", value_parser = parse_key_val)]
    metadata: Vec<(String, String)>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show a group and its aliases
  Read {
    /// Group ID to show
    id: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// List group IDs
  List {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn parse_key_val(s: &str) -> Result<(String, String)> {
  let (key, value) = s
    .split_once('=')
    .ok_or_else(|| anyhow!("expected KEY=VALUE, got {:?}", s))?;
  if key.is_empty() {
    bail!("metadata key must not be empty");
  }
  Ok((key.to_string(), value.to_string()))
}

pub fn cmd_group(config: &Config, command: GroupCommand) -> Result<()> {
  match command {
    GroupCommand::Create {
      name,
      policies,
      metadata,
      output,
    } => {
      let request = GroupRequest {
        name,
        policies,
        metadata: metadata.into_iter().collect::<BTreeMap<_, _>>(),
      };
      cmd_create(config, &request, output)
    }
    GroupCommand::Read { id, output } => cmd_read(config, &id, output),
    GroupCommand::List { output } => cmd_list(config, output),
  }
}

fn cmd_create(config: &Config, request: &GroupRequest, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, Feature::Groups, LockMode::Exclusive, "group create")?;
  let group = session.store.create_group(request)?;

  if output.is_json() {
    #[derive(Serialize)]
    struct CreateOutput<'a> {
      id: &'a str,
      name: &'a str,
    }

    return print_json(&CreateOutput {
      id: &group.id,
      name: &group.name,
    });
  }

  print_success(&format!("Created group {}", group.id));
  print_stat("Name", &group.name);
  Ok(())
}

fn cmd_read(config: &Config, id: &str, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, Feature::Groups, LockMode::Shared, "group read")?;
  let Some(group) = session.store.read_group(id)? else {
    bail!("group {:?} not found", id);
  };

  if output.is_json() {
    print_json(&group)
  } else {
    print_group(&group);
    Ok(())
  }
}

fn print_group(group: &Group) {
  println!("{}", group.id);
  print_stat("Name", &group.name);
  if !group.policies.is_empty() {
    print_stat("Policies", &group.policies.join(", "));
  }
  for (key, value) in &group.metadata {
    print_stat(&format!("Metadata {}", key), value);
  }
  print_stat("Created", &format_timestamp(group.creation_time));
  print_stat("Updated", &format_timestamp(group.last_update_time));

  if group.aliases.is_empty() {
    print_stat("Aliases", "none");
  } else {
    print_stat("Aliases", &group.aliases.len().to_string());
    for alias in &group.aliases {
      println!("    {} {} ({})", alias.id, alias.name, alias.mount_accessor);
    }
  }
}

fn cmd_list(config: &Config, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, Feature::Groups, LockMode::Shared, "group list")?;
  let ids = session.store.list_group_ids();

  if output.is_json() {
    #[derive(Serialize)]
    struct ListOutput {
      keys: Vec<String>,
    }

    return print_json(&ListOutput { keys: ids });
  }

  if ids.is_empty() {
    print_info("No groups found");
    return Ok(());
  }
  for id in &ids {
    println!("{}", id);
  }
  print_info(&format!("{} group(s) total", ids.len()));
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_key_val_splits_on_first_equals() {
    assert_eq!(
      parse_key_val("team=a=b").unwrap(),
      ("team".to_string(), "a=b".to_string())
    );
    assert_eq!(parse_key_val("empty=").unwrap(), ("empty".to_string(), String::new()));
    assert!(parse_key_val("novalue").is_err());
    assert!(parse_key_val("=value").is_err());
  }
}
