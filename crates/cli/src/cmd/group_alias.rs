use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use serde::Serialize;

use idstore_lib::config::Config;
use idstore_lib::gate::Feature;
use idstore_lib::identity::{AliasView, GroupAliasRequest, RegisterResponse};
use idstore_lib::store_lock::LockMode;

use super::Session;
use crate::output::{
  OutputFormat, format_timestamp, print_info, print_json, print_stat, print_success, print_warning,
};

/// Alias fields shared by `register` and `update`.
#[derive(Args, Debug)]
pub struct AliasFields {
  /// Alias name as known to the auth mount
  #[arg(long)]
  name: Option<String>,

  /// Accessor of the auth mount the alias belongs to
  #[arg(long)]
  mount_accessor: Option<String>,

  /// Group to place the alias in; on update, a different group transfers it
  #[arg(long)]
  group_id: Option<String>,
}

impl AliasFields {
  fn into_request(self, id: Option<String>) -> GroupAliasRequest {
    GroupAliasRequest {
      id,
      name: self.name,
      mount_accessor: self.mount_accessor,
      group_id: self.group_id,
    }
  }
}

#[derive(Subcommand, Debug)]
pub enum GroupAliasCommand {
  /// Create a group alias, or update one when --id is given
  Register {
    /// Existing alias to update
    #[arg(long)]
    id: Option<String>,

    #[command(flatten)]
    fields: AliasFields,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Update an existing group alias
  Update {
    /// Alias ID to update
    id: String,

    #[command(flatten)]
    fields: AliasFields,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show a group alias
  Read {
    /// Alias ID to show
    id: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Delete a group alias (succeeds if it does not exist)
  Delete {
    /// Alias ID to delete
    id: String,
  },

  /// List group alias IDs
  List {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

pub fn cmd_group_alias(config: &Config, command: GroupAliasCommand) -> Result<()> {
  match command {
    GroupAliasCommand::Register { id, fields, output } => cmd_register(config, fields.into_request(id), output),
    GroupAliasCommand::Update { id, fields, output } => cmd_update(config, &id, fields.into_request(None), output),
    GroupAliasCommand::Read { id, output } => cmd_read(config, &id, output),
    GroupAliasCommand::Delete { id } => cmd_delete(config, &id),
    GroupAliasCommand::List { output } => cmd_list(config, output),
  }
}

fn cmd_register(config: &Config, request: GroupAliasRequest, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, Feature::GroupAliases, LockMode::Exclusive, "group-alias register")?;
  let updating = request.id.as_deref().is_some_and(|id| !id.is_empty());
  let response = session.store.register_group_alias(&request)?;
  print_response(&response, updating, output)
}

fn cmd_update(config: &Config, id: &str, request: GroupAliasRequest, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, Feature::GroupAliases, LockMode::Exclusive, "group-alias update")?;
  let response = session.store.update_group_alias_by_id(id, &request)?;
  print_response(&response, true, output)
}

fn print_response(response: &RegisterResponse, updated: bool, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    return print_json(response);
  }

  for warning in &response.warnings {
    print_warning(warning);
  }
  let verb = if updated { "Updated" } else { "Registered" };
  print_success(&format!("{} group alias {}", verb, response.id));
  print_stat("Group", &response.group_id);
  Ok(())
}

fn cmd_read(config: &Config, id: &str, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, Feature::GroupAliases, LockMode::Shared, "group-alias read")?;
  let Some(alias) = session.store.read_group_alias(id)? else {
    bail!("group alias {:?} not found", id);
  };

  if output.is_json() {
    print_json(&alias)
  } else {
    print_alias(&alias);
    Ok(())
  }
}

fn print_alias(alias: &AliasView) {
  println!("{}", alias.id);
  print_stat("Name", &alias.name);
  print_stat("Mount accessor", &alias.mount_accessor);
  print_stat("Mount type", &alias.mount_type);
  print_stat("Group", &alias.group_id);
  print_stat("Created", &format_timestamp(alias.creation_time));
  print_stat("Updated", &format_timestamp(alias.last_update_time));
}

fn cmd_delete(config: &Config, id: &str) -> Result<()> {
  let session = Session::open(config, Feature::GroupAliases, LockMode::Exclusive, "group-alias delete")?;
  session.store.delete_group_alias(id)?;
  print_success(&format!("Deleted group alias {}", id));
  Ok(())
}

fn cmd_list(config: &Config, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, Feature::GroupAliases, LockMode::Shared, "group-alias list")?;
  let ids = session.store.list_group_alias_ids();

  if output.is_json() {
    #[derive(Serialize)]
    struct ListOutput<'a> {
      keys: Vec<&'a str>,
    }

    return print_json(&ListOutput {
      keys: ids.iter().collect(),
    });
  }

  if ids.is_empty() {
    print_info("No group aliases found");
    return Ok(());
  }
  for id in &ids {
    println!("{}", id);
  }
  print_info(&format!("{} group alias(es) total", ids.len()));
  Ok(())
}
