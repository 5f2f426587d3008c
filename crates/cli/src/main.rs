mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use idstore_lib::identity::IdentityError;

use cmd::{GroupAliasCommand, GroupCommand, cmd_group, cmd_group_alias, cmd_mounts, load_config};
use output::{OutputFormat, print_error};

/// Exit status for requests rejected because of their input.
const EXIT_INVALID_REQUEST: u8 = 2;

/// idstore - group alias binding for an identity store
#[derive(Parser)]
#[command(name = "idstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the configuration file
  #[arg(long, global = true, env = "IDSTORE_CONFIG")]
  config: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Register, update, read, delete and list group aliases
  #[command(subcommand)]
  GroupAlias(GroupAliasCommand),

  /// Create, read and list groups
  #[command(subcommand)]
  Group(GroupCommand),

  /// List configured auth mounts
  Mounts {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn init_logging(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let config = load_config(cli.config.as_deref())?;

  match cli.command {
    Commands::GroupAlias(command) => cmd_group_alias(&config, command),
    Commands::Group(command) => cmd_group(&config, command),
    Commands::Mounts { output } => cmd_mounts(&config, output),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      let invalid_request = err
        .downcast_ref::<IdentityError>()
        .is_some_and(IdentityError::is_user_error);
      if invalid_request {
        ExitCode::from(EXIT_INVALID_REQUEST)
      } else {
        ExitCode::FAILURE
      }
    }
  }
}
