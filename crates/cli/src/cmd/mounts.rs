use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use idstore_lib::config::Config;
use idstore_lib::mount::MountEntry;

use crate::output::{OutputFormat, print_info, print_json, symbols};

/// List the auth mounts group aliases may reference.
pub fn cmd_mounts(config: &Config, output: OutputFormat) -> Result<()> {
  let table = config.mount_table();

  if output.is_json() {
    let mounts: Vec<&MountEntry> = table.entries().collect();
    return print_json(&mounts);
  }

  if table.is_empty() {
    print_info("No mounts configured");
    return Ok(());
  }
  for mount in table.entries() {
    println!(
      "{} {} {} ({})",
      mount.accessor,
      symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      mount.mount_type,
      mount.path
    );
  }
  print_info(&format!("{} mount(s) configured", table.len()));
  Ok(())
}
