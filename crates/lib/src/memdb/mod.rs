//! Transactional in-memory index over groups and their aliases.
//!
//! Readers take a [`ReadTxn`], a point-in-time snapshot that never observes
//! a later commit. Writers take a [`WriteTxn`]; only one exists at a time and
//! its changes become visible atomically on [`WriteTxn::commit`]. Dropping a
//! write transaction without committing discards it.
//!
//! Indexes kept per generation:
//!
//! | index                          | unique |
//! |--------------------------------|--------|
//! | group by id                    | yes    |
//! | group by name                  | yes    |
//! | alias by id                    | yes    |
//! | alias by (mount_accessor, name)| yes    |
//! | group by alias id              | yes    |

mod tables;

pub use tables::Tables;

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::identity::types::Group;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
  #[error("missing ID for {table} entry")]
  MissingId { table: &'static str },

  #[error("unique index '{index}' violated by '{value}'")]
  UniqueViolation { index: &'static str, value: String },
}

#[derive(Debug)]
struct Root {
  tables: Arc<Tables>,
  generation: u64,
}

#[derive(Debug)]
pub struct MemDb {
  root: RwLock<Root>,
  writer: Mutex<()>,
  notify: watch::Sender<u64>,
}

impl Default for MemDb {
  fn default() -> Self {
    Self::new()
  }
}

impl MemDb {
  pub fn new() -> Self {
    let (notify, _) = watch::channel(0);
    Self {
      root: RwLock::new(Root {
        tables: Arc::new(Tables::default()),
        generation: 0,
      }),
      writer: Mutex::new(()),
      notify,
    }
  }

  /// Snapshot of the latest committed generation.
  pub fn txn(&self) -> ReadTxn {
    let root = self.root.read();
    ReadTxn {
      tables: Arc::clone(&root.tables),
      generation: root.generation,
      notify: self.notify.subscribe(),
    }
  }

  /// Begin the single write transaction, waiting for any other writer to finish.
  pub fn write_txn(&self) -> WriteTxn<'_> {
    let guard = self.writer.lock();
    let (tables, base) = {
      let root = self.root.read();
      ((*root.tables).clone(), root.generation)
    };
    trace!(base_generation = base, "write transaction started");
    WriteTxn {
      db: self,
      _writer: guard,
      tables,
      dirty: false,
    }
  }

  /// Receiver that is notified with the new generation after each commit.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.notify.subscribe()
  }

  pub fn generation(&self) -> u64 {
    self.root.read().generation
  }
}

/// Read-only snapshot of the index.
#[derive(Debug, Clone)]
pub struct ReadTxn {
  tables: Arc<Tables>,
  generation: u64,
  notify: watch::Receiver<u64>,
}

impl ReadTxn {
  /// Generation this snapshot was taken at.
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Whether a commit has happened since this snapshot was taken.
  pub fn is_stale(&self) -> bool {
    *self.notify.borrow() != self.generation
  }

  /// Wait until a generation newer than this snapshot is committed.
  pub async fn wait_for_change(&mut self) {
    let generation = self.generation;
    // The sender lives as long as the database; an error means it is gone.
    let _ = self.notify.wait_for(|current| *current != generation).await;
  }
}

impl Deref for ReadTxn {
  type Target = Tables;

  fn deref(&self) -> &Tables {
    &self.tables
  }
}

/// Staged changes against the index; visible to others only after commit.
pub struct WriteTxn<'a> {
  db: &'a MemDb,
  _writer: MutexGuard<'a, ()>,
  tables: Tables,
  dirty: bool,
}

impl WriteTxn<'_> {
  pub fn upsert_group(&mut self, group: &Group) -> Result<(), IndexError> {
    self.tables.upsert_group(group)?;
    self.dirty = true;
    Ok(())
  }

  /// Publish the staged tables as a new generation and return it.
  pub fn commit(mut self) -> u64 {
    if !self.dirty {
      return self.db.generation();
    }
    let tables = std::mem::take(&mut self.tables);
    let mut root = self.db.root.write();
    root.tables = Arc::new(tables);
    root.generation += 1;
    let generation = root.generation;
    self.db.notify.send_replace(generation);
    self.dirty = false;
    debug!(generation, "index transaction committed");
    generation
  }
}

impl Deref for WriteTxn<'_> {
  type Target = Tables;

  fn deref(&self) -> &Tables {
    &self.tables
  }
}

impl Drop for WriteTxn<'_> {
  fn drop(&mut self) {
    if self.dirty {
      trace!("write transaction aborted");
    }
  }
}
