//! idstore-lib: group alias binding for an identity store
//!
//! The crate is layered bottom-up:
//! - `storagepacker`: bucket-sharded persistence of group records
//! - `memdb`: transactional in-memory index with snapshot reads
//! - `mount`: resolution of mount accessors
//! - `identity`: the engine that registers, transfers, reads and deletes group aliases
//!
//! `config`, `gate`, `platform` and `store_lock` wire the engine into a process.

pub mod config;
pub mod consts;
pub mod gate;
pub mod identity;
pub mod memdb;
pub mod mount;
pub mod platform;
pub mod storagepacker;
pub mod store_lock;
