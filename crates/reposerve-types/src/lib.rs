//! Domain types for reposerve.
//!
//! A backup repository served over the REST object protocol holds six fixed
//! kinds of objects. This crate names those kinds and validates the
//! identifiers clients use to address individual objects. It performs no I/O
//! and every other reposerve crate depends on it.
//!
//! # Key Types
//!
//! - [`ObjectClass`]: one of `config`, `data`, `index`, `keys`, `locks`, `snapshots`
//! - [`ClassTraits`]: per-class behavior flags (sharding, singleton, immutability)
//! - [`ObjectName`]: a validated object identifier within a class

pub mod class;
pub mod error;
pub mod name;

pub use class::{ClassTraits, ObjectClass, SHARD_PREFIX_LEN};
pub use error::TypeError;
pub use name::{ObjectName, MAX_NAME_LEN};
