#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// Allocator binding used for every bucket array.
pub mod allocator;

/// Table construction options.
pub mod config;

pub mod error;

/// Bundled hash functions with a `(data, seed0, seed1) -> u64` signature.
pub mod hash;

pub mod hash_table;

pub mod ops;

#[cfg(all(test, feature = "std"))]
mod hash_table_proptest;

pub use config::TableConfig;
pub use error::TableError;
pub use hash_table::HashTable;
pub use ops::ElementOps;
