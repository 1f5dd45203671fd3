//! Package linkers for Kiln.
//!
//! A package file is a summary, a name table, an import table, an export
//! table and the serialized export bodies. [`LinkerLoad`] reads the tables
//! and creates objects on demand; [`save_package`] writes them.
//!
//! # Key Types
//!
//! - [`LinkerLoad`] -- one attached package file and its tables
//! - [`LinkerManager`] -- linker slab, load scope bookkeeping, redirect listeners
//! - [`LoadContext`] -- lazy export creation, import resolution, preloading
//! - [`PackageFileSummary`] -- file header, including the compressed chunk table
//! - [`ObjectImport`] / [`ObjectExport`] -- table entries
//! - [`LinkerConfig`] -- hashing, editor mode, property format, compression
//!
//! # Loading
//!
//! [`LoadContext::get_package_linker`] opens a package through a
//! [`PackageStore`](kiln_store::PackageStore) and initializes its linker.
//! Objects are created by [`LoadContext::create_export`] and filled in by
//! [`LoadContext::preload`]; references to other packages are resolved by
//! [`LoadContext::verify_import`], which loads those packages in turn.

mod archive;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod load;
pub mod manager;
pub mod resource;
pub mod save;
pub mod summary;

pub use compression::{compress_package, plan_chunks, CompressedReader};
pub use config::{CompressionConfig, LinkerConfig};
pub use context::LoadContext;
pub use error::{LinkerError, LinkerResult};
pub use load::{LinkerLoad, LinkerState, EXPORT_HASH_BUCKETS};
pub use manager::{LinkerManager, ObjectSerializeContext, RedirectListener, RedirectorFollowed};
pub use resource::{ObjectExport, ObjectImport, EXPORT_ENTRY_SIZE, IMPORT_ENTRY_SIZE};
pub use save::{save_package, SaveGuard};
pub use summary::{CompressedChunk, PackageFileSummary};

#[cfg(test)]
mod test_support;
