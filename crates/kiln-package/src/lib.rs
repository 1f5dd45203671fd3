//! Package management for Kiln.
//!
//! [`Runtime`] ties an object graph, its package linkers and a package
//! store together and exposes the package-level operations: nested load
//! scopes, loading and saving packages, object lookup, garbage collection
//! and redirector notifications.
//!
//! # Key Types
//!
//! - [`Runtime`] -- the package manager facade
//! - [`RuntimeConfig`] -- collector and linker configuration, loadable from TOML
//! - [`PackageError`] -- errors surfaced by the runtime

pub mod config;
pub mod error;
pub mod runtime;


pub use config::RuntimeConfig;
pub use error::{PackageError, PackageResult};
pub use runtime::Runtime;
