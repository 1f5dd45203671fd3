//! Error types for package linkers.

use kiln_object::ObjectError;
use kiln_reflect::ReflectError;
use kiln_store::StoreError;
use kiln_types::{LinkerId, ObjectHandle};

/// Errors from loading or saving packages.
#[derive(Debug, thiserror::Error)]
pub enum LinkerError {
    /// The file does not start with the package tag.
    #[error("bad package tag {found:#010x}")]
    BadTag { found: u32 },

    /// The file was written by a format version this build cannot read.
    #[error("package version {version} is older than the minimum supported {min}")]
    VersionTooOld { version: u32, min: u32 },

    /// No package with this name exists in the package store.
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// The linker was detached or never existed.
    #[error("unknown linker {0:?}")]
    UnknownLinker(LinkerId),

    /// The linker's stream was released and the export is not loaded yet.
    #[error("linker for {0} has no loader")]
    NoLoader(String),

    /// A package index points past the end of its table.
    #[error("{table} index {index} out of range ({len} entries)")]
    IndexOutOfRange {
        table: &'static str,
        index: usize,
        len: usize,
    },

    /// The object to save is not a package.
    #[error("object {0} is not a package")]
    NotAPackage(ObjectHandle),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Reflect(#[from] ReflectError),
}

/// Convenience alias for linker results.
pub type LinkerResult<T> = Result<T, LinkerError>;
