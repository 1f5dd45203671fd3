//! Byte streams, archives and package storage for Kiln.
//!
//! The persistence layer touches storage only through the contracts in this
//! crate, so packages can live on disk, in memory, or anywhere else a
//! [`PackageStore`] can be implemented.
//!
//! # Streams
//!
//! - [`ByteStream`] -- seekable byte stream with a format version
//! - [`MemoryStream`] -- growable in-memory buffer
//! - [`FileStream`] -- file on disk, opened for read or for write/append
//!
//! # Archives
//!
//! - [`Archive`] -- bidirectional serializer with name and object hooks
//! - [`ArchiveExt`] -- primitive helpers available on every archive
//! - [`MemoryArchive`] -- self-contained in-memory archive
//!
//! # Package Stores
//!
//! All backends implement the [`PackageStore`] trait:
//!
//! - [`InMemoryPackageStore`] -- `HashMap`-based store for tests and embedding
//! - [`DirectoryPackageStore`] -- directory tree scanned for `*.lpk` files

pub mod archive;
pub mod error;
pub mod file;
pub mod memory;
pub mod stream;
pub mod traits;

pub use archive::{Archive, ArchiveExt, MemoryArchive};
pub use error::{StoreError, StoreResult};
pub use file::{DirectoryPackageStore, FileStream, PACKAGE_EXTENSION};
pub use memory::{InMemoryPackageStore, MemoryStream};
pub use stream::{ByteStream, StreamExt};
pub use traits::{package_name_from_file, PackageStore};
