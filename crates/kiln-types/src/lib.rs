//! Foundation types for the Kiln object persistence engine.
//!
//! Every other Kiln crate depends on `kiln-types`.
//!
//! # Key Types
//!
//! - [`Name`] / [`NameTable`] -- interned strings with stable indices
//! - [`PackageIndex`] -- signed reference into a package's import/export tables
//! - [`ObjectHandle`] -- generation-checked handle into the object slot table
//! - [`LinkerId`] -- handle to a loaded package linker
//! - [`Guid`] -- package identifier
//! - [`ObjectFlags`], [`PackageFlags`], [`PropertyFlags`], [`ClassFlags`]
//! - [`version`] -- file tag and format version constants

pub mod error;
pub mod flags;
pub mod guid;
pub mod handle;
pub mod index;
pub mod name;
pub mod version;

pub use error::TypeError;
pub use flags::{ClassFlags, ObjectFlags, PackageFlags, PropertyFlags};
pub use guid::Guid;
pub use handle::{LinkerId, ObjectHandle};
pub use index::PackageIndex;
pub use name::{known, Name, NameTable};
