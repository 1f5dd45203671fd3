//! Property reflection for the Kiln object system.
//!
//! Classes and structs describe their fields with [`Property`] descriptors.
//! Instances store one [`PropertyValue`] per slot, and everything that needs
//! to walk object data generically (serialization, the garbage collector,
//! the save tagger) does so through these descriptors.
//!
//! # Key Types
//!
//! - [`PropertyKind`] -- closed set of field types
//! - [`PropertyValue`] -- storage for one element of a field
//! - [`Property`] -- field descriptor with slot offset, arity and flags
//! - [`StructDef`] / [`TypeRegistry`] -- named struct layouts
//! - [`ClassDef`] -- class descriptor with its flattened layout
//! - [`ReferenceTokenStream`] -- flattened list of reference slots
//!
//! # Serialization
//!
//! [`serialize_properties`] writes either the tagged layout, which tolerates
//! added, removed and retyped fields, or the compact binary layout used by
//! cooked packages. See [`serialize`] for the formats.

pub mod class;
pub mod error;
pub mod kind;
pub mod property;
pub mod serialize;
pub mod structs;
pub mod tokens;
pub mod value;

pub use class::ClassDef;
pub use error::{ReflectError, ReflectResult};
pub use kind::PropertyKind;
pub use property::{default_values, layout_properties, LayoutInfo, Property};
pub use serialize::{
    serialize_binary, serialize_class_def, serialize_kind, serialize_properties, serialize_tagged,
    serialize_value,
};
pub use structs::{StructDef, TypeRegistry};
pub use tokens::{RefToken, ReferenceTokenStream};
pub use value::{AssetRef, Color, PropertyValue, Rotator, Vector};
