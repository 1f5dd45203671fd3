//! The Kiln object graph and garbage collector.
//!
//! Every object lives in a slot of the [`ObjectGraph`] and is addressed by a
//! generation-checked [`ObjectHandle`](kiln_types::ObjectHandle). Objects are
//! instances (property values plus optional native state), classes, or
//! packages. The graph also owns the name table, the struct registry and the
//! native constructors, so it outlives every linker that refers to it.
//!
//! # Key Types
//!
//! - [`ObjectGraph`] -- slot table, lookup, construction, class registry
//! - [`ObjectRecord`] / [`ObjectBody`] -- one live object
//! - [`NativeObject`] -- lifecycle and serialization hooks for native state
//! - [`ClassBuilder`] / [`PropertyDecl`] -- class and struct registration
//! - [`GcReport`] / [`DestroyState`] -- collection results and progress
//! - [`GcConfig`] -- collector configuration
//!
//! # Collection
//!
//! [`ObjectGraph::collect_garbage`] marks from the root set, begins
//! destruction of everything unreachable and either purges immediately or
//! leaves the work to [`ObjectGraph::incremental_purge_garbage`].

pub mod config;
pub mod error;
pub mod gc;
pub mod graph;
pub mod native;
pub mod record;
pub mod serialize;

pub use config::GcConfig;
pub use error::{ObjectError, ObjectResult};
pub use gc::{DestroyState, GcReport};
pub use graph::{ClassBuilder, ObjectGraph, PropertyDecl, SerialBody, SerialState};
pub use native::{NativeFactory, NativeObject, NativeRegistry};
pub use record::{InstanceData, LinkerLink, ObjectBody, ObjectRecord, PackageState};
pub use serialize::serialize_object_body;
