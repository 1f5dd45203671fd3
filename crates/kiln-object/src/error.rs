//! Error types for the object graph.

use kiln_reflect::ReflectError;
use kiln_store::StoreError;
use kiln_types::{Name, NameTable, ObjectHandle};

/// Errors from object graph operations.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// The handle refers to a freed slot or a slot reused by another object.
    #[error("stale object handle {0}")]
    StaleHandle(ObjectHandle),

    /// The object is expected to be a class but is not.
    #[error("object {0} is not a class")]
    NotAClass(ObjectHandle),

    /// The object has no property storage (it is a class or a package).
    #[error("object {0} is not an instance")]
    NotAnInstance(ObjectHandle),

    /// The object is expected to be a package but is not.
    #[error("object {0} is not a package")]
    NotAPackage(ObjectHandle),

    /// Abstract classes cannot be instantiated.
    #[error("class {0} is abstract")]
    AbstractClass(String),

    /// The class layout has not been computed yet.
    #[error("class {0} is not linked")]
    ClassNotLinked(String),

    /// An object already exists at this path with a different class.
    #[error("cannot replace {path}: existing object is a {existing}, requested {requested}")]
    ClassMismatch {
        path: String,
        existing: String,
        requested: String,
    },

    /// A class with this name is already registered in the package.
    #[error("class {0} is already registered")]
    DuplicateClass(String),

    /// The class layout has no property with this name.
    #[error("class {class} has no property {property}")]
    UnknownProperty { class: String, property: String },

    /// A property declaration refers to an unknown name or type.
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    #[error(transparent)]
    Reflect(#[from] ReflectError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ObjectError {
    pub(crate) fn unknown_property(class: &str, property: Name, names: &NameTable) -> Self {
        ObjectError::UnknownProperty {
            class: class.to_owned(),
            property: names.resolve(property).to_owned(),
        }
    }
}

/// Convenience alias for object graph results.
pub type ObjectResult<T> = Result<T, ObjectError>;
