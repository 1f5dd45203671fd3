use kiln_store::StoreError;
use kiln_types::Name;

/// Errors from reflection and property serialization.
#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    /// A value does not match the property's declared kind.
    #[error("property {property:?} expects {expected}, got {actual}")]
    TypeMismatch {
        property: Name,
        expected: &'static str,
        actual: &'static str,
    },

    /// A struct property names a struct that was never registered.
    #[error("unknown struct type {0:?}")]
    UnknownStruct(Name),

    /// A struct embeds itself by value (only arrays of itself are allowed).
    #[error("struct {0:?} contains itself by value")]
    RecursiveStruct(Name),

    #[error("struct {0:?} is already registered")]
    DuplicateStruct(Name),

    /// A type name read from a package is not a known property type.
    #[error("unknown property type {0:?}")]
    UnknownPropertyType(Name),

    /// Element index outside the property's array arity or value storage.
    #[error("element {index} out of range for property {property:?} (arity {dim})")]
    OutOfRange {
        property: Name,
        index: usize,
        dim: usize,
    },

    /// Failure reading or writing the underlying archive.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for reflection operations.
pub type ReflectResult<T> = Result<T, ReflectError>;
