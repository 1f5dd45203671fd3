use thiserror::Error;

/// Errors from foundation type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// A byte slice had the wrong length for the target type.
    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The name index is not in this name table.
    #[error("unknown name index {0}")]
    UnknownName(u32),
}
