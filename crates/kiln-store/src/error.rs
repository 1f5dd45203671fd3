/// Errors from streams, archives and package stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No package with this name exists in the store.
    #[error("package not found: {0}")]
    NotFound(String),

    /// The package name cannot be mapped to a storage location.
    #[error("invalid package name: {0:?}")]
    InvalidName(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read ran past the end of the stream.
    #[error("unexpected end of stream at offset {offset} (wanted {wanted} bytes)")]
    UnexpectedEof { offset: u64, wanted: usize },

    /// The data is malformed or cannot be decoded.
    #[error("corrupt data at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// The stream does not accept writes.
    #[error("stream is read-only")]
    ReadOnly,
}

/// Result alias for stream, archive and store operations.
pub type StoreResult<T> = Result<T, StoreError>;
