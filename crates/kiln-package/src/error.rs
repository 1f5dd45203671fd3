use kiln_linker::LinkerError;
use kiln_object::ObjectError;
use kiln_store::StoreError;

/// Errors from the package runtime.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Linker(#[from] LinkerError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type PackageResult<T> = Result<T, PackageError>;
