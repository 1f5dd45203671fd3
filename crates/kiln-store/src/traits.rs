use crate::error::{StoreError, StoreResult};
use crate::stream::ByteStream;

/// Name-keyed package storage.
///
/// This is the package lookup collaborator: the loader asks it for a stream
/// by package name and the saver asks it for a fresh writable stream.
///
/// All implementations must satisfy these invariants:
/// - `open_read` returns `Ok(None)` for a package that does not exist.
/// - A reader is unaffected by a later `open_write` of the same package.
/// - `open_write` truncates any previous contents.
/// - All I/O errors are propagated, never silently ignored.
pub trait PackageStore: Send + Sync {
    /// Open a package for reading.
    fn open_read(&self, package: &str) -> StoreResult<Option<Box<dyn ByteStream>>>;

    /// Create or truncate a package for writing.
    fn open_write(&self, package: &str) -> StoreResult<Box<dyn ByteStream>>;

    /// Check whether a package exists.
    fn exists(&self, package: &str) -> StoreResult<bool>;

    /// Delete a package. Returns `true` if it existed.
    fn delete(&self, package: &str) -> StoreResult<bool>;

    /// All package names, sorted.
    fn list(&self) -> StoreResult<Vec<String>>;
}

/// Package name for a file name: directories and extension stripped.
///
/// `"Content/Maps/Arena.lpk"` becomes `"Arena"`.
pub fn package_name_from_file(file_name: &str) -> &str {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    match base.rfind('.') {
        Some(0) | None => base,
        Some(dot) => &base[..dot],
    }
}

pub(crate) fn validate_package_name(package: &str) -> StoreResult<()> {
    if package.is_empty() || package.contains(['/', '\\']) || package == "." || package == ".." {
        return Err(StoreError::InvalidName(package.to_string()));
    }
    Ok(())
}
