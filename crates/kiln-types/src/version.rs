//! Package file format constants.

/// Magic number at the start of every package file.
pub const PACKAGE_FILE_TAG: u32 = 0x4B50_454C;

/// Engine version written into new packages.
pub const ENGINE_VERSION: u32 = 0x040;

/// First package format.
pub const VER_PACKAGE_BASE: u32 = 1;
/// Package GUID stored in the summary.
pub const VER_GUID_PACKAGES: u32 = 11;
/// Names stored in a table instead of inline strings.
pub const VER_NAME_TABLE: u32 = 12;
/// Compression flags and chunk table stored in the summary.
pub const VER_COMPRESSED_CHUNKS: u32 = 24;

/// Version written by the saver.
pub const VER_PACKAGE_LATEST: u32 = VER_COMPRESSED_CHUNKS;
/// Oldest version the loader accepts.
pub const VER_MIN_SUPPORTED: u32 = VER_PACKAGE_BASE;

/// Compression scheme recorded in the summary.
pub const COMPRESS_NONE: u32 = 0;
pub const COMPRESS_ZSTD: u32 = 1;
