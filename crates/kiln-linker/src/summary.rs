//! Package file summary: the fixed header at the start of every package.

use kiln_store::{ByteStream, MemoryStream, StoreError, StreamExt};
use kiln_types::version::{
    COMPRESS_NONE, ENGINE_VERSION, PACKAGE_FILE_TAG, VER_COMPRESSED_CHUNKS, VER_GUID_PACKAGES,
    VER_NAME_TABLE, VER_PACKAGE_LATEST,
};
use kiln_types::{Guid, PackageFlags};

use crate::error::{LinkerError, LinkerResult};

/// Upper bound on the chunk table of a compressed package.
pub const MAX_CHUNKS: u32 = 1 << 20;

/// One zstd block of a compressed package.
///
/// `uncompressed_offset` is a logical offset into the uncompressed image;
/// `compressed_offset` is the physical offset of the block in the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompressedChunk {
    pub uncompressed_offset: u64,
    pub uncompressed_size: u32,
    pub compressed_offset: u64,
    pub compressed_size: u32,
    pub crc32: u32,
}

impl CompressedChunk {
    pub fn uncompressed_end(&self) -> u64 {
        self.uncompressed_offset + u64::from(self.uncompressed_size)
    }
}

/// Header of a package file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageFileSummary {
    pub tag: u32,
    pub engine_version: u32,
    pub file_version: u32,
    pub package_flags: PackageFlags,
    pub total_header_size: u32,
    pub name_count: u32,
    pub name_offset: u32,
    pub export_count: u32,
    pub export_offset: u32,
    pub import_count: u32,
    pub import_offset: u32,
    pub guid: Guid,
    pub compression_flags: u32,
    pub chunks: Vec<CompressedChunk>,
}

impl Default for PackageFileSummary {
    fn default() -> Self {
        Self {
            tag: PACKAGE_FILE_TAG,
            engine_version: ENGINE_VERSION,
            file_version: VER_PACKAGE_LATEST,
            package_flags: PackageFlags::empty(),
            total_header_size: 0,
            name_count: 0,
            name_offset: 0,
            export_count: 0,
            export_offset: 0,
            import_count: 0,
            import_offset: 0,
            guid: Guid::nil(),
            compression_flags: COMPRESS_NONE,
            chunks: Vec::new(),
        }
    }
}

impl PackageFileSummary {
    pub fn is_compressed(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Read a summary from the current position.
    ///
    /// The tag is checked before anything else is read. Version checks are
    /// left to the caller.
    pub fn read(stream: &mut dyn ByteStream) -> LinkerResult<Self> {
        let tag = stream.read_u32()?;
        if tag != PACKAGE_FILE_TAG {
            return Err(LinkerError::BadTag { found: tag });
        }
        let mut summary = Self {
            tag,
            engine_version: stream.read_u32()?,
            file_version: stream.read_u32()?,
            package_flags: PackageFlags::from_bits_retain(stream.read_u32()?),
            total_header_size: stream.read_u32()?,
            ..Self::default()
        };
        if summary.file_version >= VER_NAME_TABLE {
            summary.name_count = stream.read_u32()?;
            summary.name_offset = stream.read_u32()?;
        }
        summary.export_count = stream.read_u32()?;
        summary.export_offset = stream.read_u32()?;
        summary.import_count = stream.read_u32()?;
        summary.import_offset = stream.read_u32()?;
        if summary.file_version >= VER_GUID_PACKAGES {
            summary.guid = Guid::from_bytes(stream.read_array::<16>()?);
        }
        if summary.file_version >= VER_COMPRESSED_CHUNKS {
            summary.compression_flags = stream.read_u32()?;
            let offset = stream.tell()?;
            let count = stream.read_u32()?;
            if count > MAX_CHUNKS {
                return Err(StoreError::Corrupt {
                    offset,
                    reason: format!("chunk count {count} exceeds limit"),
                }
                .into());
            }
            summary.chunks.reserve(count as usize);
            for _ in 0..count {
                summary.chunks.push(CompressedChunk {
                    uncompressed_offset: stream.read_u64()?,
                    uncompressed_size: stream.read_u32()?,
                    compressed_offset: stream.read_u64()?,
                    compressed_size: stream.read_u32()?,
                    crc32: stream.read_u32()?,
                });
            }
        }
        Ok(summary)
    }

    /// Write the summary at the current position, honoring `file_version`.
    pub fn write(&self, stream: &mut dyn ByteStream) -> LinkerResult<()> {
        stream.write_u32(self.tag)?;
        stream.write_u32(self.engine_version)?;
        stream.write_u32(self.file_version)?;
        stream.write_u32(self.package_flags.bits())?;
        stream.write_u32(self.total_header_size)?;
        if self.file_version >= VER_NAME_TABLE {
            stream.write_u32(self.name_count)?;
            stream.write_u32(self.name_offset)?;
        }
        stream.write_u32(self.export_count)?;
        stream.write_u32(self.export_offset)?;
        stream.write_u32(self.import_count)?;
        stream.write_u32(self.import_offset)?;
        if self.file_version >= VER_GUID_PACKAGES {
            stream.write_all(self.guid.as_bytes())?;
        }
        if self.file_version >= VER_COMPRESSED_CHUNKS {
            stream.write_u32(self.compression_flags)?;
            stream.write_u32(self.chunks.len() as u32)?;
            for chunk in &self.chunks {
                stream.write_u64(chunk.uncompressed_offset)?;
                stream.write_u32(chunk.uncompressed_size)?;
                stream.write_u64(chunk.compressed_offset)?;
                stream.write_u32(chunk.compressed_size)?;
                stream.write_u32(chunk.crc32)?;
            }
        }
        Ok(())
    }

    /// Encoded length of this summary in bytes.
    pub fn encoded_len(&self) -> LinkerResult<u64> {
        let mut stream = MemoryStream::new();
        self.write(&mut stream)?;
        Ok(stream.size()?)
    }
}
