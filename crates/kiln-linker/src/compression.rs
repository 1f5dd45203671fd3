//! Chunked zstd compression of package files.
//!
//! A compressed package keeps its summary uncompressed at offset 0, with the
//! chunk table filled in. Everything after the summary of the uncompressed
//! image is stored as a sequence of zstd blocks. Offsets in the tables keep
//! referring to the uncompressed image, so [`CompressedReader`] presents that
//! image to the linker.

use std::ops::Range;

use kiln_store::{ByteStream, MemoryStream, StoreError, StoreResult};
use kiln_types::version::COMPRESS_ZSTD;
use kiln_types::PackageFlags;
use tracing::debug;

use crate::config::CompressionConfig;
use crate::error::{LinkerError, LinkerResult};
use crate::summary::{CompressedChunk, PackageFileSummary};

/// Read-only stream over the uncompressed image of a compressed package.
pub struct CompressedReader {
    inner: Box<dyn ByteStream>,
    chunks: Vec<CompressedChunk>,
    pos: u64,
    cached: Option<(usize, Vec<u8>)>,
    version: u32,
}

impl CompressedReader {
    pub fn new(inner: Box<dyn ByteStream>, chunks: Vec<CompressedChunk>) -> LinkerResult<Self> {
        for pair in chunks.windows(2) {
            if pair[0].uncompressed_end() != pair[1].uncompressed_offset {
                return Err(StoreError::Corrupt {
                    offset: pair[1].compressed_offset,
                    reason: "compressed chunks are not contiguous".into(),
                }
                .into());
            }
        }
        let version = inner.version();
        let pos = chunks.first().map_or(0, |c| c.uncompressed_offset);
        Ok(Self {
            inner,
            chunks,
            pos,
            cached: None,
            version,
        })
    }

    fn chunk_at(&self, pos: u64) -> Option<usize> {
        let idx = self.chunks.partition_point(|c| c.uncompressed_end() <= pos);
        (idx < self.chunks.len() && self.chunks[idx].uncompressed_offset <= pos).then_some(idx)
    }

    fn load_chunk(&mut self, idx: usize) -> StoreResult<&[u8]> {
        if self.cached.as_ref().map(|(i, _)| *i) != Some(idx) {
            let chunk = self.chunks[idx];
            let end = chunk.compressed_offset.checked_add(u64::from(chunk.compressed_size));
            let available = self.inner.size()?;
            if end.map_or(true, |end| end > available) {
                return Err(StoreError::Corrupt {
                    offset: chunk.compressed_offset,
                    reason: format!(
                        "chunk of {} bytes runs past the end of a {available} byte file",
                        chunk.compressed_size
                    ),
                });
            }
            self.inner.seek(chunk.compressed_offset)?;
            let mut compressed = vec![0u8; chunk.compressed_size as usize];
            self.inner.read_exact(&mut compressed)?;
            let crc = crc32fast::hash(&compressed);
            if crc != chunk.crc32 {
                return Err(StoreError::Corrupt {
                    offset: chunk.compressed_offset,
                    reason: format!("chunk CRC mismatch: expected {:#010x}, got {crc:#010x}", chunk.crc32),
                });
            }
            let data = zstd::bulk::decompress(&compressed, chunk.uncompressed_size as usize).map_err(|e| StoreError::Corrupt {
                offset: chunk.compressed_offset,
                reason: format!("chunk decompression failed: {e}"),
            })?;
            if data.len() != chunk.uncompressed_size as usize {
                return Err(StoreError::Corrupt {
                    offset: chunk.compressed_offset,
                    reason: format!(
                        "chunk decompressed to {} bytes, expected {}",
                        data.len(),
                        chunk.uncompressed_size
                    ),
                });
            }
            self.cached = Some((idx, data));
        }
        match &self.cached {
            Some((_, data)) => Ok(data.as_slice()),
            None => Ok(&[]),
        }
    }
}

impl ByteStream for CompressedReader {
    fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        let pos = self.pos;
        if buf.is_empty() || pos >= self.size()? {
            return Ok(0);
        }
        let Some(idx) = self.chunk_at(pos) else {
            return Err(StoreError::Corrupt {
                offset: pos,
                reason: "offset precedes the compressed data".into(),
            });
        };
        let start = (pos - self.chunks[idx].uncompressed_offset) as usize;
        let data = self.load_chunk(idx)?;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> StoreResult<usize> {
        Err(StoreError::ReadOnly)
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        self.pos = pos;
        Ok(())
    }

    fn tell(&mut self) -> StoreResult<u64> {
        Ok(self.pos)
    }

    fn size(&mut self) -> StoreResult<u64> {
        Ok(self.chunks.last().map_or(0, CompressedChunk::uncompressed_end))
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
        self.inner.set_version(version);
    }
}

/// Split `[start, end)` into chunk ranges.
///
/// `boundaries` are preferred cut points (export starts). A chunk is closed
/// at the first boundary where it has reached `min`, and never grows past
/// `max`. Only the final chunk may be smaller than `min`.
pub fn plan_chunks(start: u64, end: u64, boundaries: &[u64], min: u64, max: u64) -> Vec<Range<u64>> {
    let max = max.max(1);
    let min = min.min(max);
    let mut cuts: Vec<u64> = boundaries.iter().copied().filter(|&b| b > start && b < end).collect();
    cuts.push(end);
    cuts.sort_unstable();
    cuts.dedup();

    let mut ranges = Vec::new();
    let mut chunk_start = start;
    let mut pos = start;
    for cut in cuts {
        while pos < cut {
            let room = max - (pos - chunk_start);
            let take = room.min(cut - pos);
            pos += take;
            if pos - chunk_start >= min {
                ranges.push(chunk_start..pos);
                chunk_start = pos;
            }
        }
    }
    if pos > chunk_start {
        ranges.push(chunk_start..pos);
    }
    ranges
}

/// Compress an uncompressed package image.
///
/// `export_starts` are the serial offsets of the export bodies, used as
/// preferred chunk boundaries.
pub fn compress_package(image: &[u8], export_starts: &[u64], config: &CompressionConfig) -> LinkerResult<Vec<u8>> {
    let mut stream = MemoryStream::from_bytes(image.to_vec());
    let mut summary = PackageFileSummary::read(&mut stream)?;
    let data_start = stream.tell()?;
    let ranges = plan_chunks(
        data_start,
        image.len() as u64,
        export_starts,
        config.min_chunk_size as u64,
        config.max_chunk_size as u64,
    );

    let mut blocks = Vec::with_capacity(ranges.len());
    for range in &ranges {
        let raw = &image[range.start as usize..range.end as usize];
        let block = zstd::encode_all(raw, config.level).map_err(|e| LinkerError::Compression(e.to_string()))?;
        blocks.push(block);
    }

    summary.compression_flags = COMPRESS_ZSTD;
    summary.package_flags |= PackageFlags::STORE_COMPRESSED;
    summary.chunks = ranges
        .iter()
        .zip(&blocks)
        .map(|(range, block)| CompressedChunk {
            uncompressed_offset: range.start,
            uncompressed_size: (range.end - range.start) as u32,
            compressed_offset: 0,
            compressed_size: block.len() as u32,
            crc32: crc32fast::hash(block),
        })
        .collect();

    let mut offset = summary.encoded_len()?;
    for chunk in &mut summary.chunks {
        chunk.compressed_offset = offset;
        offset += u64::from(chunk.compressed_size);
    }

    let mut out = MemoryStream::new();
    summary.write(&mut out)?;
    for block in &blocks {
        out.write_all(block)?;
    }
    debug!(
        chunks = blocks.len(),
        uncompressed = image.len(),
        compressed = offset,
        "compressed package"
    );
    Ok(out.to_bytes())
}
