use crate::error::{StoreError, StoreResult};

/// Seekable byte stream with a format version attached.
///
/// This is the only file-system surface the engine relies on. Linkers own
/// their stream for as long as they are attached to a package.
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize>;

    /// Write `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> StoreResult<usize>;

    /// Move to an absolute position.
    fn seek(&mut self, pos: u64) -> StoreResult<()>;

    /// Current absolute position.
    fn tell(&mut self) -> StoreResult<u64>;

    /// Total length in bytes.
    fn size(&mut self) -> StoreResult<u64>;

    /// Format version used to interpret the data.
    fn version(&self) -> u32;

    fn set_version(&mut self, version: u32);

    fn at_end(&mut self) -> StoreResult<bool> {
        Ok(self.tell()? >= self.size()?)
    }

    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }

    /// Fill `buf` completely or fail with [`StoreError::UnexpectedEof`].
    fn read_exact(&mut self, buf: &mut [u8]) -> StoreResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                let offset = self.tell()?;
                return Err(StoreError::UnexpectedEof {
                    offset,
                    wanted: buf.len() - filled,
                });
            }
            filled += n;
        }
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> StoreResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(StoreError::ReadOnly);
            }
            written += n;
        }
        Ok(())
    }
}

/// Little-endian primitive helpers for any [`ByteStream`].
pub trait StreamExt: ByteStream {
    fn read_u8(&mut self) -> StoreResult<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_u32(&mut self) -> StoreResult<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_i32(&mut self) -> StoreResult<i32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    fn read_u64(&mut self) -> StoreResult<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_array<const N: usize>(&mut self) -> StoreResult<[u8; N]> {
        let mut b = [0u8; N];
        self.read_exact(&mut b)?;
        Ok(b)
    }

    /// Length-prefixed UTF-8 string.
    fn read_string(&mut self) -> StoreResult<String> {
        let offset = self.tell()?;
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(StoreError::Corrupt {
                offset,
                reason: format!("string length {len} exceeds limit"),
            });
        }
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
            offset,
            reason: e.to_string(),
        })
    }

    fn write_u8(&mut self, v: u8) -> StoreResult<()> {
        self.write_all(&[v])
    }

    fn write_u32(&mut self, v: u32) -> StoreResult<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_i32(&mut self, v: i32) -> StoreResult<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_u64(&mut self, v: u64) -> StoreResult<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_string(&mut self, s: &str) -> StoreResult<()> {
        self.write_u32(s.len() as u32)?;
        self.write_all(s.as_bytes())
    }
}

impl<S: ByteStream + ?Sized> StreamExt for S {}

/// Upper bound on any length-prefixed string in a package.
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> StoreResult<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        (**self).seek(pos)
    }

    fn tell(&mut self) -> StoreResult<u64> {
        (**self).tell()
    }

    fn size(&mut self) -> StoreResult<u64> {
        (**self).size()
    }

    fn version(&self) -> u32 {
        (**self).version()
    }

    fn set_version(&mut self, version: u32) {
        (**self).set_version(version)
    }

    fn flush(&mut self) -> StoreResult<()> {
        (**self).flush()
    }
}
