use kiln_types::version::VER_PACKAGE_LATEST;
use kiln_types::{Name, ObjectHandle};

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryStream;
use crate::stream::{ByteStream, StreamExt, MAX_STRING_LEN};

/// Bidirectional serializer.
///
/// The same `serialize_*` call sequence reads when [`is_loading`] is true and
/// writes otherwise, so an object's serialization code is written once. Names
/// and object references go through dedicated hooks so each archive can map
/// them to its own on-disk representation (package name table, import/export
/// indices, or nothing at all for tagging passes).
///
/// [`is_loading`]: Archive::is_loading
pub trait Archive {
    fn is_loading(&self) -> bool;

    fn is_saving(&self) -> bool {
        !self.is_loading()
    }

    /// Package format version of the data being read or written.
    fn version(&self) -> u32 {
        VER_PACKAGE_LATEST
    }

    /// Skip editor-only properties.
    fn is_filter_editor_only(&self) -> bool {
        false
    }

    /// Use the untagged binary property layout.
    fn wants_binary_properties(&self) -> bool {
        false
    }

    /// Current position. Passes without a backing stream report 0.
    fn tell(&mut self) -> StoreResult<u64>;

    fn seek(&mut self, pos: u64) -> StoreResult<()>;

    /// Read into or write from `data`.
    fn serialize_bytes(&mut self, data: &mut [u8]) -> StoreResult<()>;

    fn serialize_name(&mut self, name: &mut Name) -> StoreResult<()>;

    fn serialize_object(&mut self, object: &mut Option<ObjectHandle>) -> StoreResult<()>;
}

/// Primitive helpers for every [`Archive`], including `dyn Archive`.
pub trait ArchiveExt: Archive {
    fn serialize_u8(&mut self, v: &mut u8) -> StoreResult<()> {
        let mut b = [*v];
        self.serialize_bytes(&mut b)?;
        *v = b[0];
        Ok(())
    }

    fn serialize_bool(&mut self, v: &mut bool) -> StoreResult<()> {
        let mut b = u8::from(*v);
        self.serialize_u8(&mut b)?;
        *v = b != 0;
        Ok(())
    }

    fn serialize_u32(&mut self, v: &mut u32) -> StoreResult<()> {
        let mut b = v.to_le_bytes();
        self.serialize_bytes(&mut b)?;
        *v = u32::from_le_bytes(b);
        Ok(())
    }

    fn serialize_i32(&mut self, v: &mut i32) -> StoreResult<()> {
        let mut b = v.to_le_bytes();
        self.serialize_bytes(&mut b)?;
        *v = i32::from_le_bytes(b);
        Ok(())
    }

    fn serialize_u64(&mut self, v: &mut u64) -> StoreResult<()> {
        let mut b = v.to_le_bytes();
        self.serialize_bytes(&mut b)?;
        *v = u64::from_le_bytes(b);
        Ok(())
    }

    fn serialize_f32(&mut self, v: &mut f32) -> StoreResult<()> {
        let mut b = v.to_le_bytes();
        self.serialize_bytes(&mut b)?;
        *v = f32::from_le_bytes(b);
        Ok(())
    }

    /// Length-prefixed UTF-8 string.
    fn serialize_string(&mut self, v: &mut String) -> StoreResult<()> {
        let offset = self.tell()?;
        let mut len = v.len() as u32;
        self.serialize_u32(&mut len)?;
        if self.is_loading() {
            if len as usize > MAX_STRING_LEN {
                return Err(StoreError::Corrupt {
                    offset,
                    reason: format!("string length {len} exceeds limit"),
                });
            }
            let mut bytes = vec![0u8; len as usize];
            self.serialize_bytes(&mut bytes)?;
            *v = String::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
                offset,
                reason: e.to_string(),
            })?;
        } else {
            let mut bytes = v.clone().into_bytes();
            self.serialize_bytes(&mut bytes)?;
        }
        Ok(())
    }
}

impl<A: Archive + ?Sized> ArchiveExt for A {}

/// Archive over a private in-memory buffer.
///
/// Names and object handles are written as indices into side tables owned by
/// the archive, so a buffer produced by [`MemoryArchive::writer`] can only be
/// read back through [`MemoryArchive::into_reader`] in the same process.
/// Useful for transient copies of object state.
pub struct MemoryArchive {
    stream: MemoryStream,
    loading: bool,
    names: Vec<Name>,
    objects: Vec<Option<ObjectHandle>>,
    binary_properties: bool,
    filter_editor_only: bool,
}

impl MemoryArchive {
    /// Empty archive in saving mode.
    pub fn writer() -> Self {
        Self {
            stream: MemoryStream::new(),
            loading: false,
            names: Vec::new(),
            objects: Vec::new(),
            binary_properties: false,
            filter_editor_only: false,
        }
    }

    /// Switch to loading mode, rewound to the start.
    pub fn into_reader(mut self) -> Self {
        self.loading = true;
        self.stream.seek(0).ok();
        self
    }

    pub fn with_binary_properties(mut self, binary: bool) -> Self {
        self.binary_properties = binary;
        self
    }

    pub fn with_editor_only_filter(mut self, filter: bool) -> Self {
        self.filter_editor_only = filter;
        self
    }

    /// Bytes written so far.
    pub fn len(&mut self) -> u64 {
        self.stream.size().unwrap_or(0)
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn corrupt(&mut self, reason: String) -> StoreError {
        StoreError::Corrupt {
            offset: self.stream.tell().unwrap_or(0),
            reason,
        }
    }
}

impl Archive for MemoryArchive {
    fn is_loading(&self) -> bool {
        self.loading
    }

    fn is_filter_editor_only(&self) -> bool {
        self.filter_editor_only
    }

    fn wants_binary_properties(&self) -> bool {
        self.binary_properties
    }

    fn tell(&mut self) -> StoreResult<u64> {
        self.stream.tell()
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        self.stream.seek(pos)
    }

    fn serialize_bytes(&mut self, data: &mut [u8]) -> StoreResult<()> {
        if self.loading {
            self.stream.read_exact(data)
        } else {
            self.stream.write_all(data)
        }
    }

    fn serialize_name(&mut self, name: &mut Name) -> StoreResult<()> {
        if self.loading {
            let slot = self.stream.read_u32()? as usize;
            *name = match self.names.get(slot).copied() {
                Some(n) => n,
                None => return Err(self.corrupt(format!("name slot {slot} out of range"))),
            };
        } else {
            let slot = match self.names.iter().position(|n| *n == *name) {
                Some(slot) => slot,
                None => {
                    self.names.push(*name);
                    self.names.len() - 1
                }
            };
            self.stream.write_u32(slot as u32)?;
        }
        Ok(())
    }

    fn serialize_object(&mut self, object: &mut Option<ObjectHandle>) -> StoreResult<()> {
        if self.loading {
            let slot = self.stream.read_u32()? as usize;
            *object = match self.objects.get(slot).copied() {
                Some(o) => o,
                None => return Err(self.corrupt(format!("object slot {slot} out of range"))),
            };
        } else {
            self.objects.push(*object);
            self.stream.write_u32((self.objects.len() - 1) as u32)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArchive")
            .field("loading", &self.loading)
            .field("names", &self.names.len())
            .field("objects", &self.objects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::NameTable;

    #[test]
    fn primitives_roundtrip() {
        let mut ar = MemoryArchive::writer();
        let (mut a, mut b, mut c, mut d, mut e) = (7u8, -3i32, 1.5f32, true, String::from("héllo"));
        ar.serialize_u8(&mut a).unwrap();
        ar.serialize_i32(&mut b).unwrap();
        ar.serialize_f32(&mut c).unwrap();
        ar.serialize_bool(&mut d).unwrap();
        ar.serialize_string(&mut e).unwrap();

        let mut ar = ar.into_reader();
        let (mut a, mut b, mut c, mut d, mut e) = (0u8, 0i32, 0f32, false, String::new());
        ar.serialize_u8(&mut a).unwrap();
        ar.serialize_i32(&mut b).unwrap();
        ar.serialize_f32(&mut c).unwrap();
        ar.serialize_bool(&mut d).unwrap();
        ar.serialize_string(&mut e).unwrap();
        assert_eq!((a, b, c, d, e.as_str()), (7, -3, 1.5, true, "héllo"));
    }

    #[test]
    fn names_and_objects_go_through_side_tables() {
        let mut table = NameTable::new();
        let hero = table.intern("Hero");
        let handle = ObjectHandle::new(3, 1);

        let mut ar = MemoryArchive::writer();
        let (mut n1, mut n2, mut o1, mut o2) = (hero, hero, Some(handle), None);
        ar.serialize_name(&mut n1).unwrap();
        ar.serialize_name(&mut n2).unwrap();
        ar.serialize_object(&mut o1).unwrap();
        ar.serialize_object(&mut o2).unwrap();
        assert_eq!(ar.names.len(), 1);
        assert_eq!(ar.len(), 16);

        let mut ar = ar.into_reader();
        let (mut n1, mut n2, mut o1, mut o2) = (Name::NONE, Name::NONE, None, Some(handle));
        ar.serialize_name(&mut n1).unwrap();
        ar.serialize_name(&mut n2).unwrap();
        ar.serialize_object(&mut o1).unwrap();
        ar.serialize_object(&mut o2).unwrap();
        assert_eq!((n1, n2, o1, o2), (hero, hero, Some(handle), None));
    }

    #[test]
    fn reading_past_end_fails() {
        let mut ar = MemoryArchive::writer().into_reader();
        let mut v = 0u32;
        assert!(matches!(
            ar.serialize_u32(&mut v),
            Err(StoreError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn works_through_dyn() {
        let mut ar = MemoryArchive::writer().with_binary_properties(true);
        let dyn_ar: &mut dyn Archive = &mut ar;
        let mut v = 5u64;
        dyn_ar.serialize_u64(&mut v).unwrap();
        assert!(dyn_ar.is_saving());
        assert!(dyn_ar.wants_binary_properties());
    }
}
