//! Import and export table entries, and how names are encoded in them.

use indexmap::IndexSet;
use kiln_store::{ByteStream, StoreError, StreamExt};
use kiln_types::version::VER_NAME_TABLE;
use kiln_types::{Guid, LinkerId, Name, NameTable, ObjectFlags, ObjectHandle, PackageIndex};

use crate::error::LinkerResult;

/// Encoded size of an import entry in a package with a name table.
pub const IMPORT_ENTRY_SIZE: u64 = 16;

/// Encoded size of an export entry in a package with a name table.
pub const EXPORT_ENTRY_SIZE: u64 = 52;

/// A reference from this package to an object in another package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectImport {
    pub class_package: Name,
    pub class_name: Name,
    pub object_name: Name,
    /// Always an import index or null (top-level package).
    pub outer_index: PackageIndex,
    /// Resolved object, once verified.
    pub object: Option<ObjectHandle>,
    /// Linker of the package the import was found in.
    pub source_linker: Option<LinkerId>,
    /// Export index in `source_linker`; `None` for the package root itself.
    pub source_index: Option<usize>,
}

impl ObjectImport {
    pub fn new(class_package: Name, class_name: Name, object_name: Name, outer_index: PackageIndex) -> Self {
        Self {
            class_package,
            class_name,
            object_name,
            outer_index,
            object: None,
            source_linker: None,
            source_index: None,
        }
    }

    pub(crate) fn read(stream: &mut dyn ByteStream, names: &mut NameReader<'_>) -> LinkerResult<Self> {
        let class_package = names.read(stream)?;
        let class_name = names.read(stream)?;
        let object_name = names.read(stream)?;
        let outer_index = PackageIndex::from_raw(stream.read_i32()?);
        Ok(Self::new(class_package, class_name, object_name, outer_index))
    }

    pub(crate) fn write(&self, stream: &mut dyn ByteStream, names: &NameWriter<'_>) -> LinkerResult<()> {
        names.write(stream, self.class_package)?;
        names.write(stream, self.class_name)?;
        names.write(stream, self.object_name)?;
        stream.write_i32(self.outer_index.raw())?;
        Ok(())
    }
}

/// An object defined by this package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectExport {
    /// Null means the export is itself a class.
    pub class_index: PackageIndex,
    pub super_index: PackageIndex,
    /// Null means the package root.
    pub outer_index: PackageIndex,
    pub object_name: Name,
    pub object_flags: ObjectFlags,
    pub serial_size: u64,
    pub serial_offset: u64,
    pub package_guid: Guid,
    /// The live object, once created.
    pub object: Option<ObjectHandle>,
    /// Next export in the same hash bucket.
    pub(crate) hash_next: Option<usize>,
}

impl ObjectExport {
    pub fn new(object_name: Name) -> Self {
        Self {
            class_index: PackageIndex::NULL,
            super_index: PackageIndex::NULL,
            outer_index: PackageIndex::NULL,
            object_name,
            object_flags: ObjectFlags::empty(),
            serial_size: 0,
            serial_offset: 0,
            package_guid: Guid::nil(),
            object: None,
            hash_next: None,
        }
    }

    pub(crate) fn read(stream: &mut dyn ByteStream, names: &mut NameReader<'_>) -> LinkerResult<Self> {
        let class_index = PackageIndex::from_raw(stream.read_i32()?);
        let super_index = PackageIndex::from_raw(stream.read_i32()?);
        let outer_index = PackageIndex::from_raw(stream.read_i32()?);
        let mut export = Self::new(names.read(stream)?);
        export.class_index = class_index;
        export.super_index = super_index;
        export.outer_index = outer_index;
        export.object_flags = ObjectFlags::from_bits_retain(stream.read_u32()?);
        export.serial_size = stream.read_u64()?;
        export.serial_offset = stream.read_u64()?;
        export.package_guid = Guid::from_bytes(stream.read_array::<16>()?);
        Ok(export)
    }

    pub(crate) fn write(&self, stream: &mut dyn ByteStream, names: &NameWriter<'_>) -> LinkerResult<()> {
        stream.write_i32(self.class_index.raw())?;
        stream.write_i32(self.super_index.raw())?;
        stream.write_i32(self.outer_index.raw())?;
        names.write(stream, self.object_name)?;
        stream.write_u32(self.object_flags.bits())?;
        stream.write_u64(self.serial_size)?;
        stream.write_u64(self.serial_offset)?;
        stream.write_all(self.package_guid.as_bytes())?;
        Ok(())
    }
}

/// Decodes names from a package: an index into its name table, or an inline
/// string in files that predate the table.
pub(crate) struct NameReader<'a> {
    pub(crate) map: &'a [Name],
    pub(crate) table: &'a mut NameTable,
    pub(crate) version: u32,
}

impl NameReader<'_> {
    pub(crate) fn read(&mut self, stream: &mut dyn ByteStream) -> LinkerResult<Name> {
        if self.version < VER_NAME_TABLE {
            let text = stream.read_string()?;
            return Ok(self.table.intern(&text));
        }
        let offset = stream.tell()?;
        let index = stream.read_u32()? as usize;
        self.map.get(index).copied().ok_or_else(|| {
            StoreError::Corrupt {
                offset,
                reason: format!("name index {index} out of range ({} names)", self.map.len()),
            }
            .into()
        })
    }
}

/// Encodes names for a package being saved.
pub(crate) struct NameWriter<'a> {
    pub(crate) map: &'a IndexSet<Name>,
    pub(crate) table: &'a NameTable,
    pub(crate) version: u32,
}

impl NameWriter<'_> {
    /// # Panics
    ///
    /// Panics if `name` was not collected into the package's name map.
    pub(crate) fn write(&self, stream: &mut dyn ByteStream, name: Name) -> LinkerResult<()> {
        if self.version < VER_NAME_TABLE {
            stream.write_string(self.table.resolve(name))?;
            return Ok(());
        }
        let Some(index) = self.map.get_index_of(&name) else {
            panic!("name {:?} is not mapped in the package being saved", self.table.resolve(name));
        };
        stream.write_u32(index as u32)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kiln_store::MemoryStream;
    use kiln_types::version::VER_PACKAGE_LATEST;

    use super::*;

    #[test]
    fn entries_have_fixed_size() {
        let mut table = NameTable::new();
        let a = table.intern("Material");
        let b = table.intern("Rock");
        let map: IndexSet<Name> = [a, b].into_iter().collect();
        let writer = NameWriter {
            map: &map,
            table: &table,
            version: VER_PACKAGE_LATEST,
        };

        let mut stream = MemoryStream::new();
        ObjectImport::new(a, a, b, PackageIndex::from_import(0))
            .write(&mut stream, &writer)
            .unwrap();
        assert_eq!(stream.size().unwrap(), IMPORT_ENTRY_SIZE);

        let mut stream = MemoryStream::new();
        ObjectExport::new(b).write(&mut stream, &writer).unwrap();
        assert_eq!(stream.size().unwrap(), EXPORT_ENTRY_SIZE);
    }

    #[test]
    fn export_entry_reads_back() {
        let mut table = NameTable::new();
        let rock = table.intern("Rock");
        let map: IndexSet<Name> = [rock].into_iter().collect();
        let mut export = ObjectExport::new(rock);
        export.class_index = PackageIndex::from_import(2);
        export.outer_index = PackageIndex::from_export(0);
        export.object_flags = ObjectFlags::PUBLIC | ObjectFlags::STANDALONE;
        export.serial_size = 33;
        export.serial_offset = 1024;
        export.package_guid = Guid::new();

        let mut stream = MemoryStream::new();
        let writer = NameWriter {
            map: &map,
            table: &table,
            version: VER_PACKAGE_LATEST,
        };
        export.write(&mut stream, &writer).unwrap();

        stream.seek(0).unwrap();
        let names = vec![rock];
        let mut reader = NameReader {
            map: &names,
            table: &mut table,
            version: VER_PACKAGE_LATEST,
        };
        let back = ObjectExport::read(&mut stream, &mut reader).unwrap();
        assert_eq!(back, export);
    }

    #[test]
    fn inline_names_before_name_table() {
        let mut table = NameTable::new();
        let class = table.intern("Texture");
        let map = IndexSet::new();
        let writer = NameWriter {
            map: &map,
            table: &table,
            version: VER_NAME_TABLE - 1,
        };
        let mut stream = MemoryStream::new();
        ObjectImport::new(class, class, class, PackageIndex::NULL)
            .write(&mut stream, &writer)
            .unwrap();

        stream.seek(0).unwrap();
        let mut fresh = NameTable::new();
        let mut reader = NameReader {
            map: &[],
            table: &mut fresh,
            version: VER_NAME_TABLE - 1,
        };
        let back = ObjectImport::read(&mut stream, &mut reader).unwrap();
        assert_eq!(fresh.resolve(back.object_name), "Texture");
        assert!(back.outer_index.is_null());
    }

    #[test]
    fn name_index_out_of_range_is_corrupt() {
        let mut stream = MemoryStream::new();
        stream.write_u32(9).unwrap();
        stream.seek(0).unwrap();
        let mut table = NameTable::new();
        let mut reader = NameReader {
            map: &[],
            table: &mut table,
            version: VER_PACKAGE_LATEST,
        };
        assert!(reader.read(&mut stream).is_err());
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn unmapped_name_panics() {
        let mut table = NameTable::new();
        let stray = table.intern("Stray");
        let map = IndexSet::new();
        let writer = NameWriter {
            map: &map,
            table: &table,
            version: VER_PACKAGE_LATEST,
        };
        let mut stream = MemoryStream::new();
        let _ = writer.write(&mut stream, stray);
    }
}
