//! Archives that map names and object references to package tables.

use kiln_object::ObjectGraph;
use kiln_store::{Archive, ByteStream, MemoryStream, StoreError, StoreResult, StreamExt};
use kiln_types::version::VER_NAME_TABLE;
use kiln_types::{LinkerId, Name, ObjectHandle, PackageFlags, PackageIndex};

use crate::context::LoadContext;
use crate::error::LinkerError;
use crate::resource::NameWriter;
use crate::save::SaveTables;

fn store_error(e: LinkerError, offset: u64) -> StoreError {
    match e {
        LinkerError::Store(e) => e,
        other => StoreError::Corrupt {
            offset,
            reason: other.to_string(),
        },
    }
}

/// Reads export bodies through a linker's stream, resolving object
/// references lazily through the load context.
pub(crate) struct LoadArchive<'c, 'a> {
    cx: &'c mut LoadContext<'a>,
    linker: LinkerId,
    version: u32,
    filter_editor_only: bool,
    binary: bool,
}

impl<'c, 'a> LoadArchive<'c, 'a> {
    pub(crate) fn new(cx: &'c mut LoadContext<'a>, linker: LinkerId) -> Result<Self, LinkerError> {
        let summary = &cx.linkers.require(linker)?.summary;
        let version = summary.file_version;
        let filter_editor_only = summary.package_flags.contains(PackageFlags::FILTER_EDITOR_ONLY);
        let binary = summary.package_flags.contains(PackageFlags::COOKED);
        Ok(Self {
            cx,
            linker,
            version,
            filter_editor_only,
            binary,
        })
    }

    fn loader(&mut self) -> StoreResult<&mut dyn ByteStream> {
        self.cx
            .linkers
            .require_mut(self.linker)
            .and_then(|l| l.loader_mut())
            .map_err(|e| store_error(e, 0))
    }
}

impl Archive for LoadArchive<'_, '_> {
    fn is_loading(&self) -> bool {
        true
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn is_filter_editor_only(&self) -> bool {
        self.filter_editor_only
    }

    fn wants_binary_properties(&self) -> bool {
        self.binary
    }

    fn tell(&mut self) -> StoreResult<u64> {
        self.loader()?.tell()
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        self.loader()?.seek(pos)
    }

    fn serialize_bytes(&mut self, data: &mut [u8]) -> StoreResult<()> {
        self.loader()?.read_exact(data)
    }

    fn serialize_name(&mut self, name: &mut Name) -> StoreResult<()> {
        if self.version < VER_NAME_TABLE {
            let text = self.loader()?.read_string()?;
            *name = self.cx.graph.intern(&text);
            return Ok(());
        }
        let loader = self.loader()?;
        let offset = loader.tell()?;
        let index = loader.read_u32()? as usize;
        let names = &self
            .cx
            .linkers
            .require(self.linker)
            .map_err(|e| store_error(e, offset))?
            .names;
        *name = names.get(index).copied().ok_or_else(|| StoreError::Corrupt {
            offset,
            reason: format!("name index {index} out of range ({} names)", names.len()),
        })?;
        Ok(())
    }

    fn serialize_object(&mut self, object: &mut Option<ObjectHandle>) -> StoreResult<()> {
        let loader = self.loader()?;
        let offset = loader.tell()?;
        let index = PackageIndex::from_raw(loader.read_i32()?);
        *object = self
            .cx
            .index_to_object(self.linker, index)
            .map_err(|e| store_error(e, offset))?;
        Ok(())
    }
}

/// Writes export bodies for a package being saved.
pub(crate) struct SaveArchive<'a> {
    pub(crate) stream: &'a mut MemoryStream,
    pub(crate) tables: &'a SaveTables,
    pub(crate) names: NameWriter<'a>,
    pub(crate) filter_editor_only: bool,
    pub(crate) binary: bool,
}

impl Archive for SaveArchive<'_> {
    fn is_loading(&self) -> bool {
        false
    }

    fn version(&self) -> u32 {
        self.names.version
    }

    fn is_filter_editor_only(&self) -> bool {
        self.filter_editor_only
    }

    fn wants_binary_properties(&self) -> bool {
        self.binary
    }

    fn tell(&mut self) -> StoreResult<u64> {
        self.stream.tell()
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        self.stream.seek(pos)
    }

    fn serialize_bytes(&mut self, data: &mut [u8]) -> StoreResult<()> {
        self.stream.write_all(data)
    }

    fn serialize_name(&mut self, name: &mut Name) -> StoreResult<()> {
        let offset = self.stream.tell()?;
        self.names
            .write(&mut *self.stream, *name)
            .map_err(|e| store_error(e, offset))
    }

    fn serialize_object(&mut self, object: &mut Option<ObjectHandle>) -> StoreResult<()> {
        let index = self.tables.object_index(*object);
        self.stream.write_i32(index.raw())
    }
}

/// Saving-mode archive with no backing stream that records every name and
/// every reference leaving the package.
pub(crate) struct TagArchive<'a> {
    pub(crate) graph: &'a ObjectGraph,
    pub(crate) tables: &'a mut SaveTables,
    pub(crate) filter_editor_only: bool,
    pub(crate) binary: bool,
}

impl Archive for TagArchive<'_> {
    fn is_loading(&self) -> bool {
        false
    }

    fn is_filter_editor_only(&self) -> bool {
        self.filter_editor_only
    }

    fn wants_binary_properties(&self) -> bool {
        self.binary
    }

    fn tell(&mut self) -> StoreResult<u64> {
        Ok(0)
    }

    fn seek(&mut self, _pos: u64) -> StoreResult<()> {
        Ok(())
    }

    fn serialize_bytes(&mut self, _data: &mut [u8]) -> StoreResult<()> {
        Ok(())
    }

    fn serialize_name(&mut self, name: &mut Name) -> StoreResult<()> {
        self.tables.names.insert(*name);
        Ok(())
    }

    fn serialize_object(&mut self, object: &mut Option<ObjectHandle>) -> StoreResult<()> {
        if let Some(object) = *object {
            self.tables.tag_reference(self.graph, object);
        }
        Ok(())
    }
}
