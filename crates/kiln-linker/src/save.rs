//! Writing a package: export and import tagging, table layout, bodies.

use std::cell::Cell;
use std::collections::VecDeque;

use indexmap::IndexSet;
use kiln_object::{serialize_object_body, ObjectError, ObjectGraph};
use kiln_store::{ByteStream, MemoryStream, StreamExt};
use kiln_types::version::{VER_COMPRESSED_CHUNKS, VER_NAME_TABLE, VER_PACKAGE_LATEST};
use kiln_types::{ClassFlags, Guid, Name, ObjectFlags, ObjectHandle, PackageFlags, PackageIndex};
use tracing::{debug, info};

use crate::archive::{SaveArchive, TagArchive};
use crate::compression::compress_package;
use crate::config::LinkerConfig;
use crate::error::{LinkerError, LinkerResult};
use crate::resource::{NameWriter, ObjectExport, ObjectImport};
use crate::summary::PackageFileSummary;

thread_local! {
    static SAVING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as saving a package.
pub struct SaveGuard {
    _private: (),
}

impl SaveGuard {
    /// # Panics
    ///
    /// Panics if a save is already running on this thread.
    pub fn enter() -> Self {
        SAVING.with(|saving| {
            assert!(!saving.get(), "re-entrant package save");
            saving.set(true);
        });
        Self { _private: () }
    }

    pub fn is_saving() -> bool {
        SAVING.with(Cell::get)
    }
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        SAVING.with(|saving| saving.set(false));
    }
}

/// Names, imports and exports of the package being saved, in table order.
pub(crate) struct SaveTables {
    pub(crate) package: ObjectHandle,
    pub(crate) names: IndexSet<Name>,
    pub(crate) imports: IndexSet<ObjectHandle>,
    pub(crate) exports: IndexSet<ObjectHandle>,
}

impl SaveTables {
    /// Table index of `object`. The package itself and anything untagged map
    /// to null.
    pub(crate) fn object_index(&self, object: Option<ObjectHandle>) -> PackageIndex {
        let Some(object) = object else {
            return PackageIndex::NULL;
        };
        if let Some(i) = self.exports.get_index_of(&object) {
            PackageIndex::from_export(i)
        } else if let Some(i) = self.imports.get_index_of(&object) {
            PackageIndex::from_import(i)
        } else {
            PackageIndex::NULL
        }
    }

    /// Record a reference found in an export. Objects outside the package
    /// become imports.
    pub(crate) fn tag_reference(&mut self, graph: &ObjectGraph, object: ObjectHandle) {
        if object == self.package
            || !graph.is_valid(object)
            || self.exports.contains(&object)
            || graph.is_in(object, self.package)
        {
            return;
        }
        self.tag_import(graph, object);
    }

    fn tag_import(&mut self, graph: &ObjectGraph, object: ObjectHandle) {
        if self.imports.contains(&object) {
            return;
        }
        let Some(record) = graph.record(object) else {
            return;
        };
        if let Some(outer) = record.outer {
            self.tag_import(graph, outer);
        }
        self.names.insert(record.name);
        if let Some(class_name) = graph.name_of(record.class) {
            self.names.insert(class_name);
        }
        if let Some(class_package) = graph.name_of(graph.outermost(record.class)) {
            self.names.insert(class_package);
        }
        self.imports.insert(object);
    }

    fn import_entry(&self, graph: &ObjectGraph, object: ObjectHandle) -> LinkerResult<ObjectImport> {
        let record = graph.record(object).ok_or(ObjectError::StaleHandle(object))?;
        let class_name = graph.name_of(record.class).unwrap_or(Name::NONE);
        let class_package = graph.name_of(graph.outermost(record.class)).unwrap_or(Name::NONE);
        Ok(ObjectImport::new(
            class_package,
            class_name,
            record.name,
            self.object_index(record.outer),
        ))
    }

    fn export_entry(&self, graph: &ObjectGraph, object: ObjectHandle, guid: Guid) -> LinkerResult<ObjectExport> {
        let record = graph.record(object).ok_or(ObjectError::StaleHandle(object))?;
        let mut export = ObjectExport::new(record.name);
        export.class_index = if record.class == graph.class_class() {
            PackageIndex::NULL
        } else {
            self.object_index(Some(record.class))
        };
        export.super_index = self.object_index(record.class_def().and_then(|def| def.super_class));
        export.outer_index = self.object_index(record.outer);
        export.object_flags = record.flags & ObjectFlags::MASK_LOAD;
        export.package_guid = guid;
        Ok(export)
    }
}

/// Save `package` to an in-memory image.
///
/// Exports are `root` plus every object in the package carrying any of
/// `top_level_flags`, and everything inside the package they reference that
/// is not transient.
///
/// # Panics
///
/// Panics when called while another save is running on this thread, or if
/// an export serializes a name the tagging pass did not see.
pub fn save_package(
    graph: &mut ObjectGraph,
    package: ObjectHandle,
    root: Option<ObjectHandle>,
    top_level_flags: ObjectFlags,
    config: &LinkerConfig,
) -> LinkerResult<Vec<u8>> {
    save_package_version(graph, package, root, top_level_flags, config, VER_PACKAGE_LATEST)
}

/// [`save_package`] writing an older file version.
pub(crate) fn save_package_version(
    graph: &mut ObjectGraph,
    package: ObjectHandle,
    root: Option<ObjectHandle>,
    top_level_flags: ObjectFlags,
    config: &LinkerConfig,
    version: u32,
) -> LinkerResult<Vec<u8>> {
    let _guard = SaveGuard::enter();
    if graph.package_state(package).is_none() {
        return Err(LinkerError::NotAPackage(package));
    }

    let exports = tag_exports(graph, package, root, top_level_flags);
    for &object in &exports {
        graph.pre_save(object);
    }
    let exports = tag_exports(graph, package, root, top_level_flags);

    let result = write_package(graph, package, exports, config, version);
    for object in graph.objects() {
        graph.clear_flags(object, ObjectFlags::TAG_EXP | ObjectFlags::TAG_IMP);
    }
    result
}

fn tag_exports(
    graph: &mut ObjectGraph,
    package: ObjectHandle,
    root: Option<ObjectHandle>,
    top_level_flags: ObjectFlags,
) -> IndexSet<ObjectHandle> {
    let all = graph.objects();
    for &object in &all {
        graph.clear_flags(object, ObjectFlags::TAG_EXP | ObjectFlags::TAG_IMP);
    }

    let mut queue = VecDeque::new();
    if let Some(root) = root {
        tag_export(graph, package, root, &mut queue);
    }
    if !top_level_flags.is_empty() {
        for &object in &all {
            if graph.has_any_flags(object, top_level_flags) {
                tag_export(graph, package, object, &mut queue);
            }
        }
    }
    let mut refs = Vec::new();
    while let Some(object) = queue.pop_front() {
        refs.clear();
        graph.referenced_objects(object, &mut refs);
        for &r in &refs {
            tag_export(graph, package, r, &mut queue);
        }
    }

    all.into_iter()
        .filter(|&object| graph.has_any_flags(object, ObjectFlags::TAG_EXP))
        .collect()
}

fn tag_export(graph: &mut ObjectGraph, package: ObjectHandle, object: ObjectHandle, queue: &mut VecDeque<ObjectHandle>) {
    if !graph.is_valid(object)
        || !graph.is_in(object, package)
        || graph.has_any_flags(
            object,
            ObjectFlags::TAG_EXP | ObjectFlags::TRANSIENT | ObjectFlags::PENDING_KILL | ObjectFlags::BEGIN_DESTROYED,
        )
    {
        return;
    }
    let transient_class = graph
        .class_of(object)
        .and_then(|class| graph.class_def(class))
        .is_some_and(|def| def.flags.contains(ClassFlags::TRANSIENT));
    if transient_class {
        return;
    }
    graph.set_flags(object, ObjectFlags::TAG_EXP);
    queue.push_back(object);
}

fn write_package(
    graph: &mut ObjectGraph,
    package: ObjectHandle,
    exports: IndexSet<ObjectHandle>,
    config: &LinkerConfig,
    version: u32,
) -> LinkerResult<Vec<u8>> {
    let filter_editor_only = config.filter_editor_only;
    let binary = config.binary_properties;
    let mut tables = SaveTables {
        package,
        names: IndexSet::new(),
        imports: IndexSet::new(),
        exports,
    };

    // Import tagging: walk every export body and record what leaves the package.
    for i in 0..tables.exports.len() {
        let object = tables.exports[i];
        let record = graph.record(object).ok_or(ObjectError::StaleHandle(object))?;
        let (name, class, outer) = (record.name, record.class, record.outer);
        tables.names.insert(name);
        if class != graph.class_class() {
            tables.tag_reference(graph, class);
        }
        if let Some(outer) = outer {
            tables.tag_reference(graph, outer);
        }
        let mut state = graph.take_serial_state(object)?;
        let result = {
            let mut ar = TagArchive {
                graph,
                tables: &mut tables,
                filter_editor_only,
                binary,
            };
            serialize_object_body(&mut ar, &mut state)
        };
        graph.restore_serial_state(state)?;
        result?;
    }
    for &object in &tables.imports {
        graph.set_flags(object, ObjectFlags::TAG_IMP);
    }

    let guid = Guid::new();
    let mut package_flags = graph
        .package_state(package)
        .map(|s| s.flags)
        .unwrap_or_default()
        - PackageFlags::MASK_TRANSIENT
        - PackageFlags::STORE_COMPRESSED
        - PackageFlags::COOKED
        - PackageFlags::FILTER_EDITOR_ONLY;
    package_flags.set(PackageFlags::COOKED, binary);
    package_flags.set(PackageFlags::FILTER_EDITOR_ONLY, filter_editor_only);

    let mut summary = PackageFileSummary {
        file_version: version,
        package_flags,
        guid,
        name_count: if version >= VER_NAME_TABLE { tables.names.len() as u32 } else { 0 },
        import_count: tables.imports.len() as u32,
        export_count: tables.exports.len() as u32,
        ..PackageFileSummary::default()
    };

    let mut stream = MemoryStream::new();
    summary.write(&mut stream)?;
    let tables_start = stream.tell()?;

    let mut entries = Vec::with_capacity(tables.exports.len());
    {
        let names = NameWriter {
            map: &tables.names,
            table: graph.names(),
            version,
        };
        if version >= VER_NAME_TABLE {
            summary.name_offset = stream.tell()? as u32;
            for &name in &tables.names {
                stream.write_string(graph.resolve(name))?;
            }
        }
        summary.import_offset = stream.tell()? as u32;
        for &object in &tables.imports {
            tables.import_entry(graph, object)?.write(&mut stream, &names)?;
        }
        summary.export_offset = stream.tell()? as u32;
        for &object in &tables.exports {
            let entry = tables.export_entry(graph, object, guid)?;
            entry.write(&mut stream, &names)?;
            entries.push(entry);
        }
        summary.total_header_size = stream.tell()? as u32;
    }

    for (i, &object) in tables.exports.iter().enumerate() {
        let offset = stream.tell()?;
        let mut state = graph.take_serial_state(object)?;
        let result = {
            let mut ar = SaveArchive {
                stream: &mut stream,
                tables: &tables,
                names: NameWriter {
                    map: &tables.names,
                    table: graph.names(),
                    version,
                },
                filter_editor_only,
                binary,
            };
            serialize_object_body(&mut ar, &mut state)
        };
        graph.restore_serial_state(state)?;
        result?;
        entries[i].serial_offset = offset;
        entries[i].serial_size = stream.tell()? - offset;
    }

    // Patch the export table and the summary now that offsets are known.
    let end = stream.tell()?;
    {
        let names = NameWriter {
            map: &tables.names,
            table: graph.names(),
            version,
        };
        stream.seek(u64::from(summary.export_offset))?;
        for entry in &entries {
            entry.write(&mut stream, &names)?;
        }
        debug_assert_eq!(stream.tell()?, u64::from(summary.total_header_size));
    }
    stream.seek(0)?;
    summary.write(&mut stream)?;
    debug_assert_eq!(stream.tell()?, tables_start);
    stream.seek(end)?;

    if let Some(state) = graph.package_state_mut(package) {
        state.guid = guid;
    }

    let mut bytes = stream.to_bytes();
    let compressed = config.compression.enabled && version >= VER_COMPRESSED_CHUNKS;
    if compressed {
        let starts: Vec<u64> = entries.iter().map(|e| e.serial_offset).collect();
        bytes = compress_package(&bytes, &starts, &config.compression)?;
    }
    debug!(names = tables.names.len(), imports = tables.imports.len(), "save tables");
    info!(
        package = %graph.path_name(package),
        exports = tables.exports.len(),
        bytes = bytes.len(),
        compressed,
        "saved package"
    );
    Ok(bytes)
}
