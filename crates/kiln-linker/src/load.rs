//! Reading a package's header and tables.

use std::fmt;

use kiln_object::{LinkerLink, ObjectGraph};
use kiln_store::{ByteStream, StoreError, StreamExt};
use kiln_types::version::{ENGINE_VERSION, VER_MIN_SUPPORTED, VER_NAME_TABLE};
use kiln_types::{known, LinkerId, Name, NameTable, ObjectHandle, PackageIndex};
use tracing::{debug, info, warn};

use crate::compression::CompressedReader;
use crate::config::LinkerConfig;
use crate::error::{LinkerError, LinkerResult};
use crate::resource::{NameReader, ObjectExport, ObjectImport, EXPORT_ENTRY_SIZE, IMPORT_ENTRY_SIZE};
use crate::summary::PackageFileSummary;

/// Number of export hash buckets. Must be a power of two.
pub const EXPORT_HASH_BUCKETS: usize = 256;

/// Progress of a linker through initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkerState {
    Created,
    SummaryParsed,
    ImportsParsed,
    ExportsParsed,
    ExportHashBuilt,
    Finalized,
}

/// Loader for one package file.
///
/// Owns the package stream while attached, and the import and export tables
/// read from it. Objects created from the tables point back at their export
/// through a [`LinkerLink`] held by the object graph.
///
/// # Invariants
///
/// - Every step of [`init`](Self::init) runs at most once.
/// - `exports[i].object == Some(h)` implies the graph's link for `h` is
///   `(self.id, i)`.
pub struct LinkerLoad {
    id: LinkerId,
    root: ObjectHandle,
    package_name: String,
    pub summary: PackageFileSummary,
    pub names: Vec<Name>,
    pub imports: Vec<ObjectImport>,
    pub exports: Vec<ObjectExport>,
    loader: Option<Box<dyn ByteStream>>,
    state: LinkerState,
    export_hash: Vec<Option<usize>>,
    hash_cursor: usize,
}

impl LinkerLoad {
    pub fn new(id: LinkerId, root: ObjectHandle, package_name: impl Into<String>, loader: Box<dyn ByteStream>) -> Self {
        Self {
            id,
            root,
            package_name: package_name.into(),
            summary: PackageFileSummary::default(),
            names: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            loader: Some(loader),
            state: LinkerState::Created,
            export_hash: Vec::new(),
            hash_cursor: 0,
        }
    }

    pub fn id(&self) -> LinkerId {
        self.id
    }

    /// The package object this linker loads into.
    pub fn root(&self) -> ObjectHandle {
        self.root
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn state(&self) -> LinkerState {
        self.state
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn file_version(&self) -> u32 {
        self.summary.file_version
    }

    pub(crate) fn loader_mut(&mut self) -> LinkerResult<&mut dyn ByteStream> {
        match self.loader.as_mut() {
            Some(loader) => Ok(loader.as_mut()),
            None => Err(LinkerError::NoLoader(self.package_name.clone())),
        }
    }

    /// Release the package stream. Exports already created stay valid; those
    /// not yet loaded can no longer be.
    pub fn reset_loader(&mut self) {
        if self.loader.take().is_some() {
            debug!(package = %self.package_name, "released loader");
        }
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// Run every remaining initialization step. Re-entering after success
    /// reads nothing.
    pub fn init(&mut self, graph: &mut ObjectGraph, config: &LinkerConfig) -> LinkerResult<()> {
        if self.state < LinkerState::SummaryParsed {
            self.serialize_package_file_summary(graph.names_mut())?;
        }
        if self.state < LinkerState::ImportsParsed {
            self.serialize_import_map(graph.names_mut())?;
        }
        if self.state < LinkerState::ExportsParsed {
            self.serialize_export_map(graph.names_mut())?;
        }
        while self.state < LinkerState::ExportHashBuilt {
            self.create_export_hash(graph.names(), config.export_hash_step);
        }
        if self.state < LinkerState::Finalized {
            if config.find_existing_exports {
                self.find_existing_exports(graph);
            }
            if let Some(package) = graph.package_state_mut(self.root) {
                package.flags = self.summary.package_flags;
                package.guid = self.summary.guid;
                package.linker = Some(self.id);
            }
            self.state = LinkerState::Finalized;
            info!(
                package = %self.package_name,
                version = self.summary.file_version,
                imports = self.imports.len(),
                exports = self.exports.len(),
                "linker ready"
            );
        }
        Ok(())
    }

    /// Read the summary and the name table.
    pub fn serialize_package_file_summary(&mut self, table: &mut NameTable) -> LinkerResult<()> {
        let Some(loader) = self.loader.as_mut() else {
            return Err(LinkerError::NoLoader(self.package_name.clone()));
        };
        loader.seek(0)?;
        let summary = PackageFileSummary::read(loader.as_mut())?;
        if summary.file_version < VER_MIN_SUPPORTED {
            return Err(LinkerError::VersionTooOld {
                version: summary.file_version,
                min: VER_MIN_SUPPORTED,
            });
        }
        if summary.engine_version > ENGINE_VERSION {
            warn!(
                package = %self.package_name,
                engine_version = summary.engine_version,
                current = ENGINE_VERSION,
                "package saved by a newer engine"
            );
        }
        loader.set_version(summary.file_version);

        if summary.is_compressed() {
            let Some(raw) = self.loader.take() else {
                return Err(LinkerError::NoLoader(self.package_name.clone()));
            };
            let mut reader = CompressedReader::new(raw, summary.chunks.clone())?;
            reader.set_version(summary.file_version);
            self.loader = Some(Box::new(reader));
        }

        let loader = self.loader_mut()?;
        let size = loader.size()?;
        check_table(size, summary.name_offset, summary.name_count, 4, "name")?;
        check_table(size, summary.import_offset, summary.import_count, IMPORT_ENTRY_SIZE, "import")?;
        check_table(size, summary.export_offset, summary.export_count, EXPORT_ENTRY_SIZE, "export")?;

        let mut names = Vec::new();
        if summary.file_version >= VER_NAME_TABLE {
            loader.seek(u64::from(summary.name_offset))?;
            names.reserve(summary.name_count as usize);
            for _ in 0..summary.name_count {
                let text = loader.read_string()?;
                names.push(table.intern(&text));
            }
        }

        self.imports = Vec::with_capacity(summary.import_count as usize);
        self.exports = Vec::with_capacity(summary.export_count as usize);
        self.names = names;
        self.summary = summary;
        self.state = LinkerState::SummaryParsed;
        Ok(())
    }

    pub fn serialize_import_map(&mut self, table: &mut NameTable) -> LinkerResult<()> {
        let count = self.summary.import_count;
        let offset = u64::from(self.summary.import_offset);
        let version = self.summary.file_version;
        let Some(loader) = self.loader.as_mut() else {
            return Err(LinkerError::NoLoader(self.package_name.clone()));
        };
        loader.seek(offset)?;
        let mut reader = NameReader {
            map: &self.names,
            table,
            version,
        };
        let mut imports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            imports.push(ObjectImport::read(loader.as_mut(), &mut reader)?);
        }
        self.imports = imports;
        self.state = LinkerState::ImportsParsed;
        Ok(())
    }

    pub fn serialize_export_map(&mut self, table: &mut NameTable) -> LinkerResult<()> {
        let count = self.summary.export_count;
        let offset = u64::from(self.summary.export_offset);
        let version = self.summary.file_version;
        let Some(loader) = self.loader.as_mut() else {
            return Err(LinkerError::NoLoader(self.package_name.clone()));
        };
        loader.seek(offset)?;
        let mut reader = NameReader {
            map: &self.names,
            table,
            version,
        };
        let mut exports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            exports.push(ObjectExport::read(loader.as_mut(), &mut reader)?);
        }
        self.exports = exports;
        self.state = LinkerState::ExportsParsed;
        Ok(())
    }

    /// Hash up to `step` more exports. Returns `true` once every export is
    /// hashed.
    pub fn create_export_hash(&mut self, table: &NameTable, step: usize) -> bool {
        if self.state >= LinkerState::ExportHashBuilt {
            return true;
        }
        if self.export_hash.is_empty() {
            self.export_hash = vec![None; EXPORT_HASH_BUCKETS];
        }
        let end = self.exports.len().min(self.hash_cursor + step.max(1));
        for i in self.hash_cursor..end {
            let bucket = bucket_of(table, self.exports[i].object_name);
            self.exports[i].hash_next = self.export_hash[bucket];
            self.export_hash[bucket] = Some(i);
        }
        self.hash_cursor = end;
        if end == self.exports.len() {
            self.state = LinkerState::ExportHashBuilt;
            true
        } else {
            false
        }
    }

    /// Find the export named `name` whose outer is `outer` (null for the
    /// package root).
    pub fn find_export(&self, table: &NameTable, name: Name, outer: PackageIndex) -> Option<usize> {
        if self.export_hash.is_empty() {
            return self
                .exports
                .iter()
                .position(|e| e.object_name == name && e.outer_index == outer);
        }
        let mut next = self.export_hash[bucket_of(table, name)];
        while let Some(i) = next {
            let export = &self.exports[i];
            if export.object_name == name && export.outer_index == outer {
                return Some(i);
            }
            next = export.hash_next;
        }
        None
    }

    /// Name of the class of export `index`, as recorded in the tables.
    pub fn export_class_name(&self, index: usize) -> Option<Name> {
        let class_index = self.exports.get(index)?.class_index;
        if class_index.is_null() {
            Some(known::CLASS)
        } else if class_index.is_import() {
            self.imports.get(class_index.to_import()).map(|i| i.object_name)
        } else {
            self.exports.get(class_index.to_export()).map(|e| e.object_name)
        }
    }

    /// Bind exports to objects that already exist in memory with the same
    /// path and exactly the export's class.
    pub fn find_existing_exports(&mut self, graph: &mut ObjectGraph) {
        let mut found = 0usize;
        for i in 0..self.exports.len() {
            if self.find_existing_export(graph, i, 0).is_some() {
                found += 1;
            }
        }
        debug!(package = %self.package_name, found, "matched existing exports");
    }

    fn find_existing_export(&mut self, graph: &mut ObjectGraph, index: usize, depth: usize) -> Option<ObjectHandle> {
        if depth > self.exports.len() {
            return None;
        }
        if let Some(object) = self.exports[index].object.filter(|&o| graph.is_valid(o)) {
            return Some(object);
        }
        let export = &self.exports[index];
        let name = export.object_name;
        let outer_index = export.outer_index;
        let outer = if outer_index.is_null() {
            self.root
        } else if outer_index.is_export() && outer_index.to_export() < self.exports.len() {
            self.find_existing_export(graph, outer_index.to_export(), depth + 1)?
        } else {
            return None;
        };
        let class = graph.find_class(self.export_class_name(index)?)?;
        let object = graph.find_object(Some(class), Some(outer), name, true)?;
        if graph.linker_link(object).is_some() {
            return None;
        }
        self.exports[index].object = Some(object);
        graph.set_linker_link(
            object,
            LinkerLink {
                linker: self.id,
                export_index: index,
            },
        );
        Some(object)
    }
}

fn bucket_of(table: &NameTable, name: Name) -> usize {
    table.hash(name) as usize & (EXPORT_HASH_BUCKETS - 1)
}

fn check_table(size: u64, offset: u32, count: u32, min_entry: u64, table: &str) -> LinkerResult<()> {
    if count == 0 {
        return Ok(());
    }
    let end = u64::from(offset) + u64::from(count) * min_entry;
    if end > size {
        return Err(StoreError::Corrupt {
            offset: u64::from(offset),
            reason: format!("{table} table of {count} entries runs past the end of the package ({size} bytes)"),
        }
        .into());
    }
    Ok(())
}

impl fmt::Debug for LinkerLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkerLoad")
            .field("id", &self.id)
            .field("package", &self.package_name)
            .field("state", &self.state)
            .field("names", &self.names.len())
            .field("imports", &self.imports.len())
            .field("exports", &self.exports.len())
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}
