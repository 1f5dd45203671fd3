//! Lazy object loading across linkers.

use std::collections::HashSet;

use kiln_object::{serialize_object_body, LinkerLink, ObjectGraph, SerialBody};
use kiln_store::{package_name_from_file, PackageStore};
use kiln_types::{known, ClassFlags, LinkerId, Name, ObjectFlags, ObjectHandle, PackageFlags, PackageIndex};
use tracing::{debug, error, warn};

use crate::archive::LoadArchive;
use crate::config::LinkerConfig;
use crate::error::{LinkerError, LinkerResult};
use crate::load::LinkerLoad;
use crate::manager::{LinkerManager, RedirectorFollowed};
use crate::resource::{ObjectExport, ObjectImport};

/// Everything a load operation touches, borrowed for its duration.
///
/// Linkers refer to each other by [`LinkerId`] and to objects by handle, so
/// every operation re-borrows what it needs from here instead of holding
/// references across calls.
pub struct LoadContext<'a> {
    pub graph: &'a mut ObjectGraph,
    pub linkers: &'a mut LinkerManager,
    pub store: &'a dyn PackageStore,
    pub config: &'a LinkerConfig,
}

impl<'a> LoadContext<'a> {
    pub fn new(
        graph: &'a mut ObjectGraph,
        linkers: &'a mut LinkerManager,
        store: &'a dyn PackageStore,
        config: &'a LinkerConfig,
    ) -> Self {
        Self {
            graph,
            linkers,
            store,
            config,
        }
    }

    /// Find or create the linker for `file`.
    ///
    /// The package object is `outer` when given, otherwise the top-level
    /// package named after the file, created if needed. A package that
    /// already has an attached linker reuses it.
    pub fn get_package_linker(&mut self, outer: Option<ObjectHandle>, file: &str) -> LinkerResult<LinkerId> {
        let package_name = package_name_from_file(file);
        let existing = match outer {
            Some(outer) => Some(outer),
            None => {
                let name = self.graph.intern(package_name);
                self.graph
                    .find_object(Some(self.graph.package_class()), None, name, false)
            }
        };
        if let Some(package) = existing {
            let state = self
                .graph
                .package_state(package)
                .ok_or(LinkerError::NotAPackage(package))?;
            if let Some(id) = state.linker.filter(|id| self.linkers.get(*id).is_some()) {
                return Ok(id);
            }
        }

        let stream = self
            .store
            .open_read(package_name)?
            .ok_or_else(|| LinkerError::PackageNotFound(package_name.to_owned()))?;
        let (package, created) = match existing {
            Some(package) => (package, false),
            None => {
                let name = self.graph.intern(package_name);
                let package = self.graph.construct_package(None, name, PackageFlags::empty())?;
                (package, true)
            }
        };

        let id = self.linkers.next_id();
        let mut linker = LinkerLoad::new(id, package, package_name, stream);
        if let Err(e) = linker.init(self.graph, self.config) {
            if created {
                self.graph.remove_object(package);
            }
            return Err(e);
        }
        Ok(self.linkers.insert(linker))
    }

    /// Resolve a package index of linker `id` to a live object.
    pub fn index_to_object(&mut self, id: LinkerId, index: PackageIndex) -> LinkerResult<Option<ObjectHandle>> {
        if index.is_null() {
            Ok(None)
        } else if index.is_export() {
            self.create_export(id, index.to_export())
        } else {
            self.create_import(id, index.to_import())
        }
    }

    // -----------------------------------------------------------------------
    // Exports
    // -----------------------------------------------------------------------

    /// Create (but do not load) the object for export `index`.
    ///
    /// The object is flagged `NEED_LOAD`; its body is read by
    /// [`preload`](Self::preload). Failures to resolve its class or outer
    /// are logged and yield `None`.
    pub fn create_export(&mut self, id: LinkerId, index: usize) -> LinkerResult<Option<ObjectHandle>> {
        let linker = self.linkers.require(id)?;
        let export = export_at(linker, index)?.clone();
        if let Some(object) = export.object.filter(|o| self.graph.is_valid(*o)) {
            return Ok(Some(object));
        }
        let package = linker.root();
        let package_name = linker.package_name().to_owned();
        let object_name = self.graph.resolve(export.object_name).to_owned();

        let class = if export.class_index.is_null() {
            self.graph.class_class()
        } else {
            match self.index_to_object(id, export.class_index)? {
                Some(class) if self.graph.class_def(class).is_some() => class,
                _ => {
                    warn!(package = %package_name, export = %object_name, "export class not found");
                    return Ok(None);
                }
            }
        };
        if self.graph.has_any_flags(class, ObjectFlags::NEED_LOAD) {
            self.preload(class)?;
        }

        let outer = if export.outer_index.is_null() {
            package
        } else {
            match self.index_to_object(id, export.outer_index)? {
                Some(outer) => outer,
                None => {
                    warn!(package = %package_name, export = %object_name, "export outer not found");
                    return Ok(None);
                }
            }
        };

        // Resolving the class or outer may have created this export already.
        if let Some(object) = self.linkers.require(id)?.exports[index]
            .object
            .filter(|o| self.graph.is_valid(*o))
        {
            return Ok(Some(object));
        }

        let flags = (export.object_flags & ObjectFlags::MASK_LOAD)
            | ObjectFlags::NEED_LOAD
            | ObjectFlags::NEED_POST_LOAD
            | ObjectFlags::WAS_LOADED;
        let object = match self
            .graph
            .construct_object(class, Some(outer), Some(export.object_name), flags)
        {
            Ok(object) => object,
            Err(e) => {
                warn!(package = %package_name, export = %object_name, error = %e, "failed to create export");
                return Ok(None);
            }
        };
        self.linkers.require_mut(id)?.exports[index].object = Some(object);
        self.graph.set_linker_link(
            object,
            LinkerLink {
                linker: id,
                export_index: index,
            },
        );
        self.linkers.serialize_context_mut().loaded_objects.push(object);
        debug!(package = %package_name, export = %object_name, object = %object, "created export");
        Ok(Some(object))
    }

    /// Read the body of `object` from its linker if it still needs loading.
    ///
    /// # Panics
    ///
    /// Panics when the bytes consumed differ from the export's recorded size,
    /// unless the object's class is deprecated.
    pub fn preload(&mut self, object: ObjectHandle) -> LinkerResult<()> {
        if !self.graph.has_any_flags(object, ObjectFlags::NEED_LOAD) {
            return Ok(());
        }
        let Some(link) = self.graph.linker_link(object) else {
            return Ok(());
        };
        let id = link.linker;
        let export = export_at(self.linkers.require(id)?, link.export_index)?.clone();

        if let Some(super_class) = self.index_to_object(id, export.super_index)? {
            self.preload(super_class)?;
        }
        if let Some(class) = self.graph.class_of(object) {
            if self.graph.has_any_flags(class, ObjectFlags::NEED_LOAD) {
                self.preload(class)?;
            }
        }
        if !self.graph.has_any_flags(object, ObjectFlags::NEED_LOAD) {
            return Ok(());
        }

        let linker = self.linkers.require_mut(id)?;
        let package_name = linker.package_name().to_owned();
        let loader = linker.loader_mut()?;
        let saved = loader.tell()?;
        loader.seek(export.serial_offset)?;
        self.graph.clear_flags(object, ObjectFlags::NEED_LOAD);

        let mut state = self.graph.take_serial_state(object)?;
        let deprecated = state.class_flags.contains(ClassFlags::DEPRECATED);
        let is_class = matches!(state.body, SerialBody::Class(_));
        let result = {
            let mut ar = LoadArchive::new(self, id)?;
            serialize_object_body(&mut ar, &mut state)
        };
        self.graph.restore_serial_state(state)?;

        let loader = self.linkers.require_mut(id)?.loader_mut()?;
        let consumed = loader.tell()?.saturating_sub(export.serial_offset);
        loader.seek(saved)?;
        result?;
        if consumed != export.serial_size {
            let object_name = self.graph.path_name(object);
            if deprecated {
                warn!(
                    package = %package_name,
                    object = %object_name,
                    expected = export.serial_size,
                    consumed,
                    "serial size mismatch on deprecated class"
                );
            } else {
                panic!(
                    "serial size mismatch loading {object_name} from {package_name}: expected {} bytes, consumed {consumed}",
                    export.serial_size
                );
            }
        }

        if is_class {
            self.graph.link_class(object)?;
        }
        debug!(package = %package_name, object = %object, bytes = consumed, "preloaded export");
        Ok(())
    }

    /// Create and load every export of linker `id`.
    pub fn load_all_objects(&mut self, id: LinkerId) -> LinkerResult<()> {
        let count = self.linkers.require(id)?.exports.len();
        for index in 0..count {
            if let Some(object) = self.create_export(id, index)? {
                self.preload(object)?;
            }
        }
        let package = self.linkers.require(id)?.root();
        if let Some(state) = self.graph.package_state_mut(package) {
            state.fully_loaded = true;
        }
        Ok(())
    }

    /// Detach linker `id`; see [`LinkerManager::detach`].
    pub fn detach(&mut self, id: LinkerId) {
        self.linkers.detach(self.graph, id);
    }

    // -----------------------------------------------------------------------
    // Imports
    // -----------------------------------------------------------------------

    pub fn create_import(&mut self, id: LinkerId, index: usize) -> LinkerResult<Option<ObjectHandle>> {
        let import = import_at(self.linkers.require(id)?, index)?;
        if let Some(object) = import.object.filter(|o| self.graph.is_valid(*o)) {
            return Ok(Some(object));
        }
        self.verify_import(id, index)?;
        Ok(import_at(self.linkers.require(id)?, index)?.object)
    }

    /// Resolve import `index` of linker `id`.
    ///
    /// Top-level packages resolve to the resident package when it is
    /// memory-only, otherwise through their own linker. Nested imports try,
    /// in order: the source linker's export table, a redirector found there,
    /// and objects already in memory under the resolved outer.
    pub fn verify_import(&mut self, id: LinkerId, index: usize) -> LinkerResult<()> {
        let import = import_at(self.linkers.require(id)?, index)?.clone();
        let package_name = self.linkers.require(id)?.package_name().to_owned();
        self.linkers.serialize_context_mut().import_count += 1;
        let object_name = self.graph.resolve(import.object_name).to_owned();

        if import.outer_index.is_null() {
            if import.class_name != known::PACKAGE {
                warn!(package = %package_name, import = %object_name, "top-level import is not a package");
                return Ok(());
            }
            let resident = self.graph.find_object(
                Some(self.graph.package_class()),
                None,
                import.object_name,
                false,
            );
            let memory_only = resident
                .and_then(|p| self.graph.package_state(p))
                .is_some_and(|s| s.flags.intersects(PackageFlags::MASK_IN_MEMORY_ONLY));
            let (object, source) = match resident {
                Some(package) if memory_only => (Some(package), None),
                _ => match self.get_package_linker(None, &object_name) {
                    Ok(source) => (Some(self.linkers.require(source)?.root()), Some(source)),
                    Err(e) => {
                        if resident.is_none() {
                            error!(package = %package_name, import = %object_name, error = %e, "failed to load imported package");
                        }
                        (resident, None)
                    }
                },
            };
            let slot = &mut self.linkers.require_mut(id)?.imports[index];
            slot.object = object;
            slot.source_linker = source;
            slot.source_index = None;
            return Ok(());
        }

        if !import.outer_index.is_import() {
            warn!(package = %package_name, import = %object_name, "import outer is not an import");
            return Ok(());
        }
        let outer_index = import.outer_index.to_import();
        if outer_index == index {
            warn!(package = %package_name, import = %object_name, "import is its own outer");
            return Ok(());
        }
        let outer = self.create_import(id, outer_index)?;
        let (source, source_outer) = {
            let outer_import = import_at(self.linkers.require(id)?, outer_index)?;
            (outer_import.source_linker, outer_import.source_index)
        };

        let mut resolved = None;
        if let Some(source) = source.filter(|s| self.linkers.get(*s).is_some()) {
            let outer_export = source_outer.map_or(PackageIndex::NULL, PackageIndex::from_export);
            let linker = self.linkers.require(source)?;
            if let Some(found) = linker.find_export(self.graph.names(), import.object_name, outer_export) {
                let class_name = linker.export_class_name(found);
                let public = linker.exports[found].object_flags.contains(ObjectFlags::PUBLIC);
                if class_name == Some(import.class_name) {
                    if !public {
                        error!(package = %package_name, import = %object_name, "imported object is not public");
                        return Ok(());
                    }
                    if let Some(object) = self.create_export(source, found)? {
                        resolved = Some((object, Some(source), Some(found)));
                    }
                } else if class_name == Some(known::OBJECT_REDIRECTOR) {
                    if let Some(object) = self.follow_redirector(&package_name, source, found, import.class_name)? {
                        resolved = Some((object, Some(source), Some(found)));
                    } else {
                        // An incompatible or broken redirector resolves to nothing.
                        return Ok(());
                    }
                } else {
                    let names = self.graph.names();
                    warn!(
                        package = %package_name,
                        import = %object_name,
                        expected = %names.resolve(import.class_name),
                        found = %class_name.map_or("<none>", |c| names.resolve(c)),
                        "import class differs from the source export; resave the importing package"
                    );
                }
            }
        }

        // In memory: only objects of memory-only packages, or ones that are
        // public, native or transient.
        if resolved.is_none() {
            if let Some(outer) = outer {
                let memory_only = self
                    .graph
                    .package_state(self.graph.outermost(outer))
                    .is_some_and(|s| s.flags.intersects(PackageFlags::MASK_IN_MEMORY_ONLY));
                let found = self
                    .graph
                    .find_object(None, Some(outer), import.object_name, false)
                    .filter(|o| {
                        self.graph
                            .class_of(*o)
                            .and_then(|c| self.graph.name_of(c))
                            .is_some_and(|c| c == import.class_name)
                    })
                    .filter(|o| {
                        memory_only
                            || self.graph.has_any_flags(
                                *o,
                                ObjectFlags::PUBLIC | ObjectFlags::NATIVE | ObjectFlags::TRANSIENT,
                            )
                    });
                resolved = found.map(|object| (object, None, None));
            }
        }

        match resolved {
            Some((object, source_linker, source_index)) => {
                let slot = &mut self.linkers.require_mut(id)?.imports[index];
                slot.object = Some(object);
                slot.source_linker = source_linker;
                slot.source_index = source_index;
            }
            None => {
                warn!(package = %package_name, import = %object_name, "failed to resolve import");
            }
        }
        Ok(())
    }

    fn follow_redirector(
        &mut self,
        package_name: &str,
        source: LinkerId,
        export: usize,
        expected_class: Name,
    ) -> LinkerResult<Option<ObjectHandle>> {
        let Some(redirector) = self.create_export(source, export)? else {
            return Ok(None);
        };
        let redirector_class = self.graph.redirector_class();
        let mut visited = HashSet::new();
        let mut current = redirector;
        loop {
            if !visited.insert(current) {
                error!(package = %package_name, redirector = %self.graph.path_name(redirector), "redirector loop");
                return Ok(None);
            }
            self.preload(current)?;
            if !self.graph.is_a(current, redirector_class) {
                break;
            }
            let destination = self
                .graph
                .property(current, known::DESTINATION_OBJECT)
                .ok()
                .and_then(|v| v.as_object())
                .filter(|d| self.graph.is_valid(*d));
            match destination {
                Some(destination) => current = destination,
                None => {
                    warn!(package = %package_name, redirector = %self.graph.path_name(current), "redirector has no destination");
                    return Ok(None);
                }
            }
        }

        let compatible = match self.graph.find_class(expected_class) {
            Some(class) => self.graph.is_a(current, class),
            None => self
                .graph
                .class_of(current)
                .and_then(|c| self.graph.name_of(c))
                .is_some_and(|c| c == expected_class),
        };
        if !compatible {
            warn!(
                package = %package_name,
                redirector = %self.graph.path_name(redirector),
                destination = %self.graph.path_name(current),
                expected = %self.graph.resolve(expected_class),
                "redirector destination has an incompatible class"
            );
            return Ok(None);
        }
        let event = RedirectorFollowed {
            package: package_name.to_owned(),
            redirector,
            destination: current,
        };
        debug!(package = %package_name, destination = %self.graph.path_name(current), "followed redirector");
        self.linkers.notify_redirector_followed(&event);
        Ok(Some(current))
    }
}

fn export_at(linker: &LinkerLoad, index: usize) -> LinkerResult<&ObjectExport> {
    linker.exports.get(index).ok_or(LinkerError::IndexOutOfRange {
        table: "export",
        index,
        len: linker.exports.len(),
    })
}

fn import_at(linker: &LinkerLoad, index: usize) -> LinkerResult<&ObjectImport> {
    linker.imports.get(index).ok_or(LinkerError::IndexOutOfRange {
        table: "import",
        index,
        len: linker.imports.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use kiln_object::{ClassBuilder, NativeObject, ObjectResult};
    use kiln_reflect::{PropertyKind, PropertyValue};
    use kiln_store::{Archive, ArchiveExt, InMemoryPackageStore};
    use kiln_types::version::VER_NAME_TABLE;

    use super::*;
    use crate::config::CompressionConfig;
    use crate::save::{save_package, save_package_version};
    use crate::test_support::{build_level, engine_graph, find_path, get};

    fn saved_level(config: &LinkerConfig) -> InMemoryPackageStore {
        let (mut graph, material) = engine_graph();
        let (level, _) = build_level(&mut graph, material);
        let bytes = save_package(&mut graph, level, None, ObjectFlags::STANDALONE, config).unwrap();
        let store = InMemoryPackageStore::new();
        store.insert_bytes("Level", bytes).unwrap();
        store
    }

    fn load_level(store: &InMemoryPackageStore, config: &LinkerConfig) -> (ObjectGraph, LinkerManager) {
        let (mut graph, _) = engine_graph();
        let mut linkers = LinkerManager::new();
        {
            let mut cx = LoadContext::new(&mut graph, &mut linkers, store, config);
            let id = cx.get_package_linker(None, "Content/Level.lpk").unwrap();
            cx.load_all_objects(id).unwrap();
        }
        (graph, linkers)
    }

    fn assert_level(graph: &mut ObjectGraph) {
        let rock = find_path(graph, "Level.Rock").unwrap();
        let base = find_path(graph, "Level.Base").unwrap();
        assert_eq!(get(graph, rock, "Roughness"), PropertyValue::Float(0.5));
        assert_eq!(get(graph, rock, "Label"), PropertyValue::String("hello".into()));
        assert_eq!(get(graph, rock, "Parent"), PropertyValue::Object(Some(base)));
        assert_eq!(get(graph, base, "Label"), PropertyValue::String("base".into()));
        assert!(!graph.has_any_flags(rock, ObjectFlags::NEED_LOAD));
        assert!(graph.has_any_flags(rock, ObjectFlags::WAS_LOADED | ObjectFlags::NEED_POST_LOAD));
        assert!(graph.has_any_flags(rock, ObjectFlags::STANDALONE));
    }

    #[test]
    fn level_round_trips() {
        let config = LinkerConfig::default();
        let store = saved_level(&config);
        let (mut graph, linkers) = load_level(&store, &config);
        assert_level(&mut graph);

        let level = find_path(&mut graph, "Level").unwrap();
        let state = graph.package_state(level).unwrap();
        assert!(state.fully_loaded);
        assert!(!state.flags.contains(PackageFlags::NEWLY_CREATED));
        assert_eq!(linkers.len(), 1);
        assert_eq!(linkers.serialize_context().loaded_objects.len(), 2);
    }

    #[test]
    fn compressed_level_round_trips() {
        let config = LinkerConfig {
            compression: CompressionConfig {
                enabled: true,
                level: 3,
                min_chunk_size: 16,
                max_chunk_size: 64,
            },
            ..LinkerConfig::default()
        };
        let store = saved_level(&config);
        let (mut graph, linkers) = load_level(&store, &config);
        assert_level(&mut graph);
        let linker = linkers.iter().next().unwrap();
        assert!(linker.summary.is_compressed());
        assert!(linker.summary.chunks.len() > 1);
        assert!(linker.summary.package_flags.contains(PackageFlags::STORE_COMPRESSED));
    }

    #[test]
    fn binary_properties_round_trip() {
        let config = LinkerConfig {
            binary_properties: true,
            ..LinkerConfig::default()
        };
        let store = saved_level(&config);
        let (mut graph, linkers) = load_level(&store, &config);
        assert_level(&mut graph);
        let linker = linkers.iter().next().unwrap();
        assert!(linker.summary.package_flags.contains(PackageFlags::COOKED));
    }

    #[test]
    fn inline_names_load() {
        let config = LinkerConfig::default();
        let (mut graph, material) = engine_graph();
        let (level, _) = build_level(&mut graph, material);
        let bytes =
            save_package_version(&mut graph, level, None, ObjectFlags::STANDALONE, &config, VER_NAME_TABLE - 1)
                .unwrap();
        let store = InMemoryPackageStore::new();
        store.insert_bytes("Level", bytes).unwrap();

        let (mut graph, linkers) = load_level(&store, &config);
        assert_level(&mut graph);
        let linker = linkers.iter().next().unwrap();
        assert_eq!(linker.file_version(), VER_NAME_TABLE - 1);
        assert!(linker.names.is_empty());
    }

    #[test]
    fn exports_are_created_lazily() {
        let config = LinkerConfig::default();
        let store = saved_level(&config);
        let (mut graph, _) = engine_graph();
        let mut linkers = LinkerManager::new();
        let mut cx = LoadContext::new(&mut graph, &mut linkers, &store, &config);
        let id = cx.get_package_linker(None, "Level").unwrap();
        assert_eq!(cx.get_package_linker(None, "Level").unwrap(), id);
        assert!(cx.linkers.require(id).unwrap().exports.iter().all(|e| e.object.is_none()));

        let rock_name = cx.graph.intern("Rock");
        let index = cx
            .linkers
            .require(id)
            .unwrap()
            .find_export(cx.graph.names(), rock_name, PackageIndex::NULL)
            .unwrap();
        let rock = cx.create_export(id, index).unwrap().unwrap();
        assert!(cx.graph.has_any_flags(rock, ObjectFlags::NEED_LOAD));
        assert_eq!(cx.create_export(id, index).unwrap(), Some(rock));
        assert_eq!(
            cx.graph.linker_link(rock),
            Some(LinkerLink {
                linker: id,
                export_index: index,
            })
        );

        cx.preload(rock).unwrap();
        assert!(!cx.graph.has_any_flags(rock, ObjectFlags::NEED_LOAD));
        let parent = cx.graph.intern("Parent");
        let base = cx.graph.property(rock, parent).unwrap().as_object().unwrap();
        // Referenced exports are created on demand but not loaded.
        assert!(cx.graph.has_any_flags(base, ObjectFlags::NEED_LOAD));
        // Preloading again reads nothing.
        cx.preload(rock).unwrap();
    }

    #[test]
    fn missing_package_is_an_error() {
        let config = LinkerConfig::default();
        let store = InMemoryPackageStore::new();
        let (mut graph, _) = engine_graph();
        let mut linkers = LinkerManager::new();
        let mut cx = LoadContext::new(&mut graph, &mut linkers, &store, &config);
        assert!(matches!(
            cx.get_package_linker(None, "Nowhere"),
            Err(LinkerError::PackageNotFound(_))
        ));
    }

    #[test]
    fn failed_init_leaves_no_package() {
        let config = LinkerConfig::default();
        let store = InMemoryPackageStore::new();
        store.insert_bytes("Broken", vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let (mut graph, _) = engine_graph();
        let mut linkers = LinkerManager::new();
        {
            let mut cx = LoadContext::new(&mut graph, &mut linkers, &store, &config);
            assert!(matches!(
                cx.get_package_linker(None, "Broken"),
                Err(LinkerError::BadTag { .. })
            ));
        }
        assert!(find_path(&mut graph, "Broken").is_none());
        assert!(linkers.is_empty());
    }

    #[test]
    fn non_native_classes_are_exported() {
        let config = LinkerConfig::default();
        let (mut graph, _) = engine_graph();
        let game_name = graph.intern("Game");
        let game = graph.construct_package(None, game_name, PackageFlags::empty()).unwrap();
        let crate_class = graph
            .register_class(
                ClassBuilder::new("Crate")
                    .in_package(game)
                    .property("Count", PropertyKind::Int)
                    .property("Tags", PropertyKind::Array(Box::new(PropertyKind::String))),
            )
            .unwrap();
        let name = graph.intern("Crate1");
        let instance = graph
            .construct_object(crate_class, Some(game), Some(name), ObjectFlags::PUBLIC | ObjectFlags::STANDALONE)
            .unwrap();
        let count = graph.intern("Count");
        graph.set_property(instance, count, PropertyValue::Int(42)).unwrap();
        let tags = graph.intern("Tags");
        graph
            .set_property(
                instance,
                tags,
                PropertyValue::Array(vec![PropertyValue::String("a".into()), PropertyValue::String("b".into())]),
            )
            .unwrap();
        let bytes = save_package(&mut graph, game, None, ObjectFlags::STANDALONE, &config).unwrap();
        let store = InMemoryPackageStore::new();
        store.insert_bytes("Game", bytes).unwrap();

        let (mut fresh, _) = engine_graph();
        let mut linkers = LinkerManager::new();
        {
            let mut cx = LoadContext::new(&mut fresh, &mut linkers, &store, &config);
            let id = cx.get_package_linker(None, "Game").unwrap();
            cx.load_all_objects(id).unwrap();
        }
        let class = find_path(&mut fresh, "Game.Crate").unwrap();
        let def = fresh.class_def(class).unwrap();
        assert!(def.is_linked());
        assert_eq!(def.super_class, Some(fresh.object_class()));
        let instance = find_path(&mut fresh, "Game.Crate1").unwrap();
        assert_eq!(fresh.class_of(instance), Some(class));
        assert_eq!(get(&mut fresh, instance, "Count"), PropertyValue::Int(42));
        assert_eq!(
            get(&mut fresh, instance, "Tags"),
            PropertyValue::Array(vec![PropertyValue::String("a".into()), PropertyValue::String("b".into())])
        );
    }

    #[derive(Default)]
    struct Lopsided;

    impl NativeObject for Lopsided {
        fn serialize(&mut self, ar: &mut dyn Archive) -> ObjectResult<()> {
            let mut word = 7u32;
            ar.serialize_u32(&mut word)?;
            if ar.is_saving() {
                ar.serialize_u32(&mut word)?;
            }
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn lopsided_graph(flags: ClassFlags) -> (ObjectGraph, ObjectHandle) {
        let (mut graph, _) = engine_graph();
        let engine = graph.native_package("Engine").unwrap();
        let class = graph
            .register_class(
                ClassBuilder::new("Lopsided")
                    .in_package(engine)
                    .flags(flags)
                    .native(|| Box::new(Lopsided)),
            )
            .unwrap();
        (graph, class)
    }

    fn load_lopsided(flags: ClassFlags) -> (ObjectGraph, Option<ObjectHandle>) {
        let config = LinkerConfig::default();
        let (mut graph, class) = lopsided_graph(flags);
        let name = graph.intern("Odd");
        let package = graph.construct_package(None, name, PackageFlags::empty()).unwrap();
        graph
            .construct_object(class, Some(package), None, ObjectFlags::STANDALONE)
            .unwrap();
        let bytes = save_package(&mut graph, package, None, ObjectFlags::STANDALONE, &config).unwrap();
        let store = InMemoryPackageStore::new();
        store.insert_bytes("Odd", bytes).unwrap();

        let (mut fresh, _) = lopsided_graph(flags);
        let mut linkers = LinkerManager::new();
        let loaded = {
            let mut cx = LoadContext::new(&mut fresh, &mut linkers, &store, &config);
            let id = cx.get_package_linker(None, "Odd").unwrap();
            cx.load_all_objects(id).unwrap();
            cx.linkers.require(id).unwrap().exports[0].object
        };
        (fresh, loaded)
    }

    #[test]
    #[should_panic(expected = "serial size mismatch")]
    fn serial_size_mismatch_panics() {
        load_lopsided(ClassFlags::empty());
    }

    #[test]
    fn serial_size_mismatch_on_deprecated_class_only_warns() {
        let (graph, loaded) = load_lopsided(ClassFlags::DEPRECATED);
        let object = loaded.unwrap();
        assert!(!graph.has_any_flags(object, ObjectFlags::NEED_LOAD));
    }
}
