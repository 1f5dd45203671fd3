use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kiln_linker::{save_package, LinkerManager, LoadContext, RedirectorFollowed};
use kiln_object::{GcReport, ObjectGraph};
use kiln_store::{package_name_from_file, PackageStore};
use kiln_types::{LinkerId, ObjectFlags, ObjectHandle, PackageFlags};
use tracing::{debug, error, info};

use crate::config::RuntimeConfig;
use crate::error::PackageResult;

/// The package manager: one object graph, its linkers and a package store.
///
/// All package-level operations go through here. Loads nest through
/// [`begin_load`](Self::begin_load) / [`end_load`](Self::end_load); only the
/// outermost scope finishes loading and runs post-load hooks.
pub struct Runtime {
    graph: ObjectGraph,
    linkers: LinkerManager,
    store: Arc<dyn PackageStore>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(store: Arc<dyn PackageStore>, config: RuntimeConfig) -> Self {
        let graph = ObjectGraph::new(&config.gc);
        info!(
            disregard = config.gc.max_objects_not_considered_by_gc,
            compression = config.linker.compression.enabled,
            "package runtime started"
        );
        Self {
            graph,
            linkers: LinkerManager::new(),
            store,
            config,
        }
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        &mut self.graph
    }

    pub fn linkers(&self) -> &LinkerManager {
        &self.linkers
    }

    pub fn store(&self) -> &Arc<dyn PackageStore> {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn load_context(&mut self) -> LoadContext<'_> {
        LoadContext::new(
            &mut self.graph,
            &mut self.linkers,
            self.store.as_ref(),
            &self.config.linker,
        )
    }

    /// Create an in-memory package that has never been saved.
    pub fn create_package(&mut self, outer: Option<ObjectHandle>, name: &str) -> PackageResult<ObjectHandle> {
        let name = self.graph.intern(name);
        Ok(self
            .graph
            .construct_package(outer, name, PackageFlags::NEWLY_CREATED)?)
    }

    // -----------------------------------------------------------------------
    // Load scopes
    // -----------------------------------------------------------------------

    pub fn begin_load(&mut self) {
        if self.linkers.serialize_context_mut().enter() {
            debug!("outermost load scope opened");
        }
    }

    /// Close a load scope.
    ///
    /// Closing the outermost scope preloads every object created during it,
    /// in (linker, serial offset) order with linker-less objects last, until
    /// no new objects appear, then runs the post-load hooks.
    pub fn end_load(&mut self) {
        if !self.linkers.serialize_context_mut().leave() {
            return;
        }

        let mut loaded = Vec::new();
        loop {
            let mut batch = std::mem::take(&mut self.linkers.serialize_context_mut().loaded_objects);
            if batch.is_empty() {
                break;
            }
            batch.sort_by_key(|&object| self.load_order(object));
            let mut cx = self.load_context();
            for &object in &batch {
                if !cx.graph.is_valid(object) {
                    continue;
                }
                if let Err(e) = cx.preload(object) {
                    let path = cx.graph.path_name(object);
                    error!(object = %path, error = %e, "failed to load object");
                }
            }
            loaded.extend(batch);
        }

        for &object in &loaded {
            if self.graph.has_any_flags(object, ObjectFlags::NEED_POST_LOAD) {
                self.graph.clear_flags(object, ObjectFlags::NEED_POST_LOAD);
                self.graph.post_load(object);
            }
        }

        let context = self.linkers.serialize_context_mut();
        let imports = std::mem::take(&mut context.import_count);
        debug!(objects = loaded.len(), imports, "outermost load scope closed");
    }

    fn load_order(&self, object: ObjectHandle) -> (bool, u32, u64) {
        let offset = |link: kiln_object::LinkerLink| {
            self.linkers
                .get(link.linker)
                .and_then(|l| l.exports.get(link.export_index))
                .map(|e| e.serial_offset)
        };
        match self.graph.linker_link(object) {
            Some(link) => (false, link.linker.index(), offset(link).unwrap_or(u64::MAX)),
            None => (true, u32::MAX, u64::MAX),
        }
    }

    // -----------------------------------------------------------------------
    // Packages
    // -----------------------------------------------------------------------

    /// Load the package stored under `file` and everything it exports.
    ///
    /// Returns `None` if the package cannot be found or its file is
    /// unreadable; the cause is logged.
    pub fn load_package(&mut self, outer: Option<ObjectHandle>, file: &str) -> Option<ObjectHandle> {
        self.begin_load();
        let result = self.load_package_linker(outer, file);
        self.end_load();
        match result {
            Ok(package) => {
                info!(file, package = %self.graph.path_name(package), "package loaded");
                Some(package)
            }
            Err(e) => {
                error!(file, error = %e, "failed to load package");
                None
            }
        }
    }

    fn load_package_linker(&mut self, outer: Option<ObjectHandle>, file: &str) -> PackageResult<ObjectHandle> {
        let mut cx = self.load_context();
        let id = cx.get_package_linker(outer, file)?;
        cx.load_all_objects(id)?;
        Ok(cx.linkers.require(id)?.root())
    }

    /// Save `package` to the store under `file`.
    ///
    /// A package that was loaded is fully loaded first and its linker is
    /// detached before the file is replaced. Returns `false` on failure; the
    /// cause is logged.
    pub fn save_package(
        &mut self,
        package: ObjectHandle,
        root: Option<ObjectHandle>,
        top_level_flags: ObjectFlags,
        file: &str,
    ) -> bool {
        match self.save_package_inner(package, root, top_level_flags, file) {
            Ok(bytes) => {
                info!(file, bytes, package = %self.graph.path_name(package), "package saved");
                true
            }
            Err(e) => {
                error!(file, error = %e, "failed to save package");
                false
            }
        }
    }

    fn save_package_inner(
        &mut self,
        package: ObjectHandle,
        root: Option<ObjectHandle>,
        top_level_flags: ObjectFlags,
        file: &str,
    ) -> PackageResult<usize> {
        if let Some(id) = self.attached_linker(package) {
            self.begin_load();
            let loaded = self.load_context().load_all_objects(id);
            self.end_load();
            loaded?;
        }

        let bytes = save_package(&mut self.graph, package, root, top_level_flags, &self.config.linker)?;
        self.linkers.reset_loaders(&mut self.graph, Some(package));

        let mut stream = self.store.open_write(package_name_from_file(file))?;
        stream.write_all(&bytes)?;
        stream.flush()?;

        if let Some(state) = self.graph.package_state_mut(package) {
            state.flags.remove(PackageFlags::NEWLY_CREATED);
        }
        Ok(bytes.len())
    }

    fn attached_linker(&self, package: ObjectHandle) -> Option<LinkerId> {
        self.graph
            .package_state(package)?
            .linker
            .filter(|id| self.linkers.get(*id).is_some())
    }

    /// Detach the linkers of `package`, or of every package when `None`.
    pub fn reset_loaders(&mut self, package: Option<ObjectHandle>) {
        self.linkers.reset_loaders(&mut self.graph, package);
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Find a live object by name; see [`ObjectGraph::find_object`].
    pub fn find_object(
        &self,
        class: Option<ObjectHandle>,
        outer: Option<ObjectHandle>,
        name: &str,
        exact: bool,
    ) -> Option<ObjectHandle> {
        let name = self.graph.names().find(name)?;
        self.graph.find_object(class, outer, name, exact)
    }

    /// Find an object by dotted path, e.g. `"Level.Rock"`.
    pub fn find_path(&self, path: &str) -> Option<ObjectHandle> {
        path.split('.')
            .try_fold(None, |outer, part| self.find_object(None, outer, part, false).map(Some))
            .flatten()
    }

    // -----------------------------------------------------------------------
    // Collection
    // -----------------------------------------------------------------------

    /// Collect garbage and release linker state of destroyed objects.
    pub fn collect_garbage(&mut self, keep_flags: ObjectFlags, full_purge: bool) -> GcReport {
        let report = self.graph.collect_garbage(keep_flags, full_purge);
        self.linkers.process_detached(&mut self.graph);
        report
    }

    /// Continue a pending purge. `None` uses the configured budget.
    pub fn incremental_purge(&mut self, time_limit: Option<Duration>) -> bool {
        let limit = time_limit.or_else(|| self.config.gc.purge_time_limit());
        let complete = self.graph.incremental_purge_garbage(limit);
        self.linkers.process_detached(&mut self.graph);
        complete
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    pub fn on_redirector_followed<F>(&mut self, listener: F)
    where
        F: FnMut(&RedirectorFollowed) + Send + 'static,
    {
        self.linkers.on_redirector_followed(Box::new(listener));
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("objects", &self.graph.len())
            .field("linkers", &self.linkers.len())
            .field("config", &self.config)
            .finish()
    }
}
