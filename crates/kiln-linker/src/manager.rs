use std::fmt;

use kiln_object::ObjectGraph;
use kiln_types::{LinkerId, ObjectHandle};
use tracing::{debug, info};

use crate::error::{LinkerError, LinkerResult};
use crate::load::LinkerLoad;

/// An import was satisfied by following an `ObjectRedirector`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectorFollowed {
    /// Package whose import was redirected.
    pub package: String,
    pub redirector: ObjectHandle,
    pub destination: ObjectHandle,
}

pub type RedirectListener = Box<dyn FnMut(&RedirectorFollowed) + Send>;

/// Bookkeeping shared by nested load scopes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectSerializeContext {
    /// Depth of nested `begin_load` calls.
    pub load_count: u32,
    /// Objects created during the current outermost load scope.
    pub loaded_objects: Vec<ObjectHandle>,
    /// Imports verified during the current outermost load scope.
    pub import_count: u32,
}

impl ObjectSerializeContext {
    pub fn is_loading(&self) -> bool {
        self.load_count > 0
    }

    /// Enter a load scope. Returns `true` for the outermost one.
    pub fn enter(&mut self) -> bool {
        self.load_count += 1;
        self.load_count == 1
    }

    /// Leave a load scope. Returns `true` when the outermost one ends.
    pub fn leave(&mut self) -> bool {
        debug_assert!(self.load_count > 0, "unbalanced end of load");
        self.load_count = self.load_count.saturating_sub(1);
        self.load_count == 0
    }
}

/// Owner of every linker, addressed by [`LinkerId`].
///
/// Ids are slab indices that are never reused, so a detached linker's id
/// stops resolving instead of aliasing a newer linker.
#[derive(Default)]
pub struct LinkerManager {
    linkers: Vec<Option<LinkerLoad>>,
    context: ObjectSerializeContext,
    listeners: Vec<RedirectListener>,
}

impl LinkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted linker must carry.
    pub fn next_id(&self) -> LinkerId {
        LinkerId::new(self.linkers.len() as u32)
    }

    pub fn insert(&mut self, linker: LinkerLoad) -> LinkerId {
        let id = self.next_id();
        assert_eq!(linker.id(), id, "linker inserted with a foreign id");
        self.linkers.push(Some(linker));
        id
    }

    pub fn get(&self, id: LinkerId) -> Option<&LinkerLoad> {
        self.linkers.get(id.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: LinkerId) -> Option<&mut LinkerLoad> {
        self.linkers.get_mut(id.index() as usize)?.as_mut()
    }

    pub fn require(&self, id: LinkerId) -> LinkerResult<&LinkerLoad> {
        self.get(id).ok_or(LinkerError::UnknownLinker(id))
    }

    pub fn require_mut(&mut self, id: LinkerId) -> LinkerResult<&mut LinkerLoad> {
        self.get_mut(id).ok_or(LinkerError::UnknownLinker(id))
    }

    /// Number of attached linkers.
    pub fn len(&self) -> usize {
        self.linkers.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkerLoad> {
        self.linkers.iter().flatten()
    }

    pub fn find_by_package(&self, package: ObjectHandle) -> Option<LinkerId> {
        self.iter().find(|l| l.root() == package).map(LinkerLoad::id)
    }

    pub fn serialize_context(&self) -> &ObjectSerializeContext {
        &self.context
    }

    pub fn serialize_context_mut(&mut self) -> &mut ObjectSerializeContext {
        &mut self.context
    }

    // -----------------------------------------------------------------------
    // Redirect notifications
    // -----------------------------------------------------------------------

    pub fn on_redirector_followed(&mut self, listener: RedirectListener) {
        self.listeners.push(listener);
    }

    pub fn notify_redirector_followed(&mut self, event: &RedirectorFollowed) {
        for listener in &mut self.listeners {
            listener(event);
        }
    }

    // -----------------------------------------------------------------------
    // Detaching
    // -----------------------------------------------------------------------

    /// Detach a linker: release its stream, break every export
    /// back-reference and forget imports that resolved through it.
    ///
    /// # Panics
    ///
    /// Panics if an object bound to one of its exports points back at a
    /// different export index.
    pub fn detach(&mut self, graph: &mut ObjectGraph, id: LinkerId) {
        let Some(mut linker) = self.linkers.get_mut(id.index() as usize).and_then(Option::take) else {
            return;
        };
        linker.reset_loader();
        let package = linker.package_name().to_owned();
        for (index, export) in linker.exports.iter_mut().enumerate() {
            let Some(object) = export.object.take() else {
                continue;
            };
            if let Some(link) = graph.linker_link(object).filter(|l| l.linker == id) {
                assert_eq!(
                    link.export_index, index,
                    "export back-reference index mismatch on detach of {package}"
                );
                graph.clear_linker_link(object);
            }
        }
        if let Some(state) = graph.package_state_mut(linker.root()) {
            if state.linker == Some(id) {
                state.linker = None;
            }
        }
        for other in self.linkers.iter_mut().flatten() {
            for import in &mut other.imports {
                if import.source_linker == Some(id) {
                    import.source_linker = None;
                    import.source_index = None;
                }
            }
        }
        info!(package = %package, linker = ?id, "detached linker");
    }

    /// Detach the linker of `package`, or every linker when `None`.
    pub fn reset_loaders(&mut self, graph: &mut ObjectGraph, package: Option<ObjectHandle>) {
        let ids: Vec<LinkerId> = self
            .iter()
            .filter(|l| package.map_or(true, |p| l.root() == p))
            .map(LinkerLoad::id)
            .collect();
        for id in ids {
            self.detach(graph, id);
        }
    }

    /// Forget every resolved import, so the next access verifies it again.
    pub fn dissociate_imports(&mut self) {
        for linker in self.linkers.iter_mut().flatten() {
            for import in &mut linker.imports {
                import.object = None;
                import.source_linker = None;
                import.source_index = None;
            }
        }
    }

    /// Apply the back-reference cleanup queued by the garbage collector.
    ///
    /// # Panics
    ///
    /// Panics if a destroyed object's link names an export bound to a
    /// different object.
    pub fn process_detached(&mut self, graph: &mut ObjectGraph) {
        for (object, link) in graph.take_detached_exports() {
            let Some(export) = self
                .get_mut(link.linker)
                .and_then(|l| l.exports.get_mut(link.export_index))
            else {
                continue;
            };
            assert!(
                export.object.map_or(true, |o| o == object),
                "export back-reference index mismatch: export {} is bound to another object",
                link.export_index
            );
            export.object = None;
            debug!(object = %object, export = link.export_index, "cleared export back-reference");
        }
        for id in graph.take_pending_linker_detach() {
            self.detach(graph, id);
        }
    }
}

impl fmt::Debug for LinkerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkerManager")
            .field("linkers", &self.len())
            .field("context", &self.context)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
