use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kiln_store::Archive;
use kiln_types::{Name, ObjectHandle};

use crate::error::ObjectResult;
use crate::graph::ObjectGraph;

/// Native state attached to instances of a compiled-in class.
///
/// Every hook has a no-op default, so an implementation only overrides what
/// it needs.
///
/// # Invariants
///
/// - `serialize` must read exactly the bytes it wrote; the loader checks the
///   total against the export's recorded size.
/// - `add_referenced_objects` must report every strong reference the state
///   holds, or the referenced objects may be collected.
/// - After `begin_destroy`, `finish_destroy` is called exactly once, and only
///   after `is_ready_for_finish_destroy` returned `true`.
pub trait NativeObject: Any + Send {
    /// Serialize the native payload after the property stream.
    fn serialize(&mut self, _ar: &mut dyn Archive) -> ObjectResult<()> {
        Ok(())
    }

    fn add_referenced_objects(&self, _out: &mut Vec<ObjectHandle>) {}

    /// Called on every export before its package is written.
    fn pre_save(&mut self, _this: ObjectHandle, _graph: &mut ObjectGraph) {}

    /// Called once loading of the outermost load scope has completed.
    fn post_load(&mut self, _this: ObjectHandle, _graph: &mut ObjectGraph) {}

    /// Release resources that do not need to wait on anything.
    fn begin_destroy(&mut self) {}

    /// Polled by the incremental purge until it returns `true`.
    fn is_ready_for_finish_destroy(&self) -> bool {
        true
    }

    fn finish_destroy(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Constructor for the native state of a class.
pub type NativeFactory = Arc<dyn Fn() -> Box<dyn NativeObject> + Send + Sync>;

/// Native constructors keyed by class name.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    factories: HashMap<Name, NativeFactory>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the factory for `class_name`.
    pub fn register(&mut self, class_name: Name, factory: NativeFactory) {
        self.factories.insert(class_name, factory);
    }

    pub fn get(&self, class_name: Name) -> Option<&NativeFactory> {
        self.factories.get(&class_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("factories", &self.factories.len())
            .finish()
    }
}
