use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_object::{ClassBuilder, GcConfig, ObjectGraph};
use kiln_reflect::{PropertyKind, PropertyValue};
use kiln_store::{ByteStream, MemoryStream, StoreResult};
use kiln_types::{ObjectFlags, ObjectHandle, PackageFlags};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Graph with a native `Engine.Material` class.
pub(crate) fn engine_graph() -> (ObjectGraph, ObjectHandle) {
    init_tracing();
    let mut graph = ObjectGraph::new(&GcConfig::default());
    let engine = graph.native_package("Engine").unwrap();
    let material = graph
        .register_class(
            ClassBuilder::new("Material")
                .in_package(engine)
                .property("Roughness", PropertyKind::Float)
                .property("Label", PropertyKind::String)
                .property("Parent", PropertyKind::Object),
        )
        .unwrap();
    (graph, material)
}

/// Package `Level` holding `Rock` and `Base` materials, `Rock.Parent` pointing
/// at `Base`.
pub(crate) fn build_level(graph: &mut ObjectGraph, material: ObjectHandle) -> (ObjectHandle, ObjectHandle) {
    let name = graph.intern("Level");
    let level = graph
        .construct_package(None, name, PackageFlags::NEWLY_CREATED)
        .unwrap();
    let base_name = graph.intern("Base");
    let base = graph
        .construct_object(material, Some(level), Some(base_name), ObjectFlags::PUBLIC)
        .unwrap();
    let rock_name = graph.intern("Rock");
    let rock = graph
        .construct_object(
            material,
            Some(level),
            Some(rock_name),
            ObjectFlags::PUBLIC | ObjectFlags::STANDALONE,
        )
        .unwrap();
    set(graph, rock, "Roughness", PropertyValue::Float(0.5));
    set(graph, rock, "Label", PropertyValue::String("hello".into()));
    set(graph, rock, "Parent", PropertyValue::Object(Some(base)));
    set(graph, base, "Label", PropertyValue::String("base".into()));
    (level, rock)
}

pub(crate) fn set(graph: &mut ObjectGraph, object: ObjectHandle, property: &str, value: PropertyValue) {
    let name = graph.intern(property);
    graph.set_property(object, name, value).unwrap();
}

pub(crate) fn get(graph: &mut ObjectGraph, object: ObjectHandle, property: &str) -> PropertyValue {
    let name = graph.intern(property);
    graph.property(object, name).unwrap().clone()
}

pub(crate) fn find_path(graph: &mut ObjectGraph, path: &str) -> Option<ObjectHandle> {
    let mut outer = None;
    for part in path.split('.') {
        let name = graph.intern(part);
        outer = Some(graph.find_object(None, outer, name, false)?);
    }
    outer
}

/// Memory stream that counts read calls.
pub(crate) struct CountingStream {
    pub(crate) inner: MemoryStream,
    pub(crate) reads: Arc<AtomicUsize>,
}

impl ByteStream for CountingStream {
    fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> StoreResult<usize> {
        self.inner.write(buf)
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        self.inner.seek(pos)
    }

    fn tell(&mut self) -> StoreResult<u64> {
        self.inner.tell()
    }

    fn size(&mut self) -> StoreResult<u64> {
        self.inner.size()
    }

    fn version(&self) -> u32 {
        self.inner.version()
    }

    fn set_version(&mut self, version: u32) {
        self.inner.set_version(version);
    }
}
