//! The object slot table and everything that addresses objects by handle.
//!
//! [`ObjectGraph`] owns every object, the name table, the struct registry and
//! the native constructors. Slots are split into two ranges: a low fixed-size
//! range for intrinsic objects that the collector never considers, and a
//! dynamic range that grows on demand. Each range recycles freed slots in
//! FIFO order, and every free bumps the slot generation so stale handles
//! resolve to nothing.
//!
//! # Invariants
//!
//! - Objects in the disregard range are in the root set.
//! - `(outer, name)` identifies at most one hashed object.
//! - A class body is linked before any instance of it is constructed.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use kiln_reflect::{
    ClassDef, Property, PropertyKind, PropertyValue, ReferenceTokenStream, StructDef, TypeRegistry,
};
use kiln_types::{
    known, ClassFlags, Guid, LinkerId, Name, NameTable, ObjectFlags, ObjectHandle, PackageFlags,
    PropertyFlags,
};

use crate::config::GcConfig;
use crate::error::{ObjectError, ObjectResult};
use crate::gc::PurgeState;
use crate::native::{NativeFactory, NativeObject, NativeRegistry};
use crate::record::{InstanceData, LinkerLink, ObjectBody, ObjectRecord, PackageState};

#[derive(Default)]
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) record: Option<ObjectRecord>,
}

/// Declaration of one property for [`ClassBuilder`] and
/// [`ObjectGraph::register_struct`].
#[derive(Clone, Debug)]
pub struct PropertyDecl {
    pub name: String,
    pub kind: PropertyKind,
    pub array_dim: u32,
    pub flags: PropertyFlags,
}

impl PropertyDecl {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            array_dim: 1,
            flags: PropertyFlags::empty(),
        }
    }

    pub fn array_dim(mut self, array_dim: u32) -> Self {
        self.array_dim = array_dim.max(1);
        self
    }

    pub fn flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Description of a class to register with [`ObjectGraph::register_class`].
pub struct ClassBuilder {
    name: String,
    package: Option<ObjectHandle>,
    super_class: Option<ObjectHandle>,
    flags: ClassFlags,
    properties: Vec<PropertyDecl>,
    native: Option<NativeFactory>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: None,
            super_class: None,
            flags: ClassFlags::empty(),
            properties: Vec::new(),
            native: None,
        }
    }

    /// Package that owns the class. Defaults to the core package.
    pub fn in_package(mut self, package: ObjectHandle) -> Self {
        self.package = Some(package);
        self
    }

    /// Super class. Defaults to `Object`.
    pub fn extends(mut self, super_class: ObjectHandle) -> Self {
        self.super_class = Some(super_class);
        self
    }

    pub fn flags(mut self, flags: ClassFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn property(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.push(PropertyDecl::new(name, kind));
        self
    }

    pub fn declare(mut self, decl: PropertyDecl) -> Self {
        self.properties.push(decl);
        self
    }

    /// Attach native state to every instance of the class and its subclasses.
    pub fn native<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn NativeObject> + Send + Sync + 'static,
    {
        self.native = Some(Arc::new(factory));
        self
    }
}

/// An object's state lifted out of the graph for serialization.
///
/// The linker takes the state, runs an archive that may itself need the
/// graph, and hands the state back with [`ObjectGraph::restore_serial_state`].
pub struct SerialState {
    pub handle: ObjectHandle,
    pub name: Name,
    pub outer: Option<ObjectHandle>,
    pub class: ObjectHandle,
    pub class_flags: ClassFlags,
    pub layout: Arc<[Property]>,
    pub types: Arc<TypeRegistry>,
    pub body: SerialBody,
}

pub enum SerialBody {
    Instance {
        values: Vec<PropertyValue>,
        native: Option<Box<dyn NativeObject>>,
    },
    Class(ClassDef),
    Package,
}

/// The object graph: slot table, name table, type registries and collector
/// state.
pub struct ObjectGraph {
    pub(crate) slots: Vec<Slot>,
    pub(crate) first_gc_index: usize,
    next_non_gc_index: usize,
    free_non_gc: VecDeque<usize>,
    free_gc: VecDeque<usize>,
    open_for_disregard: bool,
    names: NameTable,
    types: Arc<TypeRegistry>,
    natives: NativeRegistry,
    hash: HashMap<(Option<ObjectHandle>, Name), Vec<ObjectHandle>>,
    classes: HashMap<Name, Vec<ObjectHandle>>,
    linker_links: HashMap<ObjectHandle, LinkerLink>,
    pub(crate) pending_linker_detach: Vec<LinkerId>,
    pub(crate) detached_exports: Vec<(ObjectHandle, LinkerLink)>,
    pub(crate) purge: PurgeState,
    unique_counters: HashMap<Name, u32>,
    core_package: ObjectHandle,
    object_class: ObjectHandle,
    class_class: ObjectHandle,
    package_class: ObjectHandle,
    redirector_class: ObjectHandle,
}

impl ObjectGraph {
    /// Create a graph holding the intrinsic objects: the `Core` package and
    /// the `Object`, `Class`, `Package` and `ObjectRedirector` classes.
    pub fn new(config: &GcConfig) -> Self {
        let first_gc_index = config.max_objects_not_considered_by_gc;
        let mut slots = Vec::with_capacity(first_gc_index + 64);
        slots.resize_with(first_gc_index, Slot::default);

        let mut graph = Self {
            slots,
            first_gc_index,
            next_non_gc_index: 0,
            free_non_gc: VecDeque::new(),
            free_gc: VecDeque::new(),
            open_for_disregard: false,
            names: NameTable::new(),
            types: Arc::new(TypeRegistry::new()),
            natives: NativeRegistry::new(),
            hash: HashMap::new(),
            classes: HashMap::new(),
            linker_links: HashMap::new(),
            pending_linker_detach: Vec::new(),
            detached_exports: Vec::new(),
            purge: PurgeState::default(),
            unique_counters: HashMap::new(),
            core_package: ObjectHandle::new(0, 0),
            object_class: ObjectHandle::new(0, 0),
            class_class: ObjectHandle::new(0, 0),
            package_class: ObjectHandle::new(0, 0),
            redirector_class: ObjectHandle::new(0, 0),
        };
        graph.bootstrap();
        graph
    }

    fn bootstrap(&mut self) {
        let intrinsic = ObjectFlags::NATIVE
            | ObjectFlags::PUBLIC
            | ObjectFlags::ROOT_SET
            | ObjectFlags::DISREGARD_FOR_GC;
        let unset = ObjectHandle::new(0, 0);
        let native_class = |super_class: Option<ObjectHandle>, properties: Vec<Property>| {
            ObjectBody::Class(ClassDef::new(super_class, ClassFlags::NATIVE, properties))
        };

        self.open_disregard_for_gc();
        let core = self.add_object(ObjectRecord {
            name: known::CORE,
            outer: None,
            class: unset,
            flags: intrinsic,
            body: ObjectBody::Package(PackageState {
                flags: PackageFlags::COMPILED_IN,
                fully_loaded: true,
                ..PackageState::default()
            }),
        });
        let intrinsic_class = |graph: &mut Self, name: Name, body: ObjectBody| {
            graph.add_object(ObjectRecord {
                name,
                outer: Some(core),
                class: unset,
                flags: intrinsic,
                body,
            })
        };
        let object_class = intrinsic_class(self, known::OBJECT, native_class(None, Vec::new()));
        let class_class = intrinsic_class(self, known::CLASS, native_class(Some(object_class), Vec::new()));
        let package_class = intrinsic_class(self, known::PACKAGE, native_class(Some(object_class), Vec::new()));
        let redirector_class = intrinsic_class(
            self,
            known::OBJECT_REDIRECTOR,
            native_class(
                Some(object_class),
                vec![Property::new(known::DESTINATION_OBJECT, PropertyKind::Object)],
            ),
        );
        self.close_disregard_for_gc();

        self.core_package = core;
        self.object_class = object_class;
        self.class_class = class_class;
        self.package_class = package_class;
        self.redirector_class = redirector_class;

        if let Some(record) = self.record_mut(core) {
            record.class = package_class;
        }
        for class in [object_class, class_class, package_class, redirector_class] {
            if let Some(record) = self.record_mut(class) {
                record.class = class_class;
            }
            self.link_class(class)
                .expect("intrinsic classes declare no struct properties");
        }
        for handle in [core, object_class, class_class, package_class, redirector_class] {
            self.hash_object(handle);
        }
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    pub fn names(&self) -> &NameTable {
        &self.names
    }

    pub fn names_mut(&mut self) -> &mut NameTable {
        &mut self.names
    }

    pub fn intern(&mut self, text: &str) -> Name {
        self.names.intern(text)
    }

    pub fn resolve(&self, name: Name) -> &str {
        self.names.resolve(name)
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    pub fn core_package(&self) -> ObjectHandle {
        self.core_package
    }

    pub fn object_class(&self) -> ObjectHandle {
        self.object_class
    }

    pub fn class_class(&self) -> ObjectHandle {
        self.class_class
    }

    pub fn package_class(&self) -> ObjectHandle {
        self.package_class
    }

    pub fn redirector_class(&self) -> ObjectHandle {
        self.redirector_class
    }

    /// Index of the first slot the collector considers.
    pub fn first_gc_index(&self) -> usize {
        self.first_gc_index
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of every live object, in slot order.
    pub fn objects(&self) -> Vec<ObjectHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.record.is_some())
            .map(|(i, s)| ObjectHandle::new(i as u32, s.generation))
            .collect()
    }

    pub fn is_valid(&self, handle: ObjectHandle) -> bool {
        self.record(handle).is_some()
    }

    pub fn record(&self, handle: ObjectHandle) -> Option<&ObjectRecord> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.record.as_ref()
    }

    pub fn record_mut(&mut self, handle: ObjectHandle) -> Option<&mut ObjectRecord> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.record.as_mut()
    }

    pub(crate) fn require(&self, handle: ObjectHandle) -> ObjectResult<&ObjectRecord> {
        self.record(handle).ok_or(ObjectError::StaleHandle(handle))
    }

    pub(crate) fn require_mut(&mut self, handle: ObjectHandle) -> ObjectResult<&mut ObjectRecord> {
        self.record_mut(handle).ok_or(ObjectError::StaleHandle(handle))
    }

    pub fn name_of(&self, handle: ObjectHandle) -> Option<Name> {
        self.record(handle).map(|r| r.name)
    }

    pub fn outer_of(&self, handle: ObjectHandle) -> Option<ObjectHandle> {
        self.record(handle).and_then(|r| r.outer)
    }

    pub fn class_of(&self, handle: ObjectHandle) -> Option<ObjectHandle> {
        self.record(handle).map(|r| r.class)
    }

    /// Flags of a live object; empty for stale handles.
    pub fn flags(&self, handle: ObjectHandle) -> ObjectFlags {
        self.record(handle).map(|r| r.flags).unwrap_or_default()
    }

    pub fn has_any_flags(&self, handle: ObjectHandle, flags: ObjectFlags) -> bool {
        self.flags(handle).intersects(flags)
    }

    pub fn set_flags(&mut self, handle: ObjectHandle, flags: ObjectFlags) {
        if let Some(record) = self.record_mut(handle) {
            record.flags |= flags;
        }
    }

    pub fn clear_flags(&mut self, handle: ObjectHandle, flags: ObjectFlags) {
        if let Some(record) = self.record_mut(handle) {
            record.flags &= !flags;
        }
    }

    pub fn class_def(&self, class: ObjectHandle) -> Option<&ClassDef> {
        self.record(class).and_then(ObjectRecord::class_def)
    }

    pub fn package_state(&self, package: ObjectHandle) -> Option<&PackageState> {
        self.record(package).and_then(ObjectRecord::package)
    }

    pub fn package_state_mut(&mut self, package: ObjectHandle) -> Option<&mut PackageState> {
        self.record_mut(package).and_then(ObjectRecord::package_mut)
    }

    /// Native state of `handle` downcast to `T`.
    pub fn native<T: NativeObject>(&self, handle: ObjectHandle) -> Option<&T> {
        let native = self.record(handle)?.instance()?.native.as_ref()?;
        native.as_any().downcast_ref::<T>()
    }

    pub fn native_mut<T: NativeObject>(&mut self, handle: ObjectHandle) -> Option<&mut T> {
        let native = self.record_mut(handle)?.instance_mut()?.native.as_mut()?;
        native.as_any_mut().downcast_mut::<T>()
    }

    // ---------------------------------------------------------------
    // Slot table
    // ---------------------------------------------------------------

    /// Allow new intrinsic objects into the disregard range.
    pub fn open_disregard_for_gc(&mut self) {
        self.open_for_disregard = true;
    }

    pub fn close_disregard_for_gc(&mut self) {
        self.open_for_disregard = false;
        debug!(
            last_non_gc_index = self.next_non_gc_index as i64 - 1,
            "closed disregard-for-GC window"
        );
    }

    pub fn is_open_for_disregard(&self) -> bool {
        self.open_for_disregard
    }

    /// Place a record in a free slot.
    ///
    /// Records requesting [`ObjectFlags::DISREGARD_FOR_GC`] land in the
    /// disregard range while the window is open and the range has room;
    /// otherwise the flag is dropped and the record goes to the dynamic range.
    pub fn add_object(&mut self, mut record: ObjectRecord) -> ObjectHandle {
        let disregard = record.flags.contains(ObjectFlags::DISREGARD_FOR_GC) && self.open_for_disregard;
        let index = match disregard.then(|| self.allocate_non_gc()).flatten() {
            Some(index) => {
                assert!(
                    record.flags.contains(ObjectFlags::ROOT_SET),
                    "objects disregarded for GC must be in the root set"
                );
                index
            }
            None => {
                record.flags.remove(ObjectFlags::DISREGARD_FOR_GC);
                self.allocate_gc()
            }
        };
        let slot = &mut self.slots[index];
        slot.record = Some(record);
        ObjectHandle::new(index as u32, slot.generation)
    }

    fn allocate_non_gc(&mut self) -> Option<usize> {
        if let Some(index) = self.free_non_gc.pop_front() {
            return Some(index);
        }
        if self.next_non_gc_index < self.first_gc_index {
            self.next_non_gc_index += 1;
            return Some(self.next_non_gc_index - 1);
        }
        None
    }

    fn allocate_gc(&mut self) -> usize {
        if let Some(index) = self.free_gc.pop_front() {
            return index;
        }
        self.slots.push(Slot::default());
        self.slots.len() - 1
    }

    /// Free the slot of `handle` and bump its generation.
    pub fn remove_object(&mut self, handle: ObjectHandle) -> Option<ObjectRecord> {
        if !self.is_valid(handle) {
            return None;
        }
        self.unhash_object(handle);
        self.linker_links.remove(&handle);
        let index = handle.index() as usize;
        let slot = &mut self.slots[index];
        let record = slot.record.take();
        slot.generation = slot.generation.wrapping_add(1);
        if index < self.first_gc_index {
            self.free_non_gc.push_back(index);
        } else {
            self.free_gc.push_back(index);
        }
        record
    }

    // ---------------------------------------------------------------
    // Hashing and lookup
    // ---------------------------------------------------------------

    pub(crate) fn hash_object(&mut self, handle: ObjectHandle) {
        let Some(record) = self.record(handle) else {
            return;
        };
        let key = (record.outer, record.name);
        let class_name = record.is_class().then_some(record.name);
        let bucket = self.hash.entry(key).or_default();
        if !bucket.contains(&handle) {
            bucket.push(handle);
        }
        if let Some(name) = class_name {
            let bucket = self.classes.entry(name).or_default();
            if !bucket.contains(&handle) {
                bucket.push(handle);
            }
        }
    }

    pub(crate) fn unhash_object(&mut self, handle: ObjectHandle) {
        let Some(record) = self.record(handle) else {
            return;
        };
        let key = (record.outer, record.name);
        let name = record.name;
        if let Some(bucket) = self.hash.get_mut(&key) {
            bucket.retain(|h| *h != handle);
            if bucket.is_empty() {
                self.hash.remove(&key);
            }
        }
        if let Some(bucket) = self.classes.get_mut(&name) {
            bucket.retain(|h| *h != handle);
            if bucket.is_empty() {
                self.classes.remove(&name);
            }
        }
    }

    /// Find an object by outer and name.
    ///
    /// With `class` set, the object must be an instance of it (exactly, when
    /// `exact_class` is true). Objects already being destroyed are not found.
    pub fn find_object(
        &self,
        class: Option<ObjectHandle>,
        outer: Option<ObjectHandle>,
        name: Name,
        exact_class: bool,
    ) -> Option<ObjectHandle> {
        self.hash.get(&(outer, name))?.iter().copied().find(|&h| {
            let Some(record) = self.record(h) else {
                return false;
            };
            if record.flags.contains(ObjectFlags::BEGIN_DESTROYED) {
                return false;
            }
            match class {
                None => true,
                Some(class) if exact_class => record.class == class,
                Some(class) => self.is_child_of(record.class, class),
            }
        })
    }

    /// Every live object named `name` inside `outer`, regardless of class.
    pub fn find_all(&self, outer: Option<ObjectHandle>, name: Name) -> Vec<ObjectHandle> {
        self.hash
            .get(&(outer, name))
            .map(|bucket| bucket.iter().copied().filter(|h| self.is_valid(*h)).collect())
            .unwrap_or_default()
    }

    /// First class named `name` in any package.
    pub fn find_class(&self, name: Name) -> Option<ObjectHandle> {
        self.classes
            .get(&name)?
            .iter()
            .copied()
            .find(|h| self.is_valid(*h))
    }

    pub fn find_class_in(&self, package: ObjectHandle, name: Name) -> Option<ObjectHandle> {
        self.find_object(Some(self.class_class), Some(package), name, true)
    }

    /// Whether `class` is `ancestor` or derives from it.
    pub fn is_child_of(&self, class: ObjectHandle, ancestor: ObjectHandle) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.class_def(c).and_then(|def| def.super_class);
        }
        false
    }

    /// Whether `object` is an instance of `class` or of a subclass.
    pub fn is_a(&self, object: ObjectHandle, class: ObjectHandle) -> bool {
        self.class_of(object)
            .is_some_and(|c| self.is_child_of(c, class))
    }

    /// Whether `container` appears in the outer chain of `object`.
    pub fn is_in(&self, object: ObjectHandle, container: ObjectHandle) -> bool {
        let mut current = self.outer_of(object);
        while let Some(outer) = current {
            if outer == container {
                return true;
            }
            current = self.outer_of(outer);
        }
        false
    }

    /// The top of the outer chain (normally a package).
    pub fn outermost(&self, object: ObjectHandle) -> ObjectHandle {
        let mut current = object;
        while let Some(outer) = self.outer_of(current) {
            current = outer;
        }
        current
    }

    /// Dotted path from the outermost package down to `object`.
    pub fn path_name(&self, object: ObjectHandle) -> String {
        let mut parts = Vec::new();
        let mut current = Some(object);
        while let Some(h) = current {
            match self.record(h) {
                Some(record) => {
                    parts.push(self.names.resolve(record.name));
                    current = record.outer;
                }
                None => {
                    parts.push("<stale>");
                    break;
                }
            }
        }
        parts.reverse();
        parts.join(".")
    }

    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    /// Allocate and initialize an object.
    ///
    /// The body follows the class: subclasses of `Class` get an empty class
    /// descriptor, subclasses of `Package` get package state, and everything
    /// else gets default property values plus native state from the nearest
    /// ancestor with a registered factory. A `None` name generates a unique
    /// one. An existing object at the same path is reinitialized in place when
    /// it has the same class, keeping its handle and root-set membership.
    pub fn construct_object(
        &mut self,
        class: ObjectHandle,
        outer: Option<ObjectHandle>,
        name: Option<Name>,
        flags: ObjectFlags,
    ) -> ObjectResult<ObjectHandle> {
        let body = self.new_body(class)?;
        if let Some(outer) = outer {
            self.require(outer)?;
        }
        let name = match name {
            Some(name) if !name.is_none() => name,
            _ => self.make_unique_name(class, outer),
        };

        if let Some(existing) = self.find_all(outer, name).into_iter().find(|h| {
            !self.has_any_flags(*h, ObjectFlags::BEGIN_DESTROYED)
        }) {
            let existing_class = self.require(existing)?.class;
            if existing_class != class {
                return Err(ObjectError::ClassMismatch {
                    path: self.path_name(existing),
                    existing: self.path_name(existing_class),
                    requested: self.path_name(class),
                });
            }
            self.linker_links.remove(&existing);
            let record = self.require_mut(existing)?;
            record.flags = flags | (record.flags & ObjectFlags::ROOT_SET);
            record.body = body;
            debug!(object = %existing, "reinitialized object in place");
            return Ok(existing);
        }

        let handle = self.add_object(ObjectRecord {
            name,
            outer,
            class,
            flags,
            body,
        });
        self.hash_object(handle);
        Ok(handle)
    }

    fn new_body(&self, class: ObjectHandle) -> ObjectResult<ObjectBody> {
        let def = self.class_def(class).ok_or(ObjectError::NotAClass(class))?;
        if !def.is_linked() {
            return Err(ObjectError::ClassNotLinked(self.path_name(class)));
        }
        if def.is_abstract() {
            return Err(ObjectError::AbstractClass(self.path_name(class)));
        }
        if self.is_child_of(class, self.class_class) {
            return Ok(ObjectBody::Class(ClassDef::default()));
        }
        if self.is_child_of(class, self.package_class) {
            return Ok(ObjectBody::Package(PackageState::default()));
        }
        Ok(ObjectBody::Instance(InstanceData {
            values: def.default_values(&self.types)?,
            native: self.native_factory_for(class).map(|factory| factory()),
        }))
    }

    fn native_factory_for(&self, class: ObjectHandle) -> Option<NativeFactory> {
        let mut current = Some(class);
        while let Some(c) = current {
            let record = self.record(c)?;
            if let Some(factory) = self.natives.get(record.name) {
                return Some(Arc::clone(factory));
            }
            current = record.class_def().and_then(|def| def.super_class);
        }
        None
    }

    fn make_unique_name(&mut self, class: ObjectHandle, outer: Option<ObjectHandle>) -> Name {
        let base = self
            .name_of(class)
            .map(|n| self.names.resolve(n).to_owned())
            .unwrap_or_else(|| "Object".to_owned());
        let class_name = self.name_of(class).unwrap_or(known::OBJECT);
        loop {
            let counter = self.unique_counters.entry(class_name).or_insert(0);
            let candidate = format!("{base}_{counter}");
            *counter += 1;
            let name = self.names.intern(&candidate);
            if self.find_all(outer, name).is_empty() {
                return name;
            }
        }
    }

    /// Create a package object.
    pub fn construct_package(
        &mut self,
        outer: Option<ObjectHandle>,
        name: Name,
        package_flags: PackageFlags,
    ) -> ObjectResult<ObjectHandle> {
        let handle = self.construct_object(self.package_class, outer, Some(name), ObjectFlags::PUBLIC)?;
        if let Some(state) = self.package_state_mut(handle) {
            state.flags = package_flags;
            state.guid = Guid::new();
        }
        Ok(handle)
    }

    /// Find the compiled-in package `name`, creating it on first use.
    pub fn native_package(&mut self, name: &str) -> ObjectResult<ObjectHandle> {
        let name = self.names.intern(name);
        if let Some(existing) = self.find_object(Some(self.package_class), None, name, true) {
            return Ok(existing);
        }
        let handle = self.construct_package(None, name, PackageFlags::COMPILED_IN)?;
        self.set_flags(handle, ObjectFlags::NATIVE | ObjectFlags::ROOT_SET);
        if let Some(state) = self.package_state_mut(handle) {
            state.fully_loaded = true;
        }
        Ok(handle)
    }

    // ---------------------------------------------------------------
    // Classes and structs
    // ---------------------------------------------------------------

    /// Register a class.
    ///
    /// Classes in compiled-in packages are native and permanently rooted;
    /// classes in ordinary packages are public, standalone and can be saved
    /// as exports.
    pub fn register_class(&mut self, builder: ClassBuilder) -> ObjectResult<ObjectHandle> {
        let package = builder.package.unwrap_or(self.core_package);
        let compiled_in = self
            .package_state(package)
            .ok_or(ObjectError::NotAPackage(package))?
            .flags
            .contains(PackageFlags::COMPILED_IN);
        let super_class = builder.super_class.unwrap_or(self.object_class);
        if self.class_def(super_class).is_none() {
            return Err(ObjectError::NotAClass(super_class));
        }
        let name = self.names.intern(&builder.name);
        if self.find_class_in(package, name).is_some() {
            return Err(ObjectError::DuplicateClass(builder.name));
        }

        let properties = self.declarations(&builder.properties)?;
        let class_flags = if compiled_in {
            builder.flags | ClassFlags::NATIVE
        } else {
            builder.flags
        };
        let flags = if compiled_in {
            ObjectFlags::NATIVE | ObjectFlags::PUBLIC | ObjectFlags::ROOT_SET | ObjectFlags::DISREGARD_FOR_GC
        } else {
            ObjectFlags::PUBLIC | ObjectFlags::STANDALONE
        };
        let handle = self.add_object(ObjectRecord {
            name,
            outer: Some(package),
            class: self.class_class,
            flags,
            body: ObjectBody::Class(ClassDef::new(Some(super_class), class_flags, properties)),
        });
        if let Err(e) = self.link_class(handle) {
            self.remove_object(handle);
            return Err(e);
        }
        self.hash_object(handle);
        if let Some(factory) = builder.native {
            self.natives.register(name, factory);
        }
        debug!(class = %builder.name, object = %handle, native = compiled_in, "registered class");
        Ok(handle)
    }

    /// Attach native state to instances of an already registered class.
    pub fn register_native(&mut self, class_name: &str, factory: NativeFactory) {
        let name = self.names.intern(class_name);
        self.natives.register(name, factory);
    }

    /// Register a struct type usable by struct properties.
    pub fn register_struct(&mut self, name: &str, properties: Vec<PropertyDecl>) -> ObjectResult<Name> {
        let name = self.names.intern(name);
        let properties = self.declarations(&properties)?;
        let def = StructDef::new(name, properties, &self.types)?;
        Arc::make_mut(&mut self.types).register(def)?;
        Ok(name)
    }

    fn declarations(&mut self, decls: &[PropertyDecl]) -> ObjectResult<Vec<Property>> {
        let mut properties: Vec<Property> = Vec::with_capacity(decls.len());
        for decl in decls {
            let name = self.names.intern(&decl.name);
            if properties.iter().any(|p| p.name == name) {
                return Err(ObjectError::InvalidDeclaration(format!(
                    "property {} declared twice",
                    decl.name
                )));
            }
            properties.push(
                Property::new(name, decl.kind.clone())
                    .with_array_dim(decl.array_dim)
                    .with_flags(decl.flags),
            );
        }
        Ok(properties)
    }

    /// Compute the layout of `class`, linking its super classes first.
    pub fn link_class(&mut self, class: ObjectHandle) -> ObjectResult<()> {
        let super_class = self
            .class_def(class)
            .ok_or(ObjectError::NotAClass(class))?
            .super_class;
        let super_def = match super_class {
            Some(s) if s != class => {
                let linked = self.class_def(s).ok_or(ObjectError::NotAClass(s))?.is_linked();
                if !linked {
                    self.link_class(s)?;
                }
                self.class_def(s).cloned()
            }
            _ => None,
        };
        let types = Arc::clone(&self.types);
        let def = self
            .require_mut(class)?
            .class_def_mut()
            .ok_or(ObjectError::NotAClass(class))?;
        def.link(super_def.as_ref(), &types)?;
        Ok(())
    }

    /// Reference token stream of `class`, assembled on first use.
    pub fn token_stream(&mut self, class: ObjectHandle) -> Option<Arc<ReferenceTokenStream>> {
        let types = Arc::clone(&self.types);
        let def = self.record_mut(class)?.class_def_mut()?;
        Some(def.assemble_token_stream(&types))
    }

    // ---------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------

    fn layout_property(&self, object: ObjectHandle, name: Name) -> ObjectResult<(ObjectHandle, Property)> {
        let class = self.require(object)?.class;
        let def = self.class_def(class).ok_or(ObjectError::NotAClass(class))?;
        let property = def.find_property(name).cloned().ok_or_else(|| {
            ObjectError::unknown_property(&self.path_name(class), name, &self.names)
        })?;
        Ok((class, property))
    }

    /// Value of element 0 of property `name`.
    pub fn property(&self, object: ObjectHandle, name: Name) -> ObjectResult<&PropertyValue> {
        self.property_at(object, name, 0)
    }

    pub fn property_at(&self, object: ObjectHandle, name: Name, index: usize) -> ObjectResult<&PropertyValue> {
        let (_, property) = self.layout_property(object, name)?;
        let data = self
            .require(object)?
            .instance()
            .ok_or(ObjectError::NotAnInstance(object))?;
        let dim = property.slot_count();
        property
            .value(&data.values, index)
            .ok_or(ObjectError::Reflect(kiln_reflect::ReflectError::OutOfRange {
                property: name,
                index,
                dim,
            }))
    }

    /// Store element 0 of property `name`, checking the value's kind.
    pub fn set_property(&mut self, object: ObjectHandle, name: Name, value: PropertyValue) -> ObjectResult<()> {
        self.set_property_at(object, name, 0, value)
    }

    pub fn set_property_at(
        &mut self,
        object: ObjectHandle,
        name: Name,
        index: usize,
        value: PropertyValue,
    ) -> ObjectResult<()> {
        let (_, property) = self.layout_property(object, name)?;
        let data = self
            .require_mut(object)?
            .instance_mut()
            .ok_or(ObjectError::NotAnInstance(object))?;
        property.set_value(&mut data.values, index, value)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Root set
    // ---------------------------------------------------------------

    pub fn add_to_root(&mut self, object: ObjectHandle) {
        assert!(
            !self.has_any_flags(object, ObjectFlags::PENDING_KILL),
            "pending-kill object {object} cannot join the root set"
        );
        self.set_flags(object, ObjectFlags::ROOT_SET);
    }

    pub fn remove_from_root(&mut self, object: ObjectHandle) {
        self.clear_flags(object, ObjectFlags::ROOT_SET);
    }

    /// Mark an object for destruction at the next collection, regardless of
    /// references to it.
    pub fn mark_pending_kill(&mut self, object: ObjectHandle) {
        assert!(
            !self.has_any_flags(object, ObjectFlags::ROOT_SET),
            "root-set object {object} marked pending kill"
        );
        self.set_flags(object, ObjectFlags::PENDING_KILL);
    }

    // ---------------------------------------------------------------
    // Linker back-references
    // ---------------------------------------------------------------

    pub fn set_linker_link(&mut self, object: ObjectHandle, link: LinkerLink) {
        self.linker_links.insert(object, link);
    }

    pub fn linker_link(&self, object: ObjectHandle) -> Option<LinkerLink> {
        self.linker_links.get(&object).copied()
    }

    pub fn clear_linker_link(&mut self, object: ObjectHandle) -> Option<LinkerLink> {
        self.linker_links.remove(&object)
    }

    /// Drop every back-reference into `linker`.
    pub fn clear_links_to(&mut self, linker: LinkerId) {
        self.linker_links.retain(|_, link| link.linker != linker);
    }

    /// Linkers whose package was destroyed since the last call.
    pub fn take_pending_linker_detach(&mut self) -> Vec<LinkerId> {
        std::mem::take(&mut self.pending_linker_detach)
    }

    /// Back-references removed from destroyed objects since the last call.
    pub fn take_detached_exports(&mut self) -> Vec<(ObjectHandle, LinkerLink)> {
        std::mem::take(&mut self.detached_exports)
    }

    // ---------------------------------------------------------------
    // References and hooks
    // ---------------------------------------------------------------

    /// Append every object `object` strongly references: its class, outer,
    /// property references, native references and, for classes, the super
    /// class.
    pub fn referenced_objects(&self, object: ObjectHandle, out: &mut Vec<ObjectHandle>) {
        let Some(record) = self.record(object) else {
            return;
        };
        out.push(record.class);
        if let Some(outer) = record.outer {
            out.push(outer);
        }
        match &record.body {
            ObjectBody::Instance(data) => {
                if let Some(def) = self.class_def(record.class) {
                    let mut visit = |h: ObjectHandle| out.push(h);
                    match def.token_stream() {
                        Some(stream) => stream.visit(&data.values, &mut visit),
                        None => ReferenceTokenStream::assemble(def.layout(), &self.types)
                            .visit(&data.values, &mut visit),
                    }
                }
                if let Some(native) = &data.native {
                    native.add_referenced_objects(out);
                }
            }
            ObjectBody::Class(def) => {
                if let Some(super_class) = def.super_class {
                    out.push(super_class);
                }
            }
            ObjectBody::Package(_) => {}
        }
    }

    /// Run the native pre-save hook of `object`.
    pub fn pre_save(&mut self, object: ObjectHandle) {
        if let Some(mut native) = self.take_native(object) {
            native.pre_save(object, self);
            self.put_native(object, native);
        }
    }

    /// Run the native post-load hook of `object`.
    pub fn post_load(&mut self, object: ObjectHandle) {
        if let Some(mut native) = self.take_native(object) {
            native.post_load(object, self);
            self.put_native(object, native);
        }
    }

    fn take_native(&mut self, object: ObjectHandle) -> Option<Box<dyn NativeObject>> {
        self.record_mut(object)?.instance_mut()?.native.take()
    }

    fn put_native(&mut self, object: ObjectHandle, native: Box<dyn NativeObject>) {
        match self.record_mut(object).and_then(ObjectRecord::instance_mut) {
            Some(data) => data.native = Some(native),
            None => warn!(object = %object, "object vanished while its native hook ran"),
        }
    }

    // ---------------------------------------------------------------
    // Serialization support
    // ---------------------------------------------------------------

    /// Lift the serializable state of `object` out of the graph.
    pub fn take_serial_state(&mut self, object: ObjectHandle) -> ObjectResult<SerialState> {
        let class = self.require(object)?.class;
        let (layout, class_flags) = match self.class_def(class) {
            Some(def) => (Arc::clone(def.layout()), def.flags),
            None => return Err(ObjectError::NotAClass(class)),
        };
        let types = Arc::clone(&self.types);
        let record = self.require_mut(object)?;
        let body = match &mut record.body {
            ObjectBody::Instance(data) => SerialBody::Instance {
                values: std::mem::take(&mut data.values),
                native: data.native.take(),
            },
            ObjectBody::Class(def) => SerialBody::Class(std::mem::take(def)),
            ObjectBody::Package(_) => SerialBody::Package,
        };
        Ok(SerialState {
            handle: object,
            name: record.name,
            outer: record.outer,
            class,
            class_flags,
            layout,
            types,
            body,
        })
    }

    /// Hand back state taken with [`take_serial_state`](Self::take_serial_state).
    pub fn restore_serial_state(&mut self, state: SerialState) -> ObjectResult<()> {
        let record = self.require_mut(state.handle)?;
        match (&mut record.body, state.body) {
            (ObjectBody::Instance(data), SerialBody::Instance { values, native }) => {
                data.values = values;
                data.native = native;
            }
            (ObjectBody::Class(def), SerialBody::Class(loaded)) => *def = loaded,
            (ObjectBody::Package(_), SerialBody::Package) => {}
            _ => return Err(ObjectError::NotAnInstance(state.handle)),
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectGraph")
            .field("objects", &self.len())
            .field("slots", &self.slots.len())
            .field("first_gc_index", &self.first_gc_index)
            .field("names", &self.names.len())
            .field("structs", &self.types.len())
            .field("natives", &self.natives.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    fn graph() -> ObjectGraph {
        ObjectGraph::new(&GcConfig {
            max_objects_not_considered_by_gc: 16,
            purge_time_limit_ms: None,
        })
    }

    #[derive(Default)]
    struct Counter {
        post_loads: u32,
    }

    impl NativeObject for Counter {
        fn post_load(&mut self, _this: ObjectHandle, _graph: &mut ObjectGraph) {
            self.post_loads += 1;
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn intrinsics_are_rooted_and_disregarded() {
        let g = graph();
        for h in [g.core_package(), g.object_class(), g.class_class(), g.package_class(), g.redirector_class()] {
            assert!(g.has_any_flags(h, ObjectFlags::ROOT_SET));
            assert!(g.has_any_flags(h, ObjectFlags::DISREGARD_FOR_GC));
            assert!((h.index() as usize) < g.first_gc_index());
        }
        assert_eq!(g.class_of(g.class_class()), Some(g.class_class()));
        assert_eq!(g.class_of(g.core_package()), Some(g.package_class()));
        assert_eq!(g.find_class(known::OBJECT_REDIRECTOR), Some(g.redirector_class()));
        assert_eq!(g.path_name(g.object_class()), "Core.Object");
        let redirector = g.class_def(g.redirector_class()).unwrap();
        assert!(redirector.find_property(known::DESTINATION_OBJECT).is_some());
    }

    #[test]
    fn construct_and_find() {
        let mut g = graph();
        let actor = g
            .register_class(ClassBuilder::new("Actor").property("Health", PropertyKind::Int))
            .unwrap();
        let pkg_name = g.intern("Level");
        let pkg = g.construct_package(None, pkg_name, PackageFlags::empty()).unwrap();
        let hero = g.intern("Hero");
        let obj = g.construct_object(actor, Some(pkg), Some(hero), ObjectFlags::PUBLIC).unwrap();

        assert!(obj.index() as usize >= g.first_gc_index());
        assert_eq!(g.find_object(Some(actor), Some(pkg), hero, true), Some(obj));
        assert_eq!(g.find_object(Some(g.object_class()), Some(pkg), hero, false), Some(obj));
        assert_eq!(g.find_object(Some(g.object_class()), Some(pkg), hero, true), None);
        assert!(g.is_a(obj, g.object_class()));
        assert!(g.is_in(obj, pkg));
        assert_eq!(g.outermost(obj), pkg);
        assert_eq!(g.path_name(obj), "Level.Hero");
        assert_eq!(g.property(obj, g.names().find("Health").unwrap()).unwrap(), &PropertyValue::Int(0));
    }

    #[test]
    fn unique_names_are_generated() {
        let mut g = graph();
        let actor = g.register_class(ClassBuilder::new("Actor")).unwrap();
        let pkg_name = g.intern("Level");
        let pkg = g.construct_package(None, pkg_name, PackageFlags::empty()).unwrap();
        let a = g.construct_object(actor, Some(pkg), None, ObjectFlags::empty()).unwrap();
        let b = g.construct_object(actor, Some(pkg), None, ObjectFlags::empty()).unwrap();
        assert_ne!(a, b);
        assert_eq!(g.resolve(g.name_of(a).unwrap()), "Actor_0");
        assert_eq!(g.resolve(g.name_of(b).unwrap()), "Actor_1");
    }

    #[test]
    fn same_path_replacement_rules() {
        let mut g = graph();
        let actor = g
            .register_class(ClassBuilder::new("Actor").property("Health", PropertyKind::Int))
            .unwrap();
        let light = g.register_class(ClassBuilder::new("Light")).unwrap();
        let pkg_name = g.intern("Level");
        let pkg = g.construct_package(None, pkg_name, PackageFlags::empty()).unwrap();
        let name = g.intern("Thing");
        let health = g.intern("Health");

        let first = g.construct_object(actor, Some(pkg), Some(name), ObjectFlags::empty()).unwrap();
        g.set_property(first, health, PropertyValue::Int(10)).unwrap();
        g.add_to_root(first);
        let again = g.construct_object(actor, Some(pkg), Some(name), ObjectFlags::PUBLIC).unwrap();
        assert_eq!(first, again);
        assert_eq!(g.property(again, health).unwrap(), &PropertyValue::Int(0));
        assert!(g.has_any_flags(again, ObjectFlags::ROOT_SET | ObjectFlags::PUBLIC));

        let err = g.construct_object(light, Some(pkg), Some(name), ObjectFlags::empty()).unwrap_err();
        assert!(matches!(err, ObjectError::ClassMismatch { .. }));
    }

    #[test]
    fn abstract_and_non_class_rejected() {
        let mut g = graph();
        let base = g
            .register_class(ClassBuilder::new("Shape").flags(ClassFlags::ABSTRACT))
            .unwrap();
        let core = g.core_package();
        assert!(matches!(
            g.construct_object(base, Some(core), None, ObjectFlags::empty()),
            Err(ObjectError::AbstractClass(_))
        ));
        assert!(matches!(
            g.construct_object(core, Some(core), None, ObjectFlags::empty()),
            Err(ObjectError::NotAClass(_))
        ));
    }

    #[test]
    fn subclass_layout_and_native_inheritance() {
        let mut g = graph();
        let base = g
            .register_class(
                ClassBuilder::new("Pawn")
                    .property("Health", PropertyKind::Int)
                    .native(|| Box::new(Counter::default())),
            )
            .unwrap();
        let derived = g
            .register_class(ClassBuilder::new("Hero").extends(base).property("Level", PropertyKind::Byte))
            .unwrap();
        let def = g.class_def(derived).unwrap();
        assert_eq!(def.slot_count(), 2);
        assert_eq!(def.instance_size(), 5);
        assert!(g.is_child_of(derived, base));

        let core = g.core_package();
        let obj = g.construct_object(derived, Some(core), None, ObjectFlags::empty()).unwrap();
        g.post_load(obj);
        assert_eq!(g.native::<Counter>(obj).unwrap().post_loads, 1);
    }

    #[test]
    fn duplicate_class_and_property_rejected() {
        let mut g = graph();
        g.register_class(ClassBuilder::new("Actor")).unwrap();
        assert!(matches!(
            g.register_class(ClassBuilder::new("Actor")),
            Err(ObjectError::DuplicateClass(_))
        ));
        assert!(matches!(
            g.register_class(
                ClassBuilder::new("Twice")
                    .property("A", PropertyKind::Int)
                    .property("A", PropertyKind::Float)
            ),
            Err(ObjectError::InvalidDeclaration(_))
        ));
    }

    #[test]
    fn struct_properties() {
        let mut g = graph();
        let pair = g
            .register_struct(
                "Pair",
                vec![
                    PropertyDecl::new("Weight", PropertyKind::Float),
                    PropertyDecl::new("Target", PropertyKind::Object),
                ],
            )
            .unwrap();
        let class = g
            .register_class(ClassBuilder::new("Holder").property("Link", PropertyKind::Struct(pair)))
            .unwrap();
        assert_eq!(g.class_def(class).unwrap().instance_size(), 12);
        let core = g.core_package();
        let obj = g.construct_object(class, Some(core), None, ObjectFlags::empty()).unwrap();
        let link = g.intern("Link");
        g.set_property(
            obj,
            link,
            PropertyValue::Struct(vec![PropertyValue::Float(1.0), PropertyValue::Object(Some(core))]),
        )
        .unwrap();
        let mut refs = Vec::new();
        g.referenced_objects(obj, &mut refs);
        assert_eq!(refs, vec![class, core, core]);
    }

    #[test]
    fn property_errors() {
        let mut g = graph();
        let class = g
            .register_class(ClassBuilder::new("Actor").property("Health", PropertyKind::Int))
            .unwrap();
        let core = g.core_package();
        let obj = g.construct_object(class, Some(core), None, ObjectFlags::empty()).unwrap();
        let health = g.intern("Health");
        let missing = g.intern("Missing");
        assert!(matches!(
            g.set_property(obj, health, PropertyValue::String("x".into())),
            Err(ObjectError::Reflect(_))
        ));
        assert!(matches!(
            g.property(obj, missing),
            Err(ObjectError::UnknownProperty { .. })
        ));
        assert!(matches!(g.property(class, health), Err(_)));
    }

    #[test]
    fn removed_handles_go_stale_and_slots_are_reused() {
        let mut g = graph();
        let class = g.register_class(ClassBuilder::new("Actor")).unwrap();
        let core = g.core_package();
        let obj = g.construct_object(class, Some(core), None, ObjectFlags::empty()).unwrap();
        let name = g.name_of(obj).unwrap();
        assert!(g.remove_object(obj).is_some());
        assert!(!g.is_valid(obj));
        assert!(g.remove_object(obj).is_none());
        assert_eq!(g.find_object(None, Some(core), name, false), None);

        let again = g.construct_object(class, Some(core), None, ObjectFlags::empty()).unwrap();
        assert_eq!(again.index(), obj.index());
        assert_eq!(again.generation(), obj.generation() + 1);
    }

    #[test]
    fn disregard_range_requires_open_window() {
        let mut g = graph();
        let class = g.register_class(ClassBuilder::new("Actor")).unwrap();
        let record = |flags: ObjectFlags| ObjectRecord {
            name: known::NONE,
            outer: None,
            class,
            flags,
            body: ObjectBody::Instance(InstanceData::default()),
        };
        let closed = g.add_object(record(ObjectFlags::DISREGARD_FOR_GC | ObjectFlags::ROOT_SET));
        assert!(closed.index() as usize >= g.first_gc_index());
        assert!(!g.has_any_flags(closed, ObjectFlags::DISREGARD_FOR_GC));

        g.open_disregard_for_gc();
        let open = g.add_object(record(ObjectFlags::DISREGARD_FOR_GC | ObjectFlags::ROOT_SET));
        g.close_disregard_for_gc();
        assert!((open.index() as usize) < g.first_gc_index());
    }

    #[test]
    #[should_panic(expected = "root set")]
    fn disregarded_objects_must_be_rooted() {
        let mut g = graph();
        let class = g.object_class();
        g.open_disregard_for_gc();
        g.add_object(ObjectRecord {
            name: known::NONE,
            outer: None,
            class,
            flags: ObjectFlags::DISREGARD_FOR_GC,
            body: ObjectBody::Instance(InstanceData::default()),
        });
    }

    #[test]
    #[should_panic(expected = "pending kill")]
    fn rooted_objects_cannot_be_killed() {
        let mut g = graph();
        let core = g.core_package();
        g.mark_pending_kill(core);
    }

    #[test]
    fn serial_state_roundtrip() {
        let mut g = graph();
        let class = g
            .register_class(ClassBuilder::new("Actor").property("Health", PropertyKind::Int))
            .unwrap();
        let core = g.core_package();
        let obj = g.construct_object(class, Some(core), None, ObjectFlags::empty()).unwrap();
        let mut state = g.take_serial_state(obj).unwrap();
        assert_eq!(state.layout.len(), 1);
        if let SerialBody::Instance { values, .. } = &mut state.body {
            values[0] = PropertyValue::Int(5);
        }
        g.restore_serial_state(state).unwrap();
        let health = g.intern("Health");
        assert_eq!(g.property(obj, health).unwrap(), &PropertyValue::Int(5));
    }
}
