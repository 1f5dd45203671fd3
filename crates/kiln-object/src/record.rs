use std::fmt;

use kiln_reflect::{ClassDef, PropertyValue};
use kiln_types::{Guid, LinkerId, Name, ObjectFlags, ObjectHandle, PackageFlags};

use crate::native::NativeObject;

/// One live object in the slot table.
pub struct ObjectRecord {
    pub name: Name,
    /// Owning object. Only packages have no outer.
    pub outer: Option<ObjectHandle>,
    pub class: ObjectHandle,
    pub flags: ObjectFlags,
    pub body: ObjectBody,
}

/// What an object holds, decided by its class.
pub enum ObjectBody {
    /// Property values plus optional native state.
    Instance(InstanceData),
    /// A class descriptor.
    Class(ClassDef),
    /// Package bookkeeping.
    Package(PackageState),
}

#[derive(Default)]
pub struct InstanceData {
    /// One value per slot of the class layout.
    pub values: Vec<PropertyValue>,
    pub native: Option<Box<dyn NativeObject>>,
}

/// State of a package object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageState {
    pub flags: PackageFlags,
    pub guid: Guid,
    /// Linker this package was loaded through, if it is still attached.
    pub linker: Option<LinkerId>,
    pub fully_loaded: bool,
}

/// Back-reference from a loaded object to the export it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkerLink {
    pub linker: LinkerId,
    pub export_index: usize,
}

impl ObjectRecord {
    pub fn is_class(&self) -> bool {
        matches!(self.body, ObjectBody::Class(_))
    }

    pub fn is_package(&self) -> bool {
        matches!(self.body, ObjectBody::Package(_))
    }

    pub fn class_def(&self) -> Option<&ClassDef> {
        match &self.body {
            ObjectBody::Class(def) => Some(def),
            _ => None,
        }
    }

    pub fn class_def_mut(&mut self) -> Option<&mut ClassDef> {
        match &mut self.body {
            ObjectBody::Class(def) => Some(def),
            _ => None,
        }
    }

    pub fn instance(&self) -> Option<&InstanceData> {
        match &self.body {
            ObjectBody::Instance(data) => Some(data),
            _ => None,
        }
    }

    pub fn instance_mut(&mut self) -> Option<&mut InstanceData> {
        match &mut self.body {
            ObjectBody::Instance(data) => Some(data),
            _ => None,
        }
    }

    pub fn package(&self) -> Option<&PackageState> {
        match &self.body {
            ObjectBody::Package(state) => Some(state),
            _ => None,
        }
    }

    pub fn package_mut(&mut self) -> Option<&mut PackageState> {
        match &mut self.body {
            ObjectBody::Package(state) => Some(state),
            _ => None,
        }
    }
}

impl fmt::Debug for ObjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            ObjectBody::Instance(data) => format!(
                "instance({} values{})",
                data.values.len(),
                if data.native.is_some() { ", native" } else { "" }
            ),
            ObjectBody::Class(def) => format!("class({} properties)", def.layout().len()),
            ObjectBody::Package(state) => format!("package({:?})", state.flags),
        };
        f.debug_struct("ObjectRecord")
            .field("name", &self.name)
            .field("outer", &self.outer)
            .field("class", &self.class)
            .field("flags", &self.flags)
            .field("body", &body)
            .finish()
    }
}
