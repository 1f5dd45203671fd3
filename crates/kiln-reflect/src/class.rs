use std::sync::Arc;

use kiln_types::{ClassFlags, Name, ObjectHandle};

use crate::error::ReflectResult;
use crate::property::{default_values, layout_properties, LayoutInfo, Property};
use crate::structs::TypeRegistry;
use crate::tokens::ReferenceTokenStream;
use crate::value::PropertyValue;

/// Class descriptor: the body of a class object.
///
/// A class declares its own properties; [`link`](ClassDef::link) appends them
/// after the super class's layout, so an instance's value storage starts with
/// every inherited slot.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub super_class: Option<ObjectHandle>,
    pub flags: ClassFlags,
    properties: Vec<Property>,
    layout: Arc<[Property]>,
    info: LayoutInfo,
    linked: bool,
    tokens: Option<Arc<ReferenceTokenStream>>,
}

impl ClassDef {
    pub fn new(super_class: Option<ObjectHandle>, flags: ClassFlags, properties: Vec<Property>) -> Self {
        Self {
            super_class,
            flags,
            properties,
            layout: Arc::from(Vec::new()),
            info: LayoutInfo::default(),
            linked: false,
            tokens: None,
        }
    }

    /// Own (non-inherited) property declarations.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Replace the own declarations; the class must be linked again.
    pub fn set_properties(&mut self, properties: Vec<Property>) {
        self.properties = properties;
        self.linked = false;
        self.tokens = None;
    }

    /// Build the flattened layout on top of `super_def`.
    pub fn link(&mut self, super_def: Option<&ClassDef>, types: &TypeRegistry) -> ReflectResult<()> {
        let (mut layout, base) = match super_def {
            Some(s) => (s.layout.to_vec(), s.info),
            None => (Vec::new(), LayoutInfo::default()),
        };
        let mut own = self.properties.clone();
        self.info = layout_properties(base, &mut own, types)?;
        self.properties = own.clone();
        layout.extend(own);
        self.layout = Arc::from(layout);
        self.linked = true;
        self.tokens = None;
        Ok(())
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Inherited and own properties, in slot order.
    pub fn layout(&self) -> &Arc<[Property]> {
        &self.layout
    }

    /// Bytes per instance: the super class size plus every own property.
    pub fn instance_size(&self) -> usize {
        self.info.size
    }

    pub fn min_alignment(&self) -> usize {
        self.info.alignment
    }

    /// Value slots per instance.
    pub fn slot_count(&self) -> usize {
        self.info.slot_count
    }

    pub fn find_property(&self, name: Name) -> Option<&Property> {
        self.layout.iter().find(|p| p.name == name)
    }

    pub fn default_values(&self, types: &TypeRegistry) -> ReflectResult<Vec<PropertyValue>> {
        default_values(&self.layout, types)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ClassFlags::ABSTRACT)
    }

    pub fn is_deprecated(&self) -> bool {
        self.flags.contains(ClassFlags::DEPRECATED)
    }

    pub fn token_stream(&self) -> Option<&Arc<ReferenceTokenStream>> {
        self.tokens.as_ref()
    }

    /// Assemble the reference token stream once; later calls return the
    /// cached stream.
    pub fn assemble_token_stream(&mut self, types: &TypeRegistry) -> Arc<ReferenceTokenStream> {
        let layout = Arc::clone(&self.layout);
        Arc::clone(
            self.tokens
                .get_or_insert_with(|| Arc::new(ReferenceTokenStream::assemble(&layout, types))),
        )
    }
}

impl Default for ClassDef {
    fn default() -> Self {
        Self::new(None, ClassFlags::empty(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::PropertyKind;
    use kiln_types::NameTable;

    fn base_and_child(names: &mut NameTable) -> (ClassDef, ClassDef) {
        let types = TypeRegistry::new();
        let mut base = ClassDef::new(
            None,
            ClassFlags::empty(),
            vec![
                Property::new(names.intern("Id"), PropertyKind::Int),
                Property::new(names.intern("Owner"), PropertyKind::Object),
            ],
        );
        base.link(None, &types).unwrap();
        let mut child = ClassDef::new(
            Some(ObjectHandle::new(1, 0)),
            ClassFlags::empty(),
            vec![
                Property::new(names.intern("Speed"), PropertyKind::Float),
                Property::new(names.intern("Tag"), PropertyKind::String),
            ],
        );
        child.link(Some(&base), &types).unwrap();
        (base, child)
    }

    #[test]
    fn instance_size_is_super_plus_own() {
        let mut names = NameTable::new();
        let (base, child) = base_and_child(&mut names);
        assert_eq!(base.instance_size(), 4 + 8);
        assert_eq!(child.instance_size(), base.instance_size() + 4 + 24);
        assert_eq!(child.slot_count(), 4);
        assert_eq!(child.min_alignment(), 8);
    }

    #[test]
    fn layout_inherits_super_properties_first() {
        let mut names = NameTable::new();
        let (_, child) = base_and_child(&mut names);
        let layout_names: Vec<&str> = child.layout().iter().map(|p| names.resolve(p.name)).collect();
        assert_eq!(layout_names, vec!["Id", "Owner", "Speed", "Tag"]);
        let offsets: Vec<usize> = child.layout().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3]);
        assert_eq!(child.properties().len(), 2);
        assert!(child.find_property(names.find("Owner").unwrap()).is_some());
    }

    #[test]
    fn token_stream_assembled_once() {
        let mut names = NameTable::new();
        let (_, mut child) = base_and_child(&mut names);
        let types = TypeRegistry::new();
        assert!(child.token_stream().is_none());
        let first = child.assemble_token_stream(&types);
        let second = child.assemble_token_stream(&types);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn relinking_drops_tokens() {
        let mut names = NameTable::new();
        let (base, mut child) = base_and_child(&mut names);
        let types = TypeRegistry::new();
        child.assemble_token_stream(&types);
        child.set_properties(vec![Property::new(names.intern("Extra"), PropertyKind::Object)]);
        assert!(!child.is_linked());
        assert!(child.token_stream().is_none());
        child.link(Some(&base), &types).unwrap();
        assert_eq!(child.assemble_token_stream(&types).len(), 2);
    }

    #[test]
    fn defaults_cover_every_slot() {
        let mut names = NameTable::new();
        let (_, child) = base_and_child(&mut names);
        let values = child.default_values(&TypeRegistry::new()).unwrap();
        assert_eq!(values.len(), child.slot_count());
        assert_eq!(values[2], PropertyValue::Float(0.0));
    }
}
