use std::collections::HashMap;
use std::sync::Arc;

use kiln_types::Name;

use crate::error::{ReflectError, ReflectResult};
use crate::property::{default_values, layout_properties, LayoutInfo, Property};
use crate::value::PropertyValue;

/// Laid-out struct type.
#[derive(Clone, Debug, PartialEq)]
pub struct StructDef {
    name: Name,
    properties: Vec<Property>,
    layout: LayoutInfo,
}

impl StructDef {
    /// Lay out `properties` against the structs already in `types`.
    ///
    /// A struct may hold arrays of itself but never itself by value.
    pub fn new(name: Name, mut properties: Vec<Property>, types: &TypeRegistry) -> ReflectResult<Self> {
        if properties
            .iter()
            .any(|p| p.kind.by_value_struct() == Some(name))
        {
            return Err(ReflectError::RecursiveStruct(name));
        }
        let layout = layout_properties(LayoutInfo::default(), &mut properties, types)?;
        Ok(Self {
            name,
            properties,
            layout,
        })
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn size(&self) -> usize {
        self.layout.size
    }

    pub fn alignment(&self) -> usize {
        self.layout.alignment
    }

    pub fn slot_count(&self) -> usize {
        self.layout.slot_count
    }

    pub fn default_values(&self, types: &TypeRegistry) -> ReflectResult<Vec<PropertyValue>> {
        default_values(&self.properties, types)
    }
}

/// Registry of struct types, keyed by name.
///
/// Struct properties refer to their type by name, which lets a struct hold
/// an array of itself without a reference cycle.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    structs: HashMap<Name, Arc<StructDef>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: StructDef) -> ReflectResult<Arc<StructDef>> {
        if self.structs.contains_key(&def.name) {
            return Err(ReflectError::DuplicateStruct(def.name));
        }
        let def = Arc::new(def);
        self.structs.insert(def.name, Arc::clone(&def));
        Ok(def)
    }

    pub fn get(&self, name: Name) -> Option<&Arc<StructDef>> {
        self.structs.get(&name)
    }

    /// Like [`get`](Self::get) but failing with [`ReflectError::UnknownStruct`].
    pub fn require(&self, name: Name) -> ReflectResult<&Arc<StructDef>> {
        self.structs.get(&name).ok_or(ReflectError::UnknownStruct(name))
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::PropertyKind;
    use kiln_types::NameTable;

    #[test]
    fn nested_struct_sizes() {
        let mut names = NameTable::new();
        let mut types = TypeRegistry::new();
        let inner = names.intern("Inner");
        types
            .register(
                StructDef::new(
                    inner,
                    vec![
                        Property::new(names.intern("A"), PropertyKind::Int),
                        Property::new(names.intern("B"), PropertyKind::Byte),
                    ],
                    &types,
                )
                .unwrap(),
            )
            .unwrap();

        let outer = StructDef::new(
            names.intern("Outer"),
            vec![
                Property::new(names.intern("First"), PropertyKind::Struct(inner)).with_array_dim(2),
                Property::new(names.intern("Tail"), PropertyKind::Float),
            ],
            &types,
        )
        .unwrap();
        assert_eq!(outer.size(), 5 * 2 + 4);
        assert_eq!(outer.slot_count(), 3);
        assert_eq!(outer.alignment(), 4);

        let defaults = outer.default_values(&types).unwrap();
        assert_eq!(defaults.len(), 3);
        assert_eq!(
            defaults[0],
            PropertyValue::Struct(vec![PropertyValue::Int(0), PropertyValue::Byte(0)])
        );
    }

    #[test]
    fn by_value_self_reference_rejected() {
        let mut names = NameTable::new();
        let name = names.intern("Loop");
        let err = StructDef::new(
            name,
            vec![Property::new(names.intern("Me"), PropertyKind::Struct(name))],
            &TypeRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ReflectError::RecursiveStruct(n) if n == name));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut names = NameTable::new();
        let name = names.intern("Once");
        let mut types = TypeRegistry::new();
        types.register(StructDef::new(name, vec![], &types).unwrap()).unwrap();
        let again = StructDef::new(name, vec![], &types).unwrap();
        assert!(matches!(types.register(again), Err(ReflectError::DuplicateStruct(_))));
        assert_eq!(types.len(), 1);
    }
}
