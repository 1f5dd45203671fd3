use std::collections::{HashMap, HashSet};
use std::slice;

use kiln_types::{Name, ObjectHandle};

use crate::kind::PropertyKind;
use crate::property::Property;
use crate::structs::TypeRegistry;
use crate::value::PropertyValue;

/// One entry of a reference token stream.
///
/// `slot` indexes the value storage the token is applied to. Struct tokens
/// name their struct; its own tokens live in the stream's struct table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefToken {
    /// A single object reference.
    Object { slot: usize },
    /// A dynamic array of object references.
    ArrayObject { slot: usize },
    /// A dynamic array of structs that hold references.
    ArrayStruct { slot: usize, layout: Name },
    /// A dynamic array whose elements need `element` applied (slot 0).
    ArrayNested { slot: usize, element: Box<RefToken> },
    /// An embedded struct that holds references.
    Struct { slot: usize, layout: Name },
    /// `count` consecutive elements starting at `slot`, each visited with
    /// `element` (slot 0).
    FixedArray {
        slot: usize,
        count: usize,
        element: Box<RefToken>,
    },
}

/// Flattened description of every strong reference slot in a layout.
///
/// The collector and the save tagger walk instances through this instead of
/// inspecting properties one by one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceTokenStream {
    tokens: Vec<RefToken>,
    structs: HashMap<Name, Vec<RefToken>>,
}

impl ReferenceTokenStream {
    /// Build the stream for a laid-out property list.
    pub fn assemble(layout: &[Property], types: &TypeRegistry) -> Self {
        let mut stream = Self::default();
        let mut in_progress = HashSet::new();
        stream.tokens = stream.tokens_for(layout, types, &mut in_progress);
        stream
    }

    pub fn tokens(&self) -> &[RefToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Call `visit` for every non-null reference in `values`.
    pub fn visit(&self, values: &[PropertyValue], visit: &mut dyn FnMut(ObjectHandle)) {
        self.visit_tokens(&self.tokens, values, visit);
    }

    fn tokens_for(
        &mut self,
        properties: &[Property],
        types: &TypeRegistry,
        in_progress: &mut HashSet<Name>,
    ) -> Vec<RefToken> {
        let mut tokens = Vec::new();
        for property in properties {
            if property.array_dim <= 1 {
                if let Some(token) = self.kind_token(&property.kind, property.offset, types, in_progress) {
                    tokens.push(token);
                }
            } else if let Some(element) = self.kind_token(&property.kind, 0, types, in_progress) {
                tokens.push(RefToken::FixedArray {
                    slot: property.offset,
                    count: property.slot_count(),
                    element: Box::new(element),
                });
            }
        }
        tokens
    }

    fn kind_token(
        &mut self,
        kind: &PropertyKind,
        slot: usize,
        types: &TypeRegistry,
        in_progress: &mut HashSet<Name>,
    ) -> Option<RefToken> {
        if !kind.contains_object_references(types) {
            return None;
        }
        match kind {
            PropertyKind::Object => Some(RefToken::Object { slot }),
            PropertyKind::Array(inner) => match inner.as_ref() {
                PropertyKind::Object => Some(RefToken::ArrayObject { slot }),
                PropertyKind::Struct(name) => {
                    self.ensure_struct(*name, types, in_progress);
                    Some(RefToken::ArrayStruct { slot, layout: *name })
                }
                other => self
                    .kind_token(other, 0, types, in_progress)
                    .map(|element| RefToken::ArrayNested {
                        slot,
                        element: Box::new(element),
                    }),
            },
            PropertyKind::Struct(name) => {
                self.ensure_struct(*name, types, in_progress);
                Some(RefToken::Struct { slot, layout: *name })
            }
            _ => None,
        }
    }

    fn ensure_struct(&mut self, name: Name, types: &TypeRegistry, in_progress: &mut HashSet<Name>) {
        if self.structs.contains_key(&name) || !in_progress.insert(name) {
            return;
        }
        if let Some(def) = types.get(name) {
            let tokens = self.tokens_for(def.properties(), types, in_progress);
            self.structs.insert(name, tokens);
        }
        in_progress.remove(&name);
    }

    fn visit_tokens(
        &self,
        tokens: &[RefToken],
        values: &[PropertyValue],
        visit: &mut dyn FnMut(ObjectHandle),
    ) {
        for token in tokens {
            match token {
                RefToken::Object { slot } => {
                    if let Some(PropertyValue::Object(Some(h))) = values.get(*slot) {
                        visit(*h);
                    }
                }
                RefToken::ArrayObject { slot } => {
                    if let Some(PropertyValue::Array(items)) = values.get(*slot) {
                        for item in items {
                            if let PropertyValue::Object(Some(h)) = item {
                                visit(*h);
                            }
                        }
                    }
                }
                RefToken::ArrayStruct { slot, layout } => {
                    if let (Some(PropertyValue::Array(items)), Some(inner)) =
                        (values.get(*slot), self.structs.get(layout))
                    {
                        for item in items {
                            if let PropertyValue::Struct(fields) = item {
                                self.visit_tokens(inner, fields, visit);
                            }
                        }
                    }
                }
                RefToken::ArrayNested { slot, element } => {
                    if let Some(PropertyValue::Array(items)) = values.get(*slot) {
                        for item in items {
                            self.visit_tokens(slice::from_ref(&**element), slice::from_ref(item), visit);
                        }
                    }
                }
                RefToken::Struct { slot, layout } => {
                    if let (Some(PropertyValue::Struct(fields)), Some(inner)) =
                        (values.get(*slot), self.structs.get(layout))
                    {
                        self.visit_tokens(inner, fields, visit);
                    }
                }
                RefToken::FixedArray {
                    slot,
                    count,
                    element,
                } => {
                    for i in 0..*count {
                        if let Some(item) = values.get(slot + i) {
                            self.visit_tokens(slice::from_ref(&**element), slice::from_ref(item), visit);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{default_values, layout_properties, LayoutInfo};
    use crate::structs::StructDef;
    use kiln_types::NameTable;

    fn h(i: u32) -> ObjectHandle {
        ObjectHandle::new(i, 0)
    }

    fn collect(stream: &ReferenceTokenStream, values: &[PropertyValue]) -> Vec<ObjectHandle> {
        let mut out = Vec::new();
        stream.visit(values, &mut |o| out.push(o));
        out
    }

    #[test]
    fn plain_and_array_references() {
        let mut names = NameTable::new();
        let types = TypeRegistry::new();
        let mut layout = vec![
            Property::new(names.intern("Count"), PropertyKind::Int),
            Property::new(names.intern("Owner"), PropertyKind::Object),
            Property::new(names.intern("Items"), PropertyKind::Array(Box::new(PropertyKind::Object))),
            Property::new(names.intern("Slots"), PropertyKind::Object).with_array_dim(2),
        ];
        layout_properties(LayoutInfo::default(), &mut layout, &types).unwrap();
        let stream = ReferenceTokenStream::assemble(&layout, &types);
        assert_eq!(
            stream.tokens(),
            &[
                RefToken::Object { slot: 1 },
                RefToken::ArrayObject { slot: 2 },
                RefToken::FixedArray {
                    slot: 3,
                    count: 2,
                    element: Box::new(RefToken::Object { slot: 0 })
                },
            ]
        );

        let mut values = default_values(&layout, &types).unwrap();
        values[1] = PropertyValue::Object(Some(h(1)));
        values[2] = PropertyValue::Array(vec![
            PropertyValue::Object(Some(h(2))),
            PropertyValue::Object(None),
            PropertyValue::Object(Some(h(3))),
        ]);
        values[4] = PropertyValue::Object(Some(h(4)));
        assert_eq!(collect(&stream, &values), vec![h(1), h(2), h(3), h(4)]);
    }

    #[test]
    fn structs_and_nested_arrays() {
        let mut names = NameTable::new();
        let mut types = TypeRegistry::new();
        let pair = names.intern("Pair");
        types
            .register(
                StructDef::new(
                    pair,
                    vec![
                        Property::new(names.intern("Weight"), PropertyKind::Float),
                        Property::new(names.intern("Target"), PropertyKind::Object),
                    ],
                    &types,
                )
                .unwrap(),
            )
            .unwrap();

        let mut layout = vec![
            Property::new(names.intern("One"), PropertyKind::Struct(pair)),
            Property::new(names.intern("Many"), PropertyKind::Array(Box::new(PropertyKind::Struct(pair)))),
            Property::new(
                names.intern("Grid"),
                PropertyKind::Array(Box::new(PropertyKind::Array(Box::new(PropertyKind::Object)))),
            ),
        ];
        layout_properties(LayoutInfo::default(), &mut layout, &types).unwrap();
        let stream = ReferenceTokenStream::assemble(&layout, &types);
        assert_eq!(stream.len(), 3);

        let pair_value = |o: u32| PropertyValue::Struct(vec![PropertyValue::Float(1.0), PropertyValue::Object(Some(h(o)))]);
        let values = vec![
            pair_value(10),
            PropertyValue::Array(vec![pair_value(11), pair_value(12)]),
            PropertyValue::Array(vec![PropertyValue::Array(vec![PropertyValue::Object(Some(h(13)))])]),
        ];
        assert_eq!(collect(&stream, &values), vec![h(10), h(11), h(12), h(13)]);
    }

    #[test]
    fn recursive_struct_stream_terminates() {
        let mut names = NameTable::new();
        let mut types = TypeRegistry::new();
        let node = names.intern("TreeNode");
        types
            .register(
                StructDef::new(
                    node,
                    vec![
                        Property::new(names.intern("Payload"), PropertyKind::Object),
                        Property::new(names.intern("Children"), PropertyKind::Array(Box::new(PropertyKind::Struct(node)))),
                    ],
                    &types,
                )
                .unwrap(),
            )
            .unwrap();
        let mut layout = vec![Property::new(names.intern("Root"), PropertyKind::Struct(node))];
        layout_properties(LayoutInfo::default(), &mut layout, &types).unwrap();
        let stream = ReferenceTokenStream::assemble(&layout, &types);

        let leaf = PropertyValue::Struct(vec![PropertyValue::Object(Some(h(2))), PropertyValue::Array(vec![])]);
        let root = PropertyValue::Struct(vec![PropertyValue::Object(Some(h(1))), PropertyValue::Array(vec![leaf])]);
        assert_eq!(collect(&stream, &[root]), vec![h(1), h(2)]);
    }

    #[test]
    fn no_reference_properties_give_empty_stream() {
        let mut names = NameTable::new();
        let types = TypeRegistry::new();
        let mut layout = vec![
            Property::new(names.intern("A"), PropertyKind::Int),
            Property::new(names.intern("B"), PropertyKind::Asset),
        ];
        layout_properties(LayoutInfo::default(), &mut layout, &types).unwrap();
        assert!(ReferenceTokenStream::assemble(&layout, &types).is_empty());
    }
}
