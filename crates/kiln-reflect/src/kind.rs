use std::collections::HashSet;

use kiln_types::{known, Name};

use crate::error::{ReflectError, ReflectResult};
use crate::structs::TypeRegistry;
use crate::value::{AssetRef, Color, PropertyValue, Rotator, Vector};

/// The closed set of reflected field types.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Byte,
    Int,
    Bool,
    Float,
    Color,
    Vector,
    Rotator,
    String,
    /// Strong reference to another object.
    Object,
    /// Soft reference by path; never followed by the collector.
    Asset,
    /// Dynamic array of `inner`.
    Array(Box<PropertyKind>),
    /// Embedded struct, resolved by name through the [`TypeRegistry`].
    Struct(Name),
}

impl PropertyKind {
    /// Name written into property tags.
    pub fn type_name(&self) -> Name {
        match self {
            PropertyKind::Byte => known::BYTE_PROPERTY,
            PropertyKind::Int => known::INT_PROPERTY,
            PropertyKind::Bool => known::BOOL_PROPERTY,
            PropertyKind::Float => known::FLOAT_PROPERTY,
            PropertyKind::Color => known::COLOR_PROPERTY,
            PropertyKind::Vector => known::VECTOR_PROPERTY,
            PropertyKind::Rotator => known::ROTATOR_PROPERTY,
            PropertyKind::String => known::STR_PROPERTY,
            PropertyKind::Object => known::OBJECT_PROPERTY,
            PropertyKind::Asset => known::ASSET_PROPERTY,
            PropertyKind::Array(_) => known::ARRAY_PROPERTY,
            PropertyKind::Struct(_) => known::STRUCT_PROPERTY,
        }
    }

    /// Human-readable kind for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            PropertyKind::Byte => "byte",
            PropertyKind::Int => "int",
            PropertyKind::Bool => "bool",
            PropertyKind::Float => "float",
            PropertyKind::Color => "color",
            PropertyKind::Vector => "vector",
            PropertyKind::Rotator => "rotator",
            PropertyKind::String => "string",
            PropertyKind::Object => "object",
            PropertyKind::Asset => "asset",
            PropertyKind::Array(_) => "array",
            PropertyKind::Struct(_) => "struct",
        }
    }

    /// Size in bytes of one element.
    pub fn element_size(&self, types: &TypeRegistry) -> ReflectResult<usize> {
        Ok(match self {
            PropertyKind::Byte | PropertyKind::Bool => 1,
            PropertyKind::Int | PropertyKind::Float | PropertyKind::Color => 4,
            PropertyKind::Vector | PropertyKind::Rotator => 12,
            PropertyKind::Object => 8,
            PropertyKind::String | PropertyKind::Asset | PropertyKind::Array(_) => 24,
            PropertyKind::Struct(name) => types.require(*name)?.size(),
        })
    }

    pub fn min_alignment(&self, types: &TypeRegistry) -> ReflectResult<usize> {
        Ok(match self {
            PropertyKind::Byte | PropertyKind::Bool => 1,
            PropertyKind::Int
            | PropertyKind::Float
            | PropertyKind::Color
            | PropertyKind::Vector
            | PropertyKind::Rotator => 4,
            PropertyKind::Object
            | PropertyKind::String
            | PropertyKind::Asset
            | PropertyKind::Array(_) => 8,
            PropertyKind::Struct(name) => types.require(*name)?.alignment(),
        })
    }

    /// Whether a value of this kind can hold a strong object reference.
    ///
    /// Structs are visited at most once, so a struct holding an array of
    /// itself terminates.
    pub fn contains_object_references(&self, types: &TypeRegistry) -> bool {
        self.contains_references_guarded(types, &mut HashSet::new())
    }

    pub(crate) fn contains_references_guarded(
        &self,
        types: &TypeRegistry,
        visited: &mut HashSet<Name>,
    ) -> bool {
        match self {
            PropertyKind::Object => true,
            PropertyKind::Array(inner) => inner.contains_references_guarded(types, visited),
            PropertyKind::Struct(name) => {
                if !visited.insert(*name) {
                    return false;
                }
                types.get(*name).is_some_and(|def| {
                    def.properties()
                        .iter()
                        .any(|p| p.kind.contains_references_guarded(types, visited))
                })
            }
            _ => false,
        }
    }

    /// Zero value for a freshly constructed instance.
    pub fn default_value(&self, types: &TypeRegistry) -> ReflectResult<PropertyValue> {
        Ok(match self {
            PropertyKind::Byte => PropertyValue::Byte(0),
            PropertyKind::Int => PropertyValue::Int(0),
            PropertyKind::Bool => PropertyValue::Bool(false),
            PropertyKind::Float => PropertyValue::Float(0.0),
            PropertyKind::Color => PropertyValue::Color(Color::default()),
            PropertyKind::Vector => PropertyValue::Vector(Vector::default()),
            PropertyKind::Rotator => PropertyValue::Rotator(Rotator::default()),
            PropertyKind::String => PropertyValue::String(String::new()),
            PropertyKind::Object => PropertyValue::Object(None),
            PropertyKind::Asset => PropertyValue::Asset(AssetRef::default()),
            PropertyKind::Array(_) => PropertyValue::Array(Vec::new()),
            PropertyKind::Struct(name) => {
                PropertyValue::Struct(types.require(*name)?.default_values(types)?)
            }
        })
    }

    /// Decode a tag type name. Arrays and structs need their payload filled in
    /// by the caller.
    pub(crate) fn from_scalar_type_name(name: Name) -> Option<PropertyKind> {
        Some(match name {
            n if n == known::BYTE_PROPERTY => PropertyKind::Byte,
            n if n == known::INT_PROPERTY => PropertyKind::Int,
            n if n == known::BOOL_PROPERTY => PropertyKind::Bool,
            n if n == known::FLOAT_PROPERTY => PropertyKind::Float,
            n if n == known::COLOR_PROPERTY => PropertyKind::Color,
            n if n == known::VECTOR_PROPERTY => PropertyKind::Vector,
            n if n == known::ROTATOR_PROPERTY => PropertyKind::Rotator,
            n if n == known::STR_PROPERTY => PropertyKind::String,
            n if n == known::OBJECT_PROPERTY => PropertyKind::Object,
            n if n == known::ASSET_PROPERTY => PropertyKind::Asset,
            _ => return None,
        })
    }

    /// Struct this kind embeds by value, looking through nothing.
    pub(crate) fn by_value_struct(&self) -> Option<Name> {
        match self {
            PropertyKind::Struct(name) => Some(*name),
            _ => None,
        }
    }

    pub(crate) fn check_value(&self, property: Name, value: &PropertyValue) -> ReflectResult<()> {
        if value.matches_kind(self) {
            Ok(())
        } else {
            Err(ReflectError::TypeMismatch {
                property,
                expected: self.label(),
                actual: value.label(),
            })
        }
    }
}
