//! Generic property serialization.
//!
//! Two layouts are supported. The tagged layout writes, per property, a tag
//! `{ name, kind, array_dim, size }` followed by the elements and ends the
//! stream with a `None` name; readers match tags by name and kind and skip
//! anything they do not recognize by its recorded size. The binary layout
//! writes the elements in layout order with no tags and is only readable
//! with the exact layout that wrote it.

use kiln_store::{Archive, ArchiveExt, StoreError};
use kiln_types::{known, ClassFlags, Name, PropertyFlags};
use tracing::{debug, warn};

use crate::class::ClassDef;
use crate::error::{ReflectError, ReflectResult};
use crate::kind::PropertyKind;
use crate::property::Property;
use crate::structs::TypeRegistry;
use crate::value::{Color, PropertyValue, Rotator, Vector};

/// Upper bound on dynamic array lengths read from an archive.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Upper bound on properties declared by a serialized class.
pub const MAX_CLASS_PROPERTIES: usize = 1 << 16;

const MAX_KIND_DEPTH: usize = 16;

/// Serialize one element of `kind`.
///
/// When loading, a value of the wrong variant is replaced by the kind's
/// default before reading into it.
pub fn serialize_value(
    ar: &mut dyn Archive,
    kind: &PropertyKind,
    value: &mut PropertyValue,
    types: &TypeRegistry,
) -> ReflectResult<()> {
    if !same_variant(value, kind) {
        if ar.is_loading() {
            *value = kind.default_value(types)?;
        } else {
            return Err(ReflectError::TypeMismatch {
                property: Name::NONE,
                expected: kind.label(),
                actual: value.label(),
            });
        }
    }

    match (kind, value) {
        (PropertyKind::Byte, PropertyValue::Byte(v)) => ar.serialize_u8(v)?,
        (PropertyKind::Int, PropertyValue::Int(v)) => ar.serialize_i32(v)?,
        (PropertyKind::Bool, PropertyValue::Bool(v)) => ar.serialize_bool(v)?,
        (PropertyKind::Float, PropertyValue::Float(v)) => ar.serialize_f32(v)?,
        (PropertyKind::Color, PropertyValue::Color(Color { r, g, b, a })) => {
            ar.serialize_u8(r)?;
            ar.serialize_u8(g)?;
            ar.serialize_u8(b)?;
            ar.serialize_u8(a)?;
        }
        (PropertyKind::Vector, PropertyValue::Vector(Vector { x, y, z })) => {
            ar.serialize_f32(x)?;
            ar.serialize_f32(y)?;
            ar.serialize_f32(z)?;
        }
        (PropertyKind::Rotator, PropertyValue::Rotator(Rotator { pitch, yaw, roll })) => {
            ar.serialize_f32(pitch)?;
            ar.serialize_f32(yaw)?;
            ar.serialize_f32(roll)?;
        }
        (PropertyKind::String, PropertyValue::String(s)) => ar.serialize_string(s)?,
        (PropertyKind::Object, PropertyValue::Object(o)) => ar.serialize_object(o)?,
        (PropertyKind::Asset, PropertyValue::Asset(asset)) => ar.serialize_string(&mut asset.path)?,
        (PropertyKind::Array(inner), PropertyValue::Array(items)) => {
            let offset = ar.tell()?;
            let mut count = items.len() as u32;
            ar.serialize_u32(&mut count)?;
            if ar.is_loading() {
                if count as usize > MAX_ARRAY_LEN {
                    return Err(StoreError::Corrupt {
                        offset,
                        reason: format!("array length {count} exceeds limit"),
                    }
                    .into());
                }
                let element = inner.default_value(types)?;
                *items = vec![element; count as usize];
            }
            for item in items.iter_mut() {
                serialize_value(ar, inner, item, types)?;
            }
        }
        (PropertyKind::Struct(name), PropertyValue::Struct(fields)) => {
            let def = types.require(*name)?;
            if ar.is_loading() && fields.len() != def.slot_count() {
                *fields = def.default_values(types)?;
            }
            serialize_properties(ar, def.properties(), fields, types)?;
        }
        (kind, value) => {
            return Err(ReflectError::TypeMismatch {
                property: Name::NONE,
                expected: kind.label(),
                actual: value.label(),
            })
        }
    }
    Ok(())
}

/// Serialize `values` in whichever layout the archive asks for.
pub fn serialize_properties(
    ar: &mut dyn Archive,
    properties: &[Property],
    values: &mut [PropertyValue],
    types: &TypeRegistry,
) -> ReflectResult<()> {
    if ar.wants_binary_properties() {
        serialize_binary(ar, properties, values, types)
    } else {
        serialize_tagged(ar, properties, values, types)
    }
}

/// Tagged property stream terminated by a `None` name.
pub fn serialize_tagged(
    ar: &mut dyn Archive,
    properties: &[Property],
    values: &mut [PropertyValue],
    types: &TypeRegistry,
) -> ReflectResult<()> {
    if ar.is_loading() {
        load_tagged(ar, properties, values, types)
    } else {
        save_tagged(ar, properties, values, types)
    }
}

fn save_tagged(
    ar: &mut dyn Archive,
    properties: &[Property],
    values: &mut [PropertyValue],
    types: &TypeRegistry,
) -> ReflectResult<()> {
    let filter = ar.is_filter_editor_only();
    for property in properties {
        if !property.should_serialize(false, false, filter) {
            continue;
        }
        let mut name = property.name;
        let mut kind = property.kind.clone();
        let mut dim = property.array_dim;
        ar.serialize_name(&mut name)?;
        serialize_kind(ar, &mut kind)?;
        ar.serialize_u32(&mut dim)?;

        let size_pos = ar.tell()?;
        let mut size = 0u32;
        ar.serialize_u32(&mut size)?;
        let start = ar.tell()?;
        for index in 0..property.slot_count() {
            let slot = property.slot_mut(values, index)?;
            serialize_value(ar, &property.kind, slot, types)
                .map_err(|e| with_property(e, property.name))?;
        }
        let end = ar.tell()?;
        let mut size = (end - start) as u32;
        ar.seek(size_pos)?;
        ar.serialize_u32(&mut size)?;
        ar.seek(end)?;
    }
    let mut terminator = Name::NONE;
    ar.serialize_name(&mut terminator)?;
    Ok(())
}

fn load_tagged(
    ar: &mut dyn Archive,
    properties: &[Property],
    values: &mut [PropertyValue],
    types: &TypeRegistry,
) -> ReflectResult<()> {
    let filter = ar.is_filter_editor_only();
    loop {
        let mut name = Name::NONE;
        ar.serialize_name(&mut name)?;
        if name.is_none() {
            return Ok(());
        }
        let mut kind = PropertyKind::Byte;
        serialize_kind(ar, &mut kind)?;
        let mut dim = 0u32;
        ar.serialize_u32(&mut dim)?;
        let mut size = 0u32;
        ar.serialize_u32(&mut size)?;
        let start = ar.tell()?;
        let expected_end = start + u64::from(size);

        let target = properties
            .iter()
            .find(|p| p.name == name && p.should_serialize(true, false, filter));
        match target {
            Some(property) if property.kind == kind => {
                let count = dim.min(property.array_dim) as usize;
                for index in 0..count {
                    let slot = property.slot_mut(values, index)?;
                    serialize_value(ar, &property.kind, slot, types)
                        .map_err(|e| with_property(e, property.name))?;
                }
                let end = ar.tell()?;
                if end != expected_end {
                    if dim <= property.array_dim {
                        warn!(
                            property = ?name,
                            expected = size,
                            actual = end - start,
                            "tagged property size mismatch"
                        );
                    }
                    ar.seek(expected_end)?;
                }
            }
            Some(property) => {
                debug!(
                    property = ?name,
                    declared = property.kind.label(),
                    tagged = kind.label(),
                    "skipping property with mismatched type"
                );
                ar.seek(expected_end)?;
            }
            None => {
                debug!(property = ?name, size, "skipping unknown property tag");
                ar.seek(expected_end)?;
            }
        }
    }
}

/// Untagged values in layout order.
pub fn serialize_binary(
    ar: &mut dyn Archive,
    properties: &[Property],
    values: &mut [PropertyValue],
    types: &TypeRegistry,
) -> ReflectResult<()> {
    let loading = ar.is_loading();
    let filter = ar.is_filter_editor_only();
    for property in properties {
        if !property.should_serialize(loading, true, filter) {
            continue;
        }
        for index in 0..property.slot_count() {
            let slot = property.slot_mut(values, index)?;
            serialize_value(ar, &property.kind, slot, types)
                .map_err(|e| with_property(e, property.name))?;
        }
    }
    Ok(())
}

/// Property kind as its type name, followed by the inner kind for arrays or
/// the struct name for structs.
pub fn serialize_kind(ar: &mut dyn Archive, kind: &mut PropertyKind) -> ReflectResult<()> {
    serialize_kind_at(ar, kind, 0)
}

fn serialize_kind_at(ar: &mut dyn Archive, kind: &mut PropertyKind, depth: usize) -> ReflectResult<()> {
    if depth > MAX_KIND_DEPTH {
        return Err(StoreError::Corrupt {
            offset: ar.tell()?,
            reason: "property kind nested too deeply".into(),
        }
        .into());
    }
    let mut type_name = kind.type_name();
    ar.serialize_name(&mut type_name)?;
    if ar.is_loading() {
        *kind = if type_name == known::ARRAY_PROPERTY {
            let mut inner = PropertyKind::Byte;
            serialize_kind_at(ar, &mut inner, depth + 1)?;
            PropertyKind::Array(Box::new(inner))
        } else if type_name == known::STRUCT_PROPERTY {
            let mut struct_name = Name::NONE;
            ar.serialize_name(&mut struct_name)?;
            PropertyKind::Struct(struct_name)
        } else {
            PropertyKind::from_scalar_type_name(type_name)
                .ok_or(ReflectError::UnknownPropertyType(type_name))?
        };
    } else {
        match kind {
            PropertyKind::Array(inner) => serialize_kind_at(ar, inner, depth + 1)?,
            PropertyKind::Struct(struct_name) => ar.serialize_name(struct_name)?,
            _ => {}
        }
    }
    Ok(())
}

/// Class descriptor: super class, flags and own property declarations.
///
/// Loading replaces the declarations and leaves the class unlinked.
pub fn serialize_class_def(ar: &mut dyn Archive, def: &mut ClassDef) -> ReflectResult<()> {
    ar.serialize_object(&mut def.super_class)?;
    let mut flags = def.flags.bits();
    ar.serialize_u32(&mut flags)?;

    let offset = ar.tell()?;
    let mut count = def.properties().len() as u32;
    ar.serialize_u32(&mut count)?;

    if ar.is_loading() {
        def.flags = ClassFlags::from_bits_truncate(flags);
        if count as usize > MAX_CLASS_PROPERTIES {
            return Err(StoreError::Corrupt {
                offset,
                reason: format!("class declares {count} properties"),
            }
            .into());
        }
        let mut properties = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut property = Property::new(Name::NONE, PropertyKind::Byte);
            serialize_declaration(ar, &mut property)?;
            properties.push(property);
        }
        def.set_properties(properties);
    } else {
        for property in def.properties() {
            let mut property = property.clone();
            serialize_declaration(ar, &mut property)?;
        }
    }
    Ok(())
}

fn serialize_declaration(ar: &mut dyn Archive, property: &mut Property) -> ReflectResult<()> {
    ar.serialize_name(&mut property.name)?;
    serialize_kind(ar, &mut property.kind)?;
    ar.serialize_u32(&mut property.array_dim)?;
    let mut flags = property.flags.bits();
    ar.serialize_u32(&mut flags)?;
    if ar.is_loading() {
        property.array_dim = property.array_dim.max(1);
        property.flags = PropertyFlags::from_bits_truncate(flags);
    }
    Ok(())
}

fn same_variant(value: &PropertyValue, kind: &PropertyKind) -> bool {
    matches!(
        (value, kind),
        (PropertyValue::Byte(_), PropertyKind::Byte)
            | (PropertyValue::Int(_), PropertyKind::Int)
            | (PropertyValue::Bool(_), PropertyKind::Bool)
            | (PropertyValue::Float(_), PropertyKind::Float)
            | (PropertyValue::Color(_), PropertyKind::Color)
            | (PropertyValue::Vector(_), PropertyKind::Vector)
            | (PropertyValue::Rotator(_), PropertyKind::Rotator)
            | (PropertyValue::String(_), PropertyKind::String)
            | (PropertyValue::Object(_), PropertyKind::Object)
            | (PropertyValue::Asset(_), PropertyKind::Asset)
            | (PropertyValue::Array(_), PropertyKind::Array(_))
            | (PropertyValue::Struct(_), PropertyKind::Struct(_))
    )
}

fn with_property(err: ReflectError, name: Name) -> ReflectError {
    match err {
        ReflectError::TypeMismatch {
            property,
            expected,
            actual,
        } if property.is_none() => ReflectError::TypeMismatch {
            property: name,
            expected,
            actual,
        },
        other => other,
    }
}
