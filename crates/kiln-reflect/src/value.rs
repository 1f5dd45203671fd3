use kiln_types::ObjectHandle;

use crate::kind::PropertyKind;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Soft reference to an asset by its path name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AssetRef {
    pub path: String,
}

impl AssetRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_null(&self) -> bool {
        self.path.is_empty()
    }
}

/// Storage for one element of a reflected property.
///
/// Struct values hold their fields in the struct's layout order; array values
/// hold their elements.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Byte(u8),
    Int(i32),
    Bool(bool),
    Float(f32),
    Color(Color),
    Vector(Vector),
    Rotator(Rotator),
    String(String),
    Object(Option<ObjectHandle>),
    Asset(AssetRef),
    Array(Vec<PropertyValue>),
    Struct(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn label(&self) -> &'static str {
        match self {
            PropertyValue::Byte(_) => "byte",
            PropertyValue::Int(_) => "int",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Float(_) => "float",
            PropertyValue::Color(_) => "color",
            PropertyValue::Vector(_) => "vector",
            PropertyValue::Rotator(_) => "rotator",
            PropertyValue::String(_) => "string",
            PropertyValue::Object(_) => "object",
            PropertyValue::Asset(_) => "asset",
            PropertyValue::Array(_) => "array",
            PropertyValue::Struct(_) => "struct",
        }
    }

    /// Whether this value can be stored in a property of `kind`.
    pub fn matches_kind(&self, kind: &PropertyKind) -> bool {
        match (self, kind) {
            (PropertyValue::Array(items), PropertyKind::Array(inner)) => {
                items.iter().all(|item| item.matches_kind(inner))
            }
            (PropertyValue::Struct(_), PropertyKind::Struct(_)) => true,
            (PropertyValue::Byte(_), PropertyKind::Byte)
            | (PropertyValue::Int(_), PropertyKind::Int)
            | (PropertyValue::Bool(_), PropertyKind::Bool)
            | (PropertyValue::Float(_), PropertyKind::Float)
            | (PropertyValue::Color(_), PropertyKind::Color)
            | (PropertyValue::Vector(_), PropertyKind::Vector)
            | (PropertyValue::Rotator(_), PropertyKind::Rotator)
            | (PropertyValue::String(_), PropertyKind::String)
            | (PropertyValue::Object(_), PropertyKind::Object)
            | (PropertyValue::Asset(_), PropertyKind::Asset) => true,
            _ => false,
        }
    }

    /// Bitwise identity: floats compare by representation, so `NaN` is
    /// identical to itself and `0.0` differs from `-0.0`.
    pub fn identical(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropertyValue::Vector(a), PropertyValue::Vector(b)) => {
                bits3(a.x, a.y, a.z) == bits3(b.x, b.y, b.z)
            }
            (PropertyValue::Rotator(a), PropertyValue::Rotator(b)) => {
                bits3(a.pitch, a.yaw, a.roll) == bits3(b.pitch, b.yaw, b.roll)
            }
            (PropertyValue::Array(a), PropertyValue::Array(b))
            | (PropertyValue::Struct(a), PropertyValue::Struct(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.identical(y))
            }
            _ => self == other,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The referenced object, for object values.
    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            PropertyValue::Object(o) => *o,
            _ => None,
        }
    }
}

fn bits3(a: f32, b: f32, c: f32) -> (u32, u32, u32) {
    (a.to_bits(), b.to_bits(), c.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matching() {
        assert!(PropertyValue::Int(3).matches_kind(&PropertyKind::Int));
        assert!(!PropertyValue::Int(3).matches_kind(&PropertyKind::Float));
        let ints = PropertyValue::Array(vec![PropertyValue::Int(1), PropertyValue::Int(2)]);
        assert!(ints.matches_kind(&PropertyKind::Array(Box::new(PropertyKind::Int))));
        assert!(!ints.matches_kind(&PropertyKind::Array(Box::new(PropertyKind::Byte))));
    }

    #[test]
    fn identical_is_bitwise_for_floats() {
        let nan = PropertyValue::Float(f32::NAN);
        assert!(nan.identical(&nan.clone()));
        assert_ne!(nan, nan.clone());
        assert!(!PropertyValue::Float(0.0).identical(&PropertyValue::Float(-0.0)));
    }

    #[test]
    fn identical_recurses_into_containers() {
        let a = PropertyValue::Struct(vec![
            PropertyValue::Vector(Vector { x: 1.0, y: 2.0, z: 3.0 }),
            PropertyValue::Array(vec![PropertyValue::String("a".into())]),
        ]);
        let mut b = a.clone();
        assert!(a.identical(&b));
        if let PropertyValue::Struct(fields) = &mut b {
            fields[1] = PropertyValue::Array(vec![]);
        }
        assert!(!a.identical(&b));
    }

    #[test]
    fn accessors() {
        let h = ObjectHandle::new(1, 0);
        assert_eq!(PropertyValue::Object(Some(h)).as_object(), Some(h));
        assert_eq!(PropertyValue::Int(9).as_int(), Some(9));
        assert_eq!(PropertyValue::String("x".into()).as_str(), Some("x"));
        assert_eq!(PropertyValue::Bool(true).as_int(), None);
        assert!(AssetRef::default().is_null());
    }
}
