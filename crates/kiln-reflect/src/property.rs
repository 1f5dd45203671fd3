use kiln_types::{Name, PropertyFlags};

use crate::error::{ReflectError, ReflectResult};
use crate::kind::PropertyKind;
use crate::structs::TypeRegistry;
use crate::value::PropertyValue;

/// Field descriptor of a class or struct.
///
/// `offset` is the first value slot the property occupies in its owner's
/// value storage; a fixed-size array of arity `array_dim` occupies
/// `array_dim` consecutive slots. `element_size` is the byte size of one
/// element and feeds the owner's instance size.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: Name,
    pub kind: PropertyKind,
    pub array_dim: u32,
    pub flags: PropertyFlags,
    pub offset: usize,
    pub element_size: usize,
}

impl Property {
    pub fn new(name: Name, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            array_dim: 1,
            flags: PropertyFlags::empty(),
            offset: 0,
            element_size: 0,
        }
    }

    pub fn with_array_dim(mut self, array_dim: u32) -> Self {
        self.array_dim = array_dim.max(1);
        self
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn slot_count(&self) -> usize {
        self.array_dim as usize
    }

    /// Total bytes across all elements.
    pub fn byte_size(&self) -> usize {
        self.element_size * self.array_dim as usize
    }

    pub fn is_transient(&self) -> bool {
        self.flags.contains(PropertyFlags::TRANSIENT)
    }

    pub fn is_deprecated(&self) -> bool {
        self.flags.contains(PropertyFlags::DEPRECATED)
    }

    pub fn is_editor_only(&self) -> bool {
        self.flags.contains(PropertyFlags::EDITOR_ONLY)
    }

    /// Whether this property takes part in a serialization pass.
    ///
    /// Deprecated properties are read from tagged data but never written.
    /// Binary data has no tags to skip by, so there they are excluded in
    /// both directions.
    pub fn should_serialize(&self, loading: bool, binary: bool, filter_editor_only: bool) -> bool {
        if self.is_transient() || (filter_editor_only && self.is_editor_only()) {
            return false;
        }
        if self.is_deprecated() {
            return loading && !binary;
        }
        true
    }

    /// Element `index` within an owner's value storage.
    pub fn value<'a>(&self, values: &'a [PropertyValue], index: usize) -> Option<&'a PropertyValue> {
        if index >= self.slot_count() {
            return None;
        }
        values.get(self.offset + index)
    }

    /// Store element `index`, checking the value against the declared kind.
    pub fn set_value(
        &self,
        values: &mut [PropertyValue],
        index: usize,
        value: PropertyValue,
    ) -> ReflectResult<()> {
        self.kind.check_value(self.name, &value)?;
        let slot = self.slot_mut(values, index)?;
        *slot = value;
        Ok(())
    }

    pub(crate) fn slot_mut<'a>(
        &self,
        values: &'a mut [PropertyValue],
        index: usize,
    ) -> ReflectResult<&'a mut PropertyValue> {
        let out_of_range = ReflectError::OutOfRange {
            property: self.name,
            index,
            dim: self.slot_count(),
        };
        if index >= self.slot_count() {
            return Err(out_of_range);
        }
        values.get_mut(self.offset + index).ok_or(out_of_range)
    }
}

/// Computed placement of a property list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutInfo {
    pub slot_count: usize,
    pub size: usize,
    pub alignment: usize,
}

/// Assign offsets and element sizes to `properties`, continuing after `base`.
///
/// Offsets grow monotonically in declaration order and the resulting size is
/// `base.size` plus the byte size of every property.
pub fn layout_properties(
    base: LayoutInfo,
    properties: &mut [Property],
    types: &TypeRegistry,
) -> ReflectResult<LayoutInfo> {
    let mut info = LayoutInfo {
        alignment: base.alignment.max(1),
        ..base
    };
    for property in properties.iter_mut() {
        property.element_size = property.kind.element_size(types)?;
        property.offset = info.slot_count;
        info.slot_count += property.slot_count();
        info.size += property.byte_size();
        info.alignment = info.alignment.max(property.kind.min_alignment(types)?);
    }
    Ok(info)
}

/// Default value for every slot of a laid-out property list.
pub fn default_values(
    properties: &[Property],
    types: &TypeRegistry,
) -> ReflectResult<Vec<PropertyValue>> {
    let mut values = Vec::new();
    for property in properties {
        let value = property.kind.default_value(types)?;
        values.extend(std::iter::repeat(value).take(property.slot_count()));
    }
    Ok(values)
}
