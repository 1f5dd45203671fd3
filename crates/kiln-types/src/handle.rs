use std::fmt;

use serde::{Deserialize, Serialize};

/// Generation-checked handle to an object slot.
///
/// The slot table bumps a slot's generation every time the slot is freed, so
/// a handle held past its object's destruction resolves to nothing instead of
/// to whatever reused the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle {
    index: u32,
    generation: u32,
}

impl ObjectHandle {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot position in the object table.
    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({}@{})", self.index, self.generation)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

/// Identifier of a loaded linker.
///
/// Ids are never reused within a runtime, so a stale id simply fails to
/// resolve.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkerId(u32);

impl LinkerId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for LinkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Linker({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_differ_by_generation() {
        let a = ObjectHandle::new(4, 0);
        let b = ObjectHandle::new(4, 1);
        assert_ne!(a, b);
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn handle_formatting() {
        let h = ObjectHandle::new(12, 3);
        assert_eq!(format!("{h:?}"), "Object(12@3)");
        assert_eq!(h.to_string(), "12@3");
        assert_eq!(format!("{:?}", LinkerId::new(2)), "Linker(2)");
    }

    #[test]
    fn handle_serde_roundtrip() {
        let h = ObjectHandle::new(7, 9);
        let json = serde_json::to_string(&h).unwrap();
        let back: ObjectHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
