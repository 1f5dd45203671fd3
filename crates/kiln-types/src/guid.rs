use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// 128-bit package identifier.
///
/// Freshly saved packages get a UUID v7 so GUIDs sort by save time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid(uuid::Uuid);

impl Guid {
    /// Generate a new time-ordered GUID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// The all-zero GUID.
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Parse from a byte slice that must be exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: 16,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_guids_are_unique() {
        assert_ne!(Guid::new(), Guid::new());
        assert!(!Guid::new().is_nil());
    }

    #[test]
    fn default_is_nil() {
        assert!(Guid::default().is_nil());
        assert_eq!(Guid::default().as_bytes(), &[0u8; 16]);
    }

    #[test]
    fn slice_roundtrip() {
        let g = Guid::new();
        let back = Guid::from_slice(g.as_bytes()).unwrap();
        assert_eq!(g, back);
    }

    #[test]
    fn short_slice_rejected() {
        assert_eq!(
            Guid::from_slice(&[1, 2, 3]),
            Err(TypeError::InvalidLength {
                expected: 16,
                actual: 3
            })
        );
    }
}
