use std::fmt;

use serde::{Deserialize, Serialize};

/// Signed reference into a package's import or export table.
///
/// - `0` is null.
/// - `> 0` is export `value - 1`.
/// - `< 0` is import `-value - 1`.
///
/// Converting to the wrong table is a programming error and panics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PackageIndex(i32);

impl PackageIndex {
    /// The null index.
    pub const NULL: PackageIndex = PackageIndex(0);

    /// Index referring to import `index`.
    pub fn from_import(index: usize) -> Self {
        Self(-(index as i32) - 1)
    }

    /// Index referring to export `index`.
    pub fn from_export(index: usize) -> Self {
        Self(index as i32 + 1)
    }

    /// Wrap a raw on-disk value.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw on-disk value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn is_import(self) -> bool {
        self.0 < 0
    }

    pub const fn is_export(self) -> bool {
        self.0 > 0
    }

    /// The import table position.
    ///
    /// # Panics
    ///
    /// Panics if this is not an import index.
    pub fn to_import(self) -> usize {
        assert!(self.is_import(), "{self:?} is not an import index");
        (-self.0 - 1) as usize
    }

    /// The export table position.
    ///
    /// # Panics
    ///
    /// Panics if this is not an export index.
    pub fn to_export(self) -> usize {
        assert!(self.is_export(), "{self:?} is not an export index");
        (self.0 - 1) as usize
    }
}

impl fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "PackageIndex(null)")
        } else if self.is_import() {
            write!(f, "PackageIndex(import {})", self.to_import())
        } else {
            write!(f, "PackageIndex(export {})", self.to_export())
        }
    }
}

impl fmt::Display for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn null_is_zero() {
        assert!(PackageIndex::NULL.is_null());
        assert!(!PackageIndex::NULL.is_import());
        assert!(!PackageIndex::NULL.is_export());
        assert_eq!(PackageIndex::default(), PackageIndex::NULL);
    }

    #[test]
    fn encoding_matches_table_convention() {
        assert_eq!(PackageIndex::from_export(0).raw(), 1);
        assert_eq!(PackageIndex::from_export(4).raw(), 5);
        assert_eq!(PackageIndex::from_import(0).raw(), -1);
        assert_eq!(PackageIndex::from_import(4).raw(), -5);
    }

    #[test]
    #[should_panic(expected = "is not an import index")]
    fn wrong_variant_panics() {
        PackageIndex::from_export(3).to_import();
    }

    #[test]
    #[should_panic(expected = "is not an export index")]
    fn null_to_export_panics() {
        PackageIndex::NULL.to_export();
    }

    #[test]
    fn debug_names_the_table() {
        assert_eq!(format!("{:?}", PackageIndex::from_import(2)), "PackageIndex(import 2)");
        assert_eq!(format!("{:?}", PackageIndex::from_export(7)), "PackageIndex(export 7)");
    }

    proptest! {
        #[test]
        fn import_bijection(i in 0usize..(i32::MAX as usize - 1)) {
            let index = PackageIndex::from_import(i);
            prop_assert!(index.is_import());
            prop_assert_eq!(index.to_import(), i);
        }

        #[test]
        fn export_bijection(i in 0usize..(i32::MAX as usize - 1)) {
            let index = PackageIndex::from_export(i);
            prop_assert!(index.is_export());
            prop_assert_eq!(index.to_export(), i);
        }

        #[test]
        fn raw_roundtrip(raw in any::<i32>().prop_filter("min has no import", |r| *r != i32::MIN)) {
            let index = PackageIndex::from_raw(raw);
            if index.is_import() {
                prop_assert_eq!(PackageIndex::from_import(index.to_import()), index);
            } else if index.is_export() {
                prop_assert_eq!(PackageIndex::from_export(index.to_export()), index);
            } else {
                prop_assert!(index.is_null());
            }
        }
    }
}
