use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Interned string handle.
///
/// A `Name` is an index into a [`NameTable`]. Two names from the same table
/// are equal exactly when their strings are equal, so comparison is a single
/// integer compare. Index 0 is always `None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Name(u32);

impl Name {
    /// The `None` name (index 0).
    pub const NONE: Name = Name(0);

    /// The raw table index.
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Returns `true` for the `None` name.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name(#{})", self.0)
    }
}

/// Names every table interns up front, in this order.
const KNOWN_NAMES: &[&str] = &[
    "None",
    "Core",
    "Object",
    "Class",
    "Package",
    "ObjectRedirector",
    "DestinationObject",
    "ByteProperty",
    "IntProperty",
    "BoolProperty",
    "FloatProperty",
    "ColorProperty",
    "VectorProperty",
    "RotatorProperty",
    "StrProperty",
    "ObjectProperty",
    "AssetProperty",
    "ArrayProperty",
    "StructProperty",
];

/// Well-known names with fixed indices in every [`NameTable`].
pub mod known {
    use super::Name;

    pub const NONE: Name = Name(0);
    pub const CORE: Name = Name(1);
    pub const OBJECT: Name = Name(2);
    pub const CLASS: Name = Name(3);
    pub const PACKAGE: Name = Name(4);
    pub const OBJECT_REDIRECTOR: Name = Name(5);
    pub const DESTINATION_OBJECT: Name = Name(6);
    pub const BYTE_PROPERTY: Name = Name(7);
    pub const INT_PROPERTY: Name = Name(8);
    pub const BOOL_PROPERTY: Name = Name(9);
    pub const FLOAT_PROPERTY: Name = Name(10);
    pub const COLOR_PROPERTY: Name = Name(11);
    pub const VECTOR_PROPERTY: Name = Name(12);
    pub const ROTATOR_PROPERTY: Name = Name(13);
    pub const STR_PROPERTY: Name = Name(14);
    pub const OBJECT_PROPERTY: Name = Name(15);
    pub const ASSET_PROPERTY: Name = Name(16);
    pub const ARRAY_PROPERTY: Name = Name(17);
    pub const STRUCT_PROPERTY: Name = Name(18);
}

/// Append-only string interner.
///
/// Entries are never removed, so every [`Name`] handed out stays valid for
/// the lifetime of the table. Each entry carries a CRC32 of its bytes that
/// stays stable across runs.
#[derive(Clone)]
pub struct NameTable {
    entries: IndexSet<Box<str>>,
    hashes: Vec<u32>,
}

impl NameTable {
    /// Create a table pre-populated with the well-known names.
    pub fn new() -> Self {
        let mut table = Self {
            entries: IndexSet::with_capacity(KNOWN_NAMES.len()),
            hashes: Vec::with_capacity(KNOWN_NAMES.len()),
        };
        for known in KNOWN_NAMES {
            table.intern(known);
        }
        table
    }

    /// Intern a string, returning the existing name if already present.
    pub fn intern(&mut self, text: &str) -> Name {
        if let Some(index) = self.entries.get_index_of(text) {
            return Name(index as u32);
        }
        let (index, _) = self.entries.insert_full(text.into());
        self.hashes.push(crc32fast::hash(text.as_bytes()));
        Name(index as u32)
    }

    /// Look a string up without interning it.
    pub fn find(&self, text: &str) -> Option<Name> {
        self.entries.get_index_of(text).map(|i| Name(i as u32))
    }

    /// The string behind a name.
    pub fn try_resolve(&self, name: Name) -> Result<&str, TypeError> {
        self.entries
            .get_index(name.0 as usize)
            .map(|s| &**s)
            .ok_or(TypeError::UnknownName(name.0))
    }

    /// The string behind a name, or `"<unknown>"` for a foreign handle.
    pub fn resolve(&self, name: Name) -> &str {
        self.try_resolve(name).unwrap_or("<unknown>")
    }

    /// Stable hash of the name's string.
    pub fn hash(&self, name: Name) -> u32 {
        self.hashes.get(name.0 as usize).copied().unwrap_or(0)
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: `None` is interned at construction.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NameTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameTable")
            .field("len", &self.entries.len())
            .finish()
    }
}
