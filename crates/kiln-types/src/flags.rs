//! Bit sets carried by objects, packages, properties and classes.

use bitflags::bitflags;

bitflags! {
    /// Per-object state and persistence flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        /// Registered by native code rather than loaded.
        const NATIVE = 1 << 0;
        /// Never collected.
        const ROOT_SET = 1 << 1;
        const BEGIN_DESTROYED = 1 << 2;
        const FINISH_DESTROYED = 1 << 3;
        /// Set by the collector on objects not reached this pass.
        const UNREACHABLE = 1 << 4;
        /// Explicitly doomed; references to it are ignored.
        const PENDING_KILL = 1 << 5;
        /// Tagged as an import by the save pass.
        const TAG_IMP = 1 << 6;
        /// Tagged as an export by the save pass.
        const TAG_EXP = 1 << 7;
        /// Never saved.
        const TRANSIENT = 1 << 8;
        const NEED_LOAD = 1 << 9;
        const NEED_POST_LOAD = 1 << 10;
        /// Visible to imports from other packages.
        const PUBLIC = 1 << 11;
        const WAS_LOADED = 1 << 12;
        /// Lives in the low slot range and is never scanned by the collector.
        const DISREGARD_FOR_GC = 1 << 13;
        /// Kept alive by the keep-flag mask even without references.
        const STANDALONE = 1 << 14;
    }
}

impl ObjectFlags {
    /// Flags persisted in an export entry.
    pub const MASK_LOAD: Self = Self::PUBLIC.union(Self::NATIVE).union(Self::STANDALONE);
    /// Flags that always keep an object alive.
    pub const MASK_KEEP: Self = Self::NATIVE.union(Self::ROOT_SET);
}

bitflags! {
    /// Package-level flags, persisted in the summary.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PackageFlags: u32 {
        /// Created in this session and never saved.
        const NEWLY_CREATED = 1 << 0;
        /// Populated by native registration, has no file.
        const COMPILED_IN = 1 << 1;
        /// Editor-only properties were stripped on save.
        const FILTER_EDITOR_ONLY = 1 << 2;
        const EDITOR_ONLY = 1 << 3;
        /// Properties stored in binary (untagged) form.
        const COOKED = 1 << 4;
        const STORE_COMPRESSED = 1 << 5;
    }
}

impl PackageFlags {
    /// Flags stripped before writing a summary.
    pub const MASK_TRANSIENT: Self = Self::NEWLY_CREATED;
    /// Packages that exist only in memory.
    pub const MASK_IN_MEMORY_ONLY: Self = Self::NEWLY_CREATED.union(Self::COMPILED_IN);
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        const CONST = 1 << 0;
        const EDITOR_ONLY = 1 << 1;
        const EDIT = 1 << 2;
        const EDIT_FIXED_SIZE = 1 << 3;
        const EDIT_CONST = 1 << 4;
        /// Read on load, never written.
        const DEPRECATED = 1 << 5;
        /// Never read or written.
        const TRANSIENT = 1 << 6;
        const SAVE_GAME = 1 << 7;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u32 {
        const ABSTRACT = 1 << 0;
        const NATIVE = 1 << 1;
        /// Instances are never saved.
        const TRANSIENT = 1 << 2;
        /// Serial-size mismatches are tolerated.
        const DEPRECATED = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_flag_bits_are_stable() {
        assert_eq!(ObjectFlags::NATIVE.bits(), 1);
        assert_eq!(ObjectFlags::ROOT_SET.bits(), 2);
        assert_eq!(ObjectFlags::PUBLIC.bits(), 1 << 11);
        assert_eq!(ObjectFlags::DISREGARD_FOR_GC.bits(), 1 << 13);
    }

    #[test]
    fn masks() {
        assert!(ObjectFlags::MASK_KEEP.contains(ObjectFlags::ROOT_SET));
        assert!(ObjectFlags::MASK_LOAD.contains(ObjectFlags::PUBLIC));
        assert!(!ObjectFlags::MASK_LOAD.contains(ObjectFlags::NEED_LOAD));
        assert!(PackageFlags::MASK_IN_MEMORY_ONLY.contains(PackageFlags::COMPILED_IN));
        assert!(!PackageFlags::MASK_TRANSIENT.contains(PackageFlags::COOKED));
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let flags = PackageFlags::from_bits_truncate(0xFFFF_FFFF);
        assert_eq!(flags, PackageFlags::all());
    }
}
