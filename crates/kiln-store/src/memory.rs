use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kiln_types::version::VER_PACKAGE_LATEST;

use crate::error::StoreResult;
use crate::stream::ByteStream;
use crate::traits::{validate_package_name, PackageStore};

/// Growable in-memory byte stream.
///
/// The buffer is shared behind an `Arc<RwLock<_>>` so a store can hand out a
/// writer whose bytes land directly in the store's map.
#[derive(Clone)]
pub struct MemoryStream {
    data: Arc<RwLock<Vec<u8>>>,
    pos: u64,
    version: u32,
}

impl MemoryStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Create a stream positioned at the start of `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::shared(Arc::new(RwLock::new(bytes)))
    }

    /// Create a stream over an existing shared buffer.
    pub fn shared(data: Arc<RwLock<Vec<u8>>>) -> Self {
        Self {
            data,
            pos: 0,
            version: VER_PACKAGE_LATEST,
        }
    }

    /// Copy of the current contents.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.read().expect("lock poisoned").clone()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        let data = self.data.read().expect("lock poisoned");
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> StoreResult<usize> {
        let mut data = self.data.write().expect("lock poisoned");
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        self.pos = pos;
        Ok(())
    }

    fn tell(&mut self) -> StoreResult<u64> {
        Ok(self.pos)
    }

    fn size(&mut self) -> StoreResult<u64> {
        Ok(self.data.read().expect("lock poisoned").len() as u64)
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStream")
            .field("len", &self.data.read().expect("lock poisoned").len())
            .field("pos", &self.pos)
            .finish()
    }
}

/// In-memory, HashMap-based package store.
///
/// Intended for tests and embedding. Readers get a snapshot of the package
/// bytes, so overwriting a package never disturbs a linker that is still
/// reading the previous version.
pub struct InMemoryPackageStore {
    packages: RwLock<HashMap<String, Arc<RwLock<Vec<u8>>>>>,
}

impl InMemoryPackageStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            packages: RwLock::new(HashMap::new()),
        }
    }

    /// Number of packages currently stored.
    pub fn len(&self) -> usize {
        self.packages.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.packages.read().expect("lock poisoned").is_empty()
    }

    /// Raw bytes of a package.
    pub fn bytes(&self, package: &str) -> Option<Vec<u8>> {
        let map = self.packages.read().expect("lock poisoned");
        map.get(package)
            .map(|data| data.read().expect("lock poisoned").clone())
    }

    /// Replace a package's bytes wholesale.
    pub fn insert_bytes(&self, package: &str, bytes: Vec<u8>) -> StoreResult<()> {
        validate_package_name(package)?;
        let mut map = self.packages.write().expect("lock poisoned");
        map.insert(package.to_string(), Arc::new(RwLock::new(bytes)));
        Ok(())
    }
}

impl Default for InMemoryPackageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageStore for InMemoryPackageStore {
    fn open_read(&self, package: &str) -> StoreResult<Option<Box<dyn ByteStream>>> {
        Ok(self
            .bytes(package)
            .map(|bytes| Box::new(MemoryStream::from_bytes(bytes)) as Box<dyn ByteStream>))
    }

    fn open_write(&self, package: &str) -> StoreResult<Box<dyn ByteStream>> {
        validate_package_name(package)?;
        let data = Arc::new(RwLock::new(Vec::new()));
        let mut map = self.packages.write().expect("lock poisoned");
        map.insert(package.to_string(), Arc::clone(&data));
        Ok(Box::new(MemoryStream::shared(data)))
    }

    fn exists(&self, package: &str) -> StoreResult<bool> {
        let map = self.packages.read().expect("lock poisoned");
        Ok(map.contains_key(package))
    }

    fn delete(&self, package: &str) -> StoreResult<bool> {
        let mut map = self.packages.write().expect("lock poisoned");
        Ok(map.remove(package).is_some())
    }

    fn list(&self) -> StoreResult<Vec<String>> {
        let map = self.packages.read().expect("lock poisoned");
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl std::fmt::Debug for InMemoryPackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPackageStore")
            .field("package_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamExt;

    #[test]
    fn write_past_end_zero_fills() {
        let mut s = MemoryStream::new();
        s.seek(4).unwrap();
        s.write_all(&[9]).unwrap();
        assert_eq!(s.to_bytes(), vec![0, 0, 0, 0, 9]);
    }

    #[test]
    fn overwrite_in_place() {
        let mut s = MemoryStream::from_bytes(vec![1, 2, 3, 4]);
        s.seek(1).unwrap();
        s.write_all(&[7, 7]).unwrap();
        assert_eq!(s.to_bytes(), vec![1, 7, 7, 4]);
        assert_eq!(s.tell().unwrap(), 3);
    }

    #[test]
    fn read_past_end_returns_zero() {
        let mut s = MemoryStream::from_bytes(vec![1]);
        s.seek(10).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn store_write_then_read() {
        let store = InMemoryPackageStore::new();
        {
            let mut w = store.open_write("Hero").unwrap();
            w.write_u32(42).unwrap();
        }
        assert!(store.exists("Hero").unwrap());
        let mut r = store.open_read("Hero").unwrap().unwrap();
        assert_eq!(r.read_u32().unwrap(), 42);
    }

    #[test]
    fn readers_see_a_snapshot() {
        let store = InMemoryPackageStore::new();
        store.insert_bytes("Map", vec![1, 2, 3]).unwrap();
        let mut reader = store.open_read("Map").unwrap().unwrap();

        let mut w = store.open_write("Map").unwrap();
        w.write_all(&[9, 9, 9, 9]).unwrap();

        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(store.bytes("Map").unwrap(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn missing_package_reads_none() {
        let store = InMemoryPackageStore::new();
        assert!(store.open_read("Nope").unwrap().is_none());
        assert!(!store.delete("Nope").unwrap());
    }

    #[test]
    fn list_is_sorted() {
        let store = InMemoryPackageStore::new();
        store.insert_bytes("b", vec![]).unwrap();
        store.insert_bytes("a", vec![]).unwrap();
        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn invalid_names_rejected() {
        let store = InMemoryPackageStore::new();
        assert!(store.open_write("").is_err());
        assert!(store.insert_bytes("a/b", vec![]).is_err());
    }
}
