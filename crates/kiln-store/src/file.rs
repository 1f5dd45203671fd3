use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use kiln_types::version::VER_PACKAGE_LATEST;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::stream::ByteStream;
use crate::traits::{validate_package_name, PackageStore};

/// File extension used for package files.
pub const PACKAGE_EXTENSION: &str = "lpk";

/// [`ByteStream`] over a file on disk.
pub struct FileStream {
    file: File,
    path: PathBuf,
    version: u32,
}

impl FileStream {
    /// Open an existing file for reading.
    pub fn open_read(path: &Path) -> StoreResult<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            version: VER_PACKAGE_LATEST,
        })
    }

    /// Open a file for writing, creating parent directories as needed.
    ///
    /// With `append` the existing contents are kept and the stream starts at
    /// the end; otherwise the file is truncated.
    pub fn open_write(path: &Path, append: bool) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(!append)
            .open(path)?;
        if append {
            file.seek(SeekFrom::End(0))?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            version: VER_PACKAGE_LATEST,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> StoreResult<usize> {
        Ok(self.file.write(buf)?)
    }

    fn seek(&mut self, pos: u64) -> StoreResult<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn tell(&mut self) -> StoreResult<u64> {
        Ok(self.file.stream_position()?)
    }

    fn size(&mut self) -> StoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream").field("path", &self.path).finish()
    }
}

/// Package store backed by a directory tree.
///
/// On construction the whole tree under `root` is scanned and every
/// `*.lpk` file is indexed by its stem, so packages can live in any
/// subdirectory. New packages are written directly under `root`.
pub struct DirectoryPackageStore {
    root: PathBuf,
    index: RwLock<HashMap<String, PathBuf>>,
}

impl DirectoryPackageStore {
    /// Open (and create if missing) a store rooted at `root`.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
            index: RwLock::new(HashMap::new()),
        };
        store.rescan()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the name index from disk.
    pub fn rescan(&self) -> StoreResult<usize> {
        let mut found = HashMap::new();
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().map(|e| e != PACKAGE_EXTENSION).unwrap_or(true)
            {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(existing) = found.get(stem) {
                warn!("duplicate package {stem}: keeping {:?}, ignoring {:?}", existing, path);
                continue;
            }
            found.insert(stem.to_string(), path.to_path_buf());
        }
        let count = found.len();
        debug!(root = ?self.root, count, "package directory scanned");
        *self.index.write().expect("lock poisoned") = found;
        Ok(count)
    }

    /// On-disk location of a package, if known.
    pub fn path_of(&self, package: &str) -> Option<PathBuf> {
        if let Some(path) = self.index.read().expect("lock poisoned").get(package) {
            return Some(path.clone());
        }
        let candidate = self.default_path(package);
        candidate.is_file().then_some(candidate)
    }

    fn default_path(&self, package: &str) -> PathBuf {
        self.root.join(format!("{package}.{PACKAGE_EXTENSION}"))
    }
}

impl PackageStore for DirectoryPackageStore {
    fn open_read(&self, package: &str) -> StoreResult<Option<Box<dyn ByteStream>>> {
        match self.path_of(package) {
            Some(path) => Ok(Some(Box::new(FileStream::open_read(&path)?))),
            None => Ok(None),
        }
    }

    fn open_write(&self, package: &str) -> StoreResult<Box<dyn ByteStream>> {
        validate_package_name(package)?;
        let path = self
            .path_of(package)
            .unwrap_or_else(|| self.default_path(package));
        let stream = FileStream::open_write(&path, false)?;
        self.index
            .write()
            .expect("lock poisoned")
            .insert(package.to_string(), path);
        Ok(Box::new(stream))
    }

    fn exists(&self, package: &str) -> StoreResult<bool> {
        Ok(self.path_of(package).is_some())
    }

    fn delete(&self, package: &str) -> StoreResult<bool> {
        let Some(path) = self.path_of(package) else {
            return Ok(false);
        };
        fs::remove_file(&path)?;
        self.index.write().expect("lock poisoned").remove(package);
        Ok(true)
    }

    fn list(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .index
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}

impl std::fmt::Debug for DirectoryPackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryPackageStore")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamExt;

    #[test]
    fn file_stream_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        {
            let mut w = FileStream::open_write(&path, false).unwrap();
            w.write_u32(7).unwrap();
            w.write_string("abc").unwrap();
            w.flush().unwrap();
        }
        let mut r = FileStream::open_read(&path).unwrap();
        assert_eq!(r.size().unwrap(), 4 + 4 + 3);
        assert_eq!(r.read_u32().unwrap(), 7);
        assert_eq!(r.read_string().unwrap(), "abc");
        assert!(r.at_end().unwrap());
    }

    #[test]
    fn append_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.bin");
        FileStream::open_write(&path, false).unwrap().write_u8(1).unwrap();
        let mut w = FileStream::open_write(&path, true).unwrap();
        assert_eq!(w.tell().unwrap(), 1);
        w.write_u8(2).unwrap();
        drop(w);
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2]);
    }

    #[test]
    fn truncate_drops_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        FileStream::open_write(&path, false).unwrap().write_u32(1).unwrap();
        FileStream::open_write(&path, false).unwrap().write_u8(5).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![5]);
    }

    #[test]
    fn directory_store_finds_nested_packages() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Content").join("Maps");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("Arena.lpk"), [1u8, 2, 3]).unwrap();
        fs::write(nested.join("notes.txt"), b"ignored").unwrap();

        let store = DirectoryPackageStore::open(dir.path()).unwrap();
        assert_eq!(store.list().unwrap(), vec!["Arena".to_string()]);
        let mut r = store.open_read("Arena").unwrap().unwrap();
        assert_eq!(r.read_u8().unwrap(), 1);
        assert!(store.open_read("notes").unwrap().is_none());
    }

    #[test]
    fn directory_store_write_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryPackageStore::open(dir.path()).unwrap();
        {
            let mut w = store.open_write("Hero").unwrap();
            w.write_u32(99).unwrap();
            w.flush().unwrap();
        }
        assert!(dir.path().join("Hero.lpk").is_file());
        assert!(store.exists("Hero").unwrap());
        assert!(store.delete("Hero").unwrap());
        assert!(!store.exists("Hero").unwrap());
        assert!(!store.delete("Hero").unwrap());
    }

    #[test]
    fn rescan_picks_up_external_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryPackageStore::open(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("Late.lpk"), [0u8]).unwrap();
        assert!(!store.exists("Late").unwrap());
        assert_eq!(store.rescan().unwrap(), 1);
        assert!(store.exists("Late").unwrap());
    }
}
