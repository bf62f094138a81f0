//! In-memory [`VfsPath`] backend used to exercise the generic algorithms
//! (walk, streaming copy, cross-backend rules) against a store that has no
//! native representation.
//!
//! All entries live in one `BTreeMap` keyed by absolute normalized paths, so
//! iteration order is the natural path order. Relative paths resolve against `/`.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::core::{
    Attributes, Depth, FileKind, FileTimes, FileVisitor, FsError, InputStream, OpenMode,
    OutputStream, PathRef, RandomAccess, Result, VfsPath, transfer, utils, walk,
};
use crate::vfs::entry::Entry;

/// Handle to a shared in-memory tree. Clones see the same entries.
#[derive(Clone)]
pub struct MemFs {
    entries: Arc<Mutex<BTreeMap<PathBuf, Entry>>>, // absolute normalized paths
}

impl fmt::Debug for MemFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MemFs")
    }
}

impl MemFs {
    /// Creates a tree holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(PathBuf::from("/"), Entry::new(FileKind::Directory));
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn path(&self, path: &str) -> PathRef {
        Arc::new(MemPath {
            path: PathBuf::from(path),
            fs: self.clone(),
        })
    }

    /// Creates directory and all it parents (if needed).
    pub fn mkdir<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let inner = Self::to_inner(path);
        let mut entries = self.entries.lock();
        if entries.contains_key(&inner) {
            return Err(FsError::AlreadyExists(inner));
        }
        Self::mkdir_all(&mut entries, &inner)
    }

    /// Creates a file with `content`, creating missing parents.
    pub fn mkfile<P: AsRef<Path>>(&self, path: P, content: &[u8]) -> Result<()> {
        let inner = Self::to_inner(path);
        let mut entries = self.entries.lock();
        if entries.contains_key(&inner) {
            return Err(FsError::AlreadyExists(inner));
        }
        if let Some(parent) = inner.parent() {
            Self::mkdir_all(&mut entries, parent)?;
        }
        entries.insert(inner, Entry::file(content));
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(&self, path: P) -> Result<Vec<u8>> {
        let inner = Self::to_inner(path);
        let entries = self.entries.lock();
        match entries.get(&inner) {
            Some(entry) if entry.is_dir() => Err(FsError::IsADirectory(inner)),
            Some(entry) => Ok(entry.content().to_vec()),
            None => Err(FsError::NotFound(inner)),
        }
    }

    fn to_inner<P: AsRef<Path>>(path: P) -> PathBuf {
        utils::normalize(Path::new("/").join(path))
    }

    fn mkdir_all(entries: &mut BTreeMap<PathBuf, Entry>, inner: &Path) -> Result<()> {
        // Looking for the first existing parent
        let mut existed_parent = inner.to_path_buf();
        while !entries.contains_key(&existed_parent) {
            match existed_parent.parent() {
                Some(parent) => existed_parent = parent.to_path_buf(),
                None => break,
            }
        }
        if entries.get(&existed_parent).is_some_and(|e| !e.is_dir()) {
            return Err(FsError::NotADirectory(existed_parent));
        }

        // Create from the closest existing parent to the target path
        let mut built = existed_parent.clone();
        let rest = inner
            .strip_prefix(&existed_parent)
            .map_err(|_| FsError::InvalidPath(inner.display().to_string()))?;
        for component in rest.components() {
            built.push(component);
            entries
                .entry(built.clone())
                .or_insert_with(|| Entry::new(FileKind::Directory));
        }
        Ok(())
    }

    fn same_store(&self, other: &MemFs) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

/// A path inside a [`MemFs`].
#[derive(Clone)]
pub struct MemPath {
    path: PathBuf,
    fs: MemFs,
}

impl fmt::Debug for MemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemPath").field(&self.path).finish()
    }
}

impl MemPath {
    fn derive<P: Into<PathBuf>>(&self, path: P) -> PathRef {
        Arc::new(MemPath {
            path: path.into(),
            fs: self.fs.clone(),
        })
    }

    fn inner(&self) -> PathBuf {
        MemFs::to_inner(&self.path)
    }

    fn same_backend<'a>(&self, other: &'a dyn VfsPath) -> Option<&'a MemPath> {
        other
            .as_any()
            .downcast_ref::<MemPath>()
            .filter(|o| o.fs.same_store(&self.fs))
    }

    fn cross(&self, other: &dyn VfsPath) -> FsError {
        FsError::CrossBackend(format!("{} and {}", self.path.display(), other.path()))
    }

    fn require_parent_dir(entries: &BTreeMap<PathBuf, Entry>, inner: &Path) -> Result<()> {
        match inner.parent() {
            Some(parent) if !entries.get(parent).is_some_and(Entry::is_dir) => {
                Err(FsError::NotADirectory(parent.to_path_buf()))
            }
            _ => Ok(()),
        }
    }
}

impl VfsPath for MemPath {
    fn name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.path.to_string_lossy().into_owned(),
        }
    }

    fn is_absolute(&self) -> bool {
        self.path.has_root()
    }

    fn absolute_path(&self, base: &dyn VfsPath) -> Result<PathRef> {
        if self.is_absolute() {
            return Ok(Arc::new(self.clone()));
        }
        let base = self.same_backend(base).ok_or_else(|| self.cross(base))?;
        Ok(self.derive(base.path.join(&self.path)))
    }

    fn real_path(&self) -> Result<PathRef> {
        let inner = self.inner();
        if !self.fs.entries.lock().contains_key(&inner) {
            return Err(FsError::NotFound(inner));
        }
        Ok(self.derive(inner))
    }

    fn canon(&self) -> Result<PathRef> {
        Ok(self.derive(utils::normalize(&self.path)))
    }

    fn child(&self, name: &str) -> Result<PathRef> {
        utils::validate_segment(name)?;
        Ok(self.derive(self.path.join(name)))
    }

    fn child_path(&self, other: &PathRef) -> Result<PathRef> {
        if other.is_absolute() {
            return Ok(Arc::clone(other));
        }
        let other_mem = self
            .same_backend(other.as_ref())
            .ok_or_else(|| self.cross(other.as_ref()))?;
        Ok(self.derive(self.path.join(&other_mem.path)))
    }

    fn relative(&self, other: &dyn VfsPath) -> Result<PathRef> {
        let other = self.same_backend(other).ok_or_else(|| self.cross(other))?;
        Ok(self.derive(utils::relativize(&self.path, &other.path)?))
    }

    fn link(&self, _to: &dyn VfsPath) -> Result<()> {
        Err(FsError::Unsupported("links in memory".into()))
    }

    fn symlink(&self, _to: &dyn VfsPath) -> Result<()> {
        Err(FsError::Unsupported("links in memory".into()))
    }

    fn attributes(&self) -> Result<Attributes> {
        let inner = self.inner();
        let entries = self.fs.entries.lock();
        entries
            .get(&inner)
            .map(Entry::attributes)
            .ok_or(FsError::NotFound(inner))
    }

    fn link_attributes(&self) -> Result<Attributes> {
        self.attributes()
    }

    fn set_file_times(&self, times: FileTimes) -> Result<()> {
        let inner = self.inner();
        let mut entries = self.fs.entries.lock();
        let entry = entries.get_mut(&inner).ok_or(FsError::NotFound(inner))?;
        if let Some(modified) = times.modified {
            entry.set_modified(modified);
        }
        Ok(())
    }

    fn path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    fn parent(&self) -> Option<PathRef> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Some(self.derive(parent)),
            _ => None,
        }
    }

    fn copy_file(&self, target: &dyn VfsPath) -> Result<()> {
        transfer::stream_copy(self, target, transfer::DEFAULT_BUFFER_SIZE)?;
        Ok(())
    }

    fn move_file(&self, target: &dyn VfsPath) -> Result<()> {
        transfer::stream_move(self, target, transfer::DEFAULT_BUFFER_SIZE)?;
        Ok(())
    }

    fn move_to(&self, target: &dyn VfsPath) -> Result<()> {
        let target = self.same_backend(target).ok_or_else(|| self.cross(target))?;
        let (from, to) = (self.inner(), target.inner());
        if from == to {
            return Ok(());
        }
        let mut entries = self.fs.entries.lock();
        if !entries.contains_key(&from) {
            return Err(FsError::NotFound(from));
        }
        if let Some(existing) = entries.get(&to) {
            let has_children = entries.keys().any(|k| k != &to && k.starts_with(&to));
            if existing.is_dir() && has_children {
                return Err(FsError::DirectoryNotEmpty(to));
            }
        }
        MemPath::require_parent_dir(&entries, &to)?;

        let moved: Vec<PathBuf> = entries
            .keys()
            .filter(|k| k.starts_with(&from))
            .cloned()
            .collect();
        entries.remove(&to);
        for old in moved {
            if let (Some(entry), Ok(rest)) = (entries.remove(&old), old.strip_prefix(&from)) {
                entries.insert(to.join(rest), entry);
            }
        }
        Ok(())
    }

    fn exists(&self) -> bool {
        self.fs.entries.lock().contains_key(&self.inner())
    }

    fn is_dir(&self) -> bool {
        self.fs.entries.lock().get(&self.inner()).is_some_and(Entry::is_dir)
    }

    fn is_file(&self) -> bool {
        self.fs.entries.lock().get(&self.inner()).is_some_and(Entry::is_file)
    }

    fn is_link(&self) -> bool {
        false
    }

    fn list(&self) -> Result<Vec<PathRef>> {
        let inner = self.inner();
        let entries = self.fs.entries.lock();
        if !entries.get(&inner).is_some_and(Entry::is_dir) {
            return Err(FsError::NotADirectory(inner));
        }
        let depth = inner.components().count() + 1;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(&inner) && k.components().count() == depth)
            .filter_map(|k| k.file_name())
            .map(|name| self.derive(self.path.join(name)))
            .collect())
    }

    fn walk_file_tree(
        &self,
        depth: Depth,
        follow_links: bool,
        visitor: &mut dyn FileVisitor,
    ) -> Result<()> {
        let start: PathRef = Arc::new(self.clone());
        walk::walk_file_tree(&start, depth, follow_links, visitor)
    }

    fn create_new_file(&self) -> Result<()> {
        let inner = self.inner();
        let mut entries = self.fs.entries.lock();
        if entries.contains_key(&inner) {
            return Err(FsError::AlreadyExists(inner));
        }
        MemPath::require_parent_dir(&entries, &inner)?;
        entries.insert(inner, Entry::new(FileKind::File));
        Ok(())
    }

    fn mkdir(&self) -> Result<()> {
        let inner = self.inner();
        let mut entries = self.fs.entries.lock();
        if entries.contains_key(&inner) {
            return Err(FsError::AlreadyExists(inner));
        }
        MemPath::require_parent_dir(&entries, &inner)?;
        entries.insert(inner, Entry::new(FileKind::Directory));
        Ok(())
    }

    fn mkdirs(&self) -> Result<()> {
        let inner = self.inner();
        let mut entries = self.fs.entries.lock();
        match entries.get(&inner) {
            Some(entry) if entry.is_dir() => Ok(()),
            Some(_) => Err(FsError::NotADirectory(inner)),
            None => MemFs::mkdir_all(&mut entries, &inner),
        }
    }

    fn to_system_path(&self) -> Option<PathBuf> {
        None
    }

    fn open(&self, mode: OpenMode) -> Result<Box<dyn RandomAccess>> {
        let inner = self.inner();
        {
            let mut entries = self.fs.entries.lock();
            match entries.get_mut(&inner) {
                Some(entry) if entry.is_dir() => return Err(FsError::IsADirectory(inner)),
                Some(entry) if mode == OpenMode::Write => entry.content_mut().clear(),
                Some(_) => {}
                None if mode.is_writable() => {
                    MemPath::require_parent_dir(&entries, &inner)?;
                    entries.insert(inner.clone(), Entry::new(FileKind::File));
                }
                None => return Err(FsError::NotFound(inner)),
            }
        }
        Ok(Box::new(MemRandomAccess {
            path: Arc::new(self.clone()),
            fs: self.fs.clone(),
            key: inner,
            position: 0,
            writable: mode.is_writable(),
        }))
    }

    fn open_input(&self) -> Result<InputStream> {
        let content = self.fs.read(self.inner())?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn open_output(&self, append: bool) -> Result<OutputStream> {
        let inner = self.inner();
        let mut entries = self.fs.entries.lock();
        match entries.get_mut(&inner) {
            Some(entry) if entry.is_dir() => return Err(FsError::IsADirectory(inner)),
            Some(entry) if !append => entry.content_mut().clear(),
            Some(_) => {}
            None => {
                if let Some(parent) = inner.parent() {
                    MemFs::mkdir_all(&mut entries, parent)?;
                }
                entries.insert(inner.clone(), Entry::new(FileKind::File));
            }
        }
        Ok(Box::new(MemWriter {
            fs: self.fs.clone(),
            key: inner,
        }))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.attributes()?.size)
    }

    /// Directories must be empty.
    fn delete(&self) -> Result<()> {
        let inner = self.inner();
        if utils::is_root(&inner) {
            return Err(FsError::InvalidPath("the root cannot be removed".into()));
        }
        let mut entries = self.fs.entries.lock();
        if !entries.contains_key(&inner) {
            return Err(FsError::NotFound(inner));
        }
        if entries.keys().any(|k| k != &inner && k.starts_with(&inner)) {
            return Err(FsError::DirectoryNotEmpty(inner));
        }
        entries.remove(&inner);
        Ok(())
    }

    fn delete_on_exit(&self) {
        trace!(path = %self.path.display(), "Memory entries vanish with the store");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn VfsPath) -> bool {
        self.same_backend(other)
            .is_some_and(|other| other.path == self.path)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<MemPath>().hash(&mut state);
        self.path.hash(&mut state);
    }
}

struct MemWriter {
    fs: MemFs,
    key: PathBuf,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut entries = self.fs.entries.lock();
        let entry = entries
            .get_mut(&self.key)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        entry.content_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct MemRandomAccess {
    path: PathRef,
    fs: MemFs,
    key: PathBuf,
    position: u64,
    writable: bool,
}

impl MemRandomAccess {
    fn with_content<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Result<R> {
        let mut entries = self.fs.entries.lock();
        let entry = entries
            .get_mut(&self.key)
            .ok_or_else(|| FsError::NotFound(self.key.clone()))?;
        Ok(f(entry.content_mut()))
    }

    fn require_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(FsError::Unsupported("write on a read-only handle".into()));
        }
        Ok(())
    }
}

impl RandomAccess for MemRandomAccess {
    fn path(&self) -> &PathRef {
        &self.path
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.position)
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.position = position;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        self.with_content(|c| c.len() as u64)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok(self.read(&mut byte)?.map(|_| byte[0]))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let position = self.position as usize;
        let n = self.with_content(|c| {
            if position >= c.len() {
                return None;
            }
            let n = buf.len().min(c.len() - position);
            buf[..n].copy_from_slice(&c[position..position + n]);
            Some(n)
        })?;
        if let Some(n) = n {
            self.position += n as u64;
        }
        Ok(n)
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.require_writable()?;
        let position = self.position as usize;
        self.with_content(|c| {
            let end = position + buf.len();
            if c.len() < end {
                c.resize(end, 0);
            }
            c[position..end].copy_from_slice(buf);
        })?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        self.require_writable()?;
        self.with_content(|c| c.resize(size as usize, 0))?;
        self.position = self.position.min(size);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_file(&self) -> Option<&std::fs::File> {
        None
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_is_sorted_and_shallow() -> Result<()> {
        let fs = MemFs::new();
        fs.mkfile("/d/b.txt", b"")?;
        fs.mkfile("/d/a.txt", b"")?;
        fs.mkfile("/d/c/deep.txt", b"")?;

        let names: Vec<String> = fs.path("/d").list()?.iter().map(|p| p.name()).collect();

        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
        Ok(())
    }

    #[test]
    fn test_paths_of_distinct_stores_differ() {
        let first = MemFs::new();
        let second = MemFs::new();
        assert!(first.path("/a") == first.path("/a"));
        assert!(first.path("/a") != second.path("/a"));
    }

    #[test]
    fn test_random_access_grows_on_write_past_end() -> Result<()> {
        let fs = MemFs::new();
        let mut handle = fs.path("/f").open(OpenMode::ReadWrite)?;
        handle.set_position(3)?;
        handle.write(b"xy")?;

        assert_eq!(handle.size()?, 5);
        assert_eq!(fs.read("/f")?, vec![0, 0, 0, b'x', b'y']);
        assert!(handle.as_file().is_none());
        Ok(())
    }

    #[test]
    fn test_delete_requires_empty_directory() -> Result<()> {
        let fs = MemFs::new();
        fs.mkfile("/d/f", b"")?;
        assert!(matches!(fs.path("/d").delete(), Err(FsError::DirectoryNotEmpty(_))));
        fs.path("/d/f").delete()?;
        fs.path("/d").delete()?;
        assert!(!fs.path("/d").exists());
        Ok(())
    }
}
