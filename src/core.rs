use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

mod error;
pub mod transfer;
pub mod utils;
pub mod walk;

pub use error::{FsError, FsErrorKind, Result};

/// Shared handle to a path of any backend.
pub type PathRef = Arc<dyn VfsPath>;

/// Stream-style reader returned by [`VfsPath::open_input`].
pub type InputStream = Box<dyn Read + Send>;

/// Stream-style writer returned by [`VfsPath::open_output`].
pub type OutputStream = Box<dyn Write + Send>;

/// Kind of the entry a path refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// Basic metadata of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub kind: FileKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl Attributes {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// Times to apply with [`VfsPath::set_file_times`]. `None` leaves a time untouched.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl FileTimes {
    pub fn is_noop(&self) -> bool {
        self.modified.is_none() && self.accessed.is_none() && self.created.is_none()
    }
}

/// How [`VfsPath::open`] opens a file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// `"r"`: read only, the file must exist.
    Read,
    /// `"w"`: write only, created if absent, truncated otherwise.
    Write,
    /// `"rw"`: read and write, created if absent, never truncated.
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

impl FromStr for OpenMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            "rw" => Ok(OpenMode::ReadWrite),
            other => Err(FsError::InvalidInput(format!("unknown open mode {other:?}"))),
        }
    }
}

/// Maximum traversal depth for [`VfsPath::walk_file_tree`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Limited(usize),
    Unbounded,
}

impl Depth {
    /// Returns true if a directory found at `level` may be entered.
    pub fn allows(self, level: usize) -> bool {
        match self {
            Depth::Limited(max) => level < max,
            Depth::Unbounded => true,
        }
    }
}

impl From<usize> for Depth {
    fn from(depth: usize) -> Self {
        Depth::Limited(depth)
    }
}

/// Signal returned by every [`FileVisitor`] callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// From `pre_visit_directory`: do not enter the directory.
    /// From `visit_file` or `post_visit_directory`: skip the remaining siblings.
    Skip,
    /// Stop the whole walk.
    Terminate,
}

/// Callbacks of a file tree walk.
pub trait FileVisitor {
    /// Called before a directory is entered.
    fn pre_visit_directory(&mut self, dir: &PathRef) -> Result<Visit>;

    /// Called for files, and for directories that are not entered because the
    /// maximum depth was reached. A directory is never both entered and visited.
    fn visit_file(&mut self, file: &PathRef) -> Result<Visit>;

    /// Called after all children of an entered directory were processed.
    fn post_visit_directory(&mut self, dir: &PathRef) -> Result<Visit>;
}

/// A location in some backend's namespace.
///
/// Paths are immutable values; every navigation returns a new [`PathRef`].
/// Two paths are equal iff they belong to the same backend and have the
/// same normalized identity. Equality never consults the work directory or
/// the file system.
pub trait VfsPath: fmt::Debug + Send + Sync + Any {
    /// Last segment, or the root's own label for a root path.
    fn name(&self) -> String;

    fn is_absolute(&self) -> bool;

    /// Returns an absolute path, resolving a relative one against `base`.
    fn absolute_path(&self, base: &dyn VfsPath) -> Result<PathRef>;

    /// Resolves every symbolic link. Backends without links return an equal path.
    fn real_path(&self) -> Result<PathRef>;

    /// Returns a path without `.` and `..` segments.
    fn canon(&self) -> Result<PathRef>;

    /// Appends a single segment.
    fn child(&self, name: &str) -> Result<PathRef>;

    /// Resolves `other` in the context of this path.
    ///
    /// NOTE: an absolute `other` is returned unchanged; it replaces this path
    /// entirely instead of being appended. A relative `other` must belong to
    /// the same backend, joining across backends fails with
    /// [`FsError::CrossBackend`].
    fn child_path(&self, other: &PathRef) -> Result<PathRef>;

    /// Returns the path that, appended to this one, yields `other`.
    fn relative(&self, other: &dyn VfsPath) -> Result<PathRef>;

    /// Creates a hard link at this location pointing to `to`.
    fn link(&self, to: &dyn VfsPath) -> Result<()>;

    /// Creates a symbolic link at this location pointing to `to`.
    fn symlink(&self, to: &dyn VfsPath) -> Result<()>;

    fn attributes(&self) -> Result<Attributes>;

    /// Like [`VfsPath::attributes`] but does not follow a terminal symlink.
    fn link_attributes(&self) -> Result<Attributes>;

    /// Sets the given times. Fields the backend cannot set are ignored.
    fn set_file_times(&self, times: FileTimes) -> Result<()>;

    /// Backend-relative string form.
    fn path(&self) -> String;

    /// Enclosing directory, `None` for a root.
    fn parent(&self) -> Option<PathRef>;

    /// Copies this file to `target`, replacing an existing file.
    fn copy_file(&self, target: &dyn VfsPath) -> Result<()>;

    /// Moves this file to `target`, replacing an existing file.
    fn move_file(&self, target: &dyn VfsPath) -> Result<()>;

    /// Moves this file or directory to `target`. An existing target directory must be empty.
    fn move_to(&self, target: &dyn VfsPath) -> Result<()>;

    fn exists(&self) -> bool;

    fn is_dir(&self) -> bool;

    fn is_file(&self) -> bool;

    fn is_link(&self) -> bool;

    /// Immediate children of this directory.
    fn list(&self) -> Result<Vec<PathRef>>;

    /// Depth-bounded pre-order walk starting at this path.
    fn walk_file_tree(
        &self,
        depth: Depth,
        follow_links: bool,
        visitor: &mut dyn FileVisitor,
    ) -> Result<()>;

    /// Creates an empty file; fails if it exists or the parent is not a directory.
    fn create_new_file(&self) -> Result<()>;

    /// Creates this directory; fails if it exists or the parent is not a directory.
    fn mkdir(&self) -> Result<()>;

    /// Creates this directory and all missing ancestors.
    fn mkdirs(&self) -> Result<()>;

    /// Backend-native absolute representation, `None` if the backend has none.
    fn to_system_path(&self) -> Option<PathBuf>;

    fn open(&self, mode: OpenMode) -> Result<Box<dyn RandomAccess>>;

    fn open_input(&self) -> Result<InputStream>;

    /// Opens for writing, creating the file and missing parents when absent.
    fn open_output(&self, append: bool) -> Result<OutputStream>;

    fn size(&self) -> Result<u64>;

    /// Deletes the entry. Whether directories must be empty is backend-defined.
    fn delete(&self) -> Result<()>;

    /// Best-effort deletion when the owning session ends.
    fn delete_on_exit(&self);

    fn as_any(&self) -> &dyn Any;

    fn dyn_eq(&self, other: &dyn VfsPath) -> bool;

    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl PartialEq for dyn VfsPath {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

impl Eq for dyn VfsPath {}

impl Hash for dyn VfsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dyn_hash(state);
    }
}

impl fmt::Display for dyn VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Seekable, bidirectional byte access to one file.
///
/// Not meant for concurrent use: the position is mutable state owned by
/// whoever holds the handle. Dropping a handle releases it without reporting
/// errors; [`RandomAccess::close`] flushes pending data to storage and reports
/// any failure.
pub trait RandomAccess: fmt::Debug + Send {
    /// Path the handle was opened from.
    fn path(&self) -> &PathRef;

    fn position(&mut self) -> Result<u64>;

    /// Moves the position. Beyond the end is allowed; the file grows on the next write.
    fn set_position(&mut self, position: u64) -> Result<()>;

    fn size(&self) -> Result<u64>;

    /// Reads one byte, `None` at end of stream.
    fn read_byte(&mut self) -> Result<Option<u8>>;

    /// Reads into `buf`, `None` at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// Writes all of `buf` at the current position.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Truncates or extends the file. The position is clamped to the new size.
    fn set_size(&mut self, size: u64) -> Result<()>;

    /// Flushes data and metadata to the storage device.
    fn sync(&mut self) -> Result<()>;

    /// Native descriptor, `None` when the handle is not backed by an OS file.
    fn as_file(&self) -> Option<&std::fs::File>;

    /// Flushes pending data to storage, then releases the handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Session-wide policy: work directory, temp storage and name resolution.
pub trait FsHandler: Send + Sync {
    /// Resolves `name` against the work directory, or takes it as-is when absolute.
    fn resolve_path(&self, name: &str) -> Result<PathRef>;

    /// Builds a free-standing relative path, ignoring the work directory.
    fn relative_path(&self, name: &str) -> Result<PathRef>;

    /// Maps a native path into this handler's path space. A relative input is
    /// taken relative to the process startup directory.
    fn resolve_sys_path(&self, native: &std::path::Path) -> Option<PathRef>;

    fn work_directory(&self) -> PathRef;

    /// Replaces the work directory. `path` must denote an existing directory.
    fn set_work_directory(&self, path: &PathRef) -> Result<()>;

    /// Creates a new temporary file. Both affixes fall back to defaults.
    fn tmp_file(&self, prefix: Option<&str>, suffix: Option<&str>) -> Result<PathRef>;

    /// Directory for transient storage.
    fn tmp_dir(&self) -> Result<PathRef>;

    /// Resolves a possibly relative path against the current work directory.
    fn absolute(&self, path: &PathRef) -> Result<PathRef> {
        if path.is_absolute() {
            return Ok(Arc::clone(path));
        }
        path.absolute_path(self.work_directory().as_ref())
    }

    /// Native form of the work directory, for binding a spawned process's cwd.
    fn work_directory_native(&self) -> Option<PathBuf> {
        self.work_directory().to_system_path()
    }

    /// Opens a named resource for reading, `None` if it cannot be opened.
    fn find_resource(&self, name: &str) -> Option<InputStream> {
        self.resolve_path(name).ok()?.open_input().ok()
    }

    /// Deletes the named entry.
    fn remove(&self, name: &str) -> Result<()> {
        let path = self.resolve_path(name)?;
        if !path.exists() && !path.is_link() {
            return Err(FsError::NotFound(PathBuf::from(name)));
        }
        path.delete()
    }

    /// Moves the entry named `from` to `to`.
    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve_path(from)?;
        let target = self.resolve_path(to)?;
        source.move_to(target.as_ref())
    }
}
