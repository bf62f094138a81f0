//! This module provides the pass-through [`VfsPath`] implementation that maps every
//! operation directly onto the host file system.
//!
//! ### Key Features:
//! - **Identity**: An `OsPath` is its host path as given (absolute or relative);
//!   equality compares path components only.
//! - **Native representation**: Always available. Relative paths are made absolute
//!   against the process directory when a native form is required.
//! - **Native fast paths**: Copy and move use `std::fs` primitives when the other
//!   side has a native form, and stream through generic handles otherwise.
//! - **Session state**: Paths share an [`OsContext`] with the handler that created
//!   them (copy buffer size, delete-on-exit registry).

use std::any::{Any, TypeId};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, trace, warn};

use crate::core::{
    Attributes, Depth, FileKind, FileTimes, FileVisitor, FsError, InputStream, OpenMode,
    OutputStream, PathRef, RandomAccess, Result, VfsPath, transfer, utils, walk,
};
use crate::vfs::os_file::OsRandomAccess;

/// State shared by a handler and every path it produced.
///
/// Entries registered with [`VfsPath::delete_on_exit`] are removed, newest
/// first, when the last owner of the context is dropped.
pub(crate) struct OsContext {
    startup_dir: PathBuf,       // host absolute path
    copy_buffer_size: usize,
    delete_on_exit: Mutex<Vec<PathBuf>>, // host absolute paths
}

impl OsContext {
    pub(crate) fn new(startup_dir: PathBuf, copy_buffer_size: usize) -> Self {
        Self {
            startup_dir,
            copy_buffer_size: copy_buffer_size.max(1),
            delete_on_exit: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn startup_dir(&self) -> &Path {
        &self.startup_dir
    }

    fn register_delete_on_exit(&self, path: PathBuf) {
        let mut pending = self.delete_on_exit.lock();
        if !pending.contains(&path) {
            pending.push(path);
        }
    }
}

impl Drop for OsContext {
    fn drop(&mut self) {
        let pending = std::mem::take(self.delete_on_exit.get_mut());
        for path in pending.iter().rev() {
            let result = match fs::symlink_metadata(path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir(path),
                Ok(_) => fs::remove_file(path),
                Err(_) => continue,
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Unable to delete on exit");
            }
        }
    }
}

/// A host file system path.
#[derive(Clone)]
pub struct OsPath {
    path: PathBuf, // host path, absolute or relative, as given
    ctx: Arc<OsContext>,
}

impl OsPath {
    pub(crate) fn new<P: Into<PathBuf>>(path: P, ctx: Arc<OsContext>) -> Self {
        Self {
            path: path.into(),
            ctx,
        }
    }

    /// The wrapped host path, exactly as it was built.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    fn derive<P: Into<PathBuf>>(&self, path: P) -> PathRef {
        Arc::new(OsPath::new(path, Arc::clone(&self.ctx)))
    }

    /// Absolute host path, relative paths taken against the session startup directory.
    fn host(&self) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            self.ctx.startup_dir.join(&self.path)
        }
    }

    fn io_err(&self, err: std::io::Error) -> FsError {
        FsError::from_io(err, &self.path)
    }

    /// Fails unless the parent of `host` is an existing directory.
    fn require_parent_dir(host: &Path) -> Result<()> {
        match host.parent() {
            Some(parent) if !parent.is_dir() => Err(FsError::NotADirectory(parent.to_path_buf())),
            _ => Ok(()),
        }
    }

    /// Make directories recursively.
    /// * `host` is an absolute host path.
    /// Fails if an existing component is not a directory.
    fn mkdir_all(host: &Path) -> Result<()> {
        // Looking for the first existing ancestor
        let mut existed_part = host.to_path_buf();
        while !fs::exists(&existed_part).unwrap_or(false) {
            match existed_part.parent() {
                Some(parent) => existed_part = parent.to_path_buf(),
                None => break,
            }
        }
        if fs::exists(&existed_part).unwrap_or(false) && !existed_part.is_dir() {
            return Err(FsError::NotADirectory(existed_part));
        }

        // Create from the closest existing ancestor to the target path
        let need_to_create: Vec<_> = host
            .strip_prefix(&existed_part)
            .map_err(|_| FsError::InvalidPath(host.display().to_string()))?
            .components()
            .collect();

        let mut built = existed_part;
        for component in need_to_create {
            built.push(component);
            if let Err(e) = fs::create_dir(&built) {
                // lost a race against another creator, which is fine for a directory
                if !built.is_dir() {
                    return Err(FsError::from_io(e, &built));
                }
            }
        }
        Ok(())
    }

    /// Returns true if both host paths name the same existing file.
    fn same_file(source: &Path, target: &Path) -> bool {
        match (fs::canonicalize(source), fs::canonicalize(target)) {
            (Ok(source), Ok(target)) => source == target,
            _ => false,
        }
    }

    /// Attribute-preserving copy, degrading to a plain copy.
    fn native_copy(source: &Path, target: &Path) -> Result<()> {
        if let Err(e) = Self::copy_preserving(source, target) {
            debug!(
                source = %source.display(),
                error = %e,
                "Attribute-preserving copy failed, retrying without attributes",
            );
            fs::copy(source, target).map_err(|e| FsError::from_io(e, target))?;
        }
        Ok(())
    }

    /// Renames, or copies then deletes a non-directory source on another device.
    fn native_move(source: &Path, source_is_dir: bool, target: &Path) -> Result<()> {
        match fs::rename(source, target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::CrossesDevices && !source_is_dir => {
                debug!(
                    source = %source.display(),
                    target = %target.display(),
                    "Rename crosses devices, falling back to copy and delete",
                );
                Self::native_copy(source, target)?;
                fs::remove_file(source).map_err(|e| FsError::from_io(e, source))
            }
            Err(e) => Err(FsError::from_io(e, source)),
        }
    }

    /// Moves an existing `target` into a scratch directory next to it, so it can
    /// be put back if the move that replaces it fails.
    fn set_aside(target: &Path) -> Result<(TempDir, PathBuf)> {
        let parent = target
            .parent()
            .ok_or_else(|| FsError::InvalidPath(target.display().to_string()))?;
        let scratch = tempfile::Builder::new()
            .prefix(".vfs-replaced")
            .tempdir_in(parent)
            .map_err(|e| FsError::from_io(e, parent))?;
        let aside = scratch.path().join("entry");
        fs::rename(target, &aside).map_err(|e| FsError::from_io(e, target))?;
        Ok((scratch, aside))
    }

    /// Copies content, then carries the permission bits and timestamps over.
    fn copy_preserving(source: &Path, target: &Path) -> std::io::Result<()> {
        let meta = fs::metadata(source)?;
        fs::copy(source, target)?;
        filetime::set_file_times(
            target,
            FileTime::from_last_access_time(&meta),
            FileTime::from_last_modification_time(&meta),
        )
    }

    /// Resolves the symlinked prefixes that a `..` would otherwise step out of
    /// lexically. The final component is never followed.
    fn canon_with_links(path: &Path) -> Result<PathBuf> {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if result.is_symlink() {
                        result = fs::canonicalize(&result).map_err(|e| FsError::from_io(e, &result))?;
                    }
                    result.pop();
                }
                other => result.push(other.as_os_str()),
            }
        }
        Ok(result)
    }
}

impl fmt::Debug for OsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OsPath").field(&self.path).finish()
    }
}

impl PartialEq for OsPath {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for OsPath {}

impl Hash for OsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl From<fs::Metadata> for Attributes {
    fn from(meta: fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };
        Attributes {
            kind,
            size: meta.len(),
            modified: meta.modified().ok(),
            accessed: meta.accessed().ok(),
            created: meta.created().ok(),
        }
    }
}

impl VfsPath for OsPath {
    fn name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self
                .path
                .components()
                .next_back()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    fn is_absolute(&self) -> bool {
        self.path.is_absolute()
    }

    fn absolute_path(&self, base: &dyn VfsPath) -> Result<PathRef> {
        if self.is_absolute() {
            return Ok(Arc::new(self.clone()));
        }
        match base.to_system_path() {
            Some(base) => Ok(self.derive(base.join(&self.path))),
            None => Err(FsError::CrossBackend(format!(
                "base {} has no native path to resolve {} against",
                base.path(),
                self.path.display()
            ))),
        }
    }

    fn real_path(&self) -> Result<PathRef> {
        let real = fs::canonicalize(self.host()).map_err(|e| self.io_err(e))?;
        Ok(self.derive(real))
    }

    /// Relative paths are normalized lexically. Absolute paths are normalized
    /// lexically too, except that a symlinked directory followed by `..` is
    /// resolved first so the result names the same entry.
    fn canon(&self) -> Result<PathRef> {
        if !self.path.is_absolute() || !utils::has_parent_refs(&self.path) {
            return Ok(self.derive(utils::normalize(&self.path)));
        }
        Ok(self.derive(Self::canon_with_links(&self.path)?))
    }

    fn child(&self, name: &str) -> Result<PathRef> {
        utils::validate_segment(name)?;
        Ok(self.derive(self.path.join(name)))
    }

    fn child_path(&self, other: &PathRef) -> Result<PathRef> {
        // absolute override: `other` replaces this path entirely
        if other.is_absolute() {
            return Ok(Arc::clone(other));
        }
        match other.as_any().downcast_ref::<OsPath>() {
            Some(other) if other.path.as_os_str().is_empty() => Ok(Arc::new(self.clone())),
            Some(other) => Ok(self.derive(self.path.join(&other.path))),
            None => Err(FsError::CrossBackend(format!(
                "cannot join {} onto {}",
                other.path(),
                self.path.display()
            ))),
        }
    }

    fn relative(&self, other: &dyn VfsPath) -> Result<PathRef> {
        let relative = match other.as_any().downcast_ref::<OsPath>() {
            Some(other) => utils::relativize(&self.path, &other.path)?,
            None => match other.to_system_path() {
                Some(native) => utils::relativize(self.host(), native)?,
                None => {
                    return Err(FsError::CrossBackend(format!(
                        "{} has no native path",
                        other.path()
                    )));
                }
            },
        };
        Ok(self.derive(relative))
    }

    fn link(&self, to: &dyn VfsPath) -> Result<()> {
        let target = to
            .to_system_path()
            .ok_or_else(|| FsError::CrossBackend(format!("{} has no native path", to.path())))?;
        fs::hard_link(&target, self.host()).map_err(|e| self.io_err(e))
    }

    fn symlink(&self, to: &dyn VfsPath) -> Result<()> {
        let target = to
            .to_system_path()
            .ok_or_else(|| FsError::CrossBackend(format!("{} has no native path", to.path())))?;
        let link = self.host();

        #[cfg(unix)]
        let result = std::os::unix::fs::symlink(&target, &link);
        #[cfg(windows)]
        let result = if target.is_dir() {
            std::os::windows::fs::symlink_dir(&target, &link)
        } else {
            std::os::windows::fs::symlink_file(&target, &link)
        };
        #[cfg(not(any(unix, windows)))]
        let result: std::io::Result<()> = {
            let _ = (&target, &link);
            return Err(FsError::Unsupported("symbolic links".into()));
        };

        result.map_err(|e| self.io_err(e))
    }

    fn attributes(&self) -> Result<Attributes> {
        let meta = fs::metadata(self.host()).map_err(|e| self.io_err(e))?;
        Ok(meta.into())
    }

    fn link_attributes(&self) -> Result<Attributes> {
        let meta = fs::symlink_metadata(self.host()).map_err(|e| self.io_err(e))?;
        Ok(meta.into())
    }

    fn set_file_times(&self, times: FileTimes) -> Result<()> {
        if times.is_noop() {
            return Ok(());
        }
        let host = self.host();
        if let Some(modified) = times.modified {
            filetime::set_file_mtime(&host, FileTime::from_system_time(modified))
                .map_err(|e| self.io_err(e))?;
        }
        if let Some(accessed) = times.accessed {
            filetime::set_file_atime(&host, FileTime::from_system_time(accessed))
                .map_err(|e| self.io_err(e))?;
        }
        if times.created.is_some() {
            debug!(path = %host.display(), "Creation time cannot be set on the host, ignoring it");
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
        if self.is_dir() {
            return Err(FsError::IsADirectory(self.path.clone()));
        }
        let Some(native_target) = target.to_system_path() else {
            transfer::stream_copy(self, target, self.ctx.copy_buffer_size)?;
            return Ok(());
        };

        let source = self.host();
        if Self::same_file(&source, &native_target) {
            trace!(source = %source.display(), "Copy onto itself, nothing to do");
            return Ok(());
        }
        trace!(source = %source.display(), target = %native_target.display(), "Native copy");
        Self::native_copy(&source, &native_target)
    }

    fn move_file(&self, target: &dyn VfsPath) -> Result<()> {
        if self.is_dir() {
            return Err(FsError::IsADirectory(self.path.clone()));
        }
        let Some(native_target) = target.to_system_path() else {
            transfer::stream_move(self, target, self.ctx.copy_buffer_size)?;
            return Ok(());
        };

        let source = self.host();
        if Self::same_file(&source, &native_target) {
            trace!(source = %source.display(), "Move onto itself, nothing to do");
            return Ok(());
        }
        trace!(source = %source.display(), target = %native_target.display(), "Native move");
        if let Err(e) = fs::rename(&source, &native_target) {
            debug!(
                source = %source.display(),
                error = %e,
                "Rename failed, falling back to copy and delete",
            );
            Self::native_copy(&source, &native_target)?;
            fs::remove_file(&source).map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }

    fn move_to(&self, target: &dyn VfsPath) -> Result<()> {
        let native_target = target
            .to_system_path()
            .ok_or_else(|| FsError::CrossBackend(format!("{} has no native path", target.path())))?;
        let source = self.host();
        if source == native_target || Self::same_file(&source, &native_target) {
            return Ok(());
        }
        let source_meta = fs::symlink_metadata(&source).map_err(|e| self.io_err(e))?;

        let replaced = match fs::symlink_metadata(&native_target) {
            Ok(target_meta) => {
                if target_meta.is_dir() {
                    let mut entries = fs::read_dir(&native_target)
                        .map_err(|e| FsError::from_io(e, &native_target))?;
                    if entries.next().is_some() {
                        return Err(FsError::DirectoryNotEmpty(native_target));
                    }
                }
                Some(Self::set_aside(&native_target)?)
            }
            Err(_) => None,
        };

        let moved = Self::native_move(&source, source_meta.is_dir(), &native_target);
        if let Some((scratch, aside)) = replaced {
            if moved.is_err() {
                if let Err(e) = fs::rename(&aside, &native_target) {
                    warn!(
                        target = %native_target.display(),
                        kept = %aside.display(),
                        error = %e,
                        "Unable to restore the replaced entry",
                    );
                    // leave the scratch directory in place so nothing is lost
                    let _ = scratch.keep();
                    return moved;
                }
            }
            if let Err(e) = scratch.close() {
                warn!(target = %native_target.display(), error = %e, "Unable to remove the replaced entry");
            }
        }
        moved
    }

    fn exists(&self) -> bool {
        fs::exists(self.host()).unwrap_or(false)
    }

    fn is_dir(&self) -> bool {
        self.host().is_dir()
    }

    fn is_file(&self) -> bool {
        self.host().is_file()
    }

    fn is_link(&self) -> bool {
        self.host().is_symlink()
    }

    fn list(&self) -> Result<Vec<PathRef>> {
        if !self.is_dir() {
            return Err(FsError::NotADirectory(self.path.clone()));
        }
        let mut names: Vec<_> = fs::read_dir(self.host())
            .map_err(|e| self.io_err(e))?
            .filter_map(|entry| entry.ok().map(|e| e.file_name()))
            .collect();
        names.sort();
        Ok(names
            .into_iter()
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
        let host = self.host();
        if fs::symlink_metadata(&host).is_ok() {
            return Err(FsError::AlreadyExists(self.path.clone()));
        }
        Self::require_parent_dir(&host)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&host)
            .map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn mkdir(&self) -> Result<()> {
        let host = self.host();
        if fs::symlink_metadata(&host).is_ok() {
            return Err(FsError::AlreadyExists(self.path.clone()));
        }
        Self::require_parent_dir(&host)?;
        fs::create_dir(&host).map_err(|e| self.io_err(e))
    }

    fn mkdirs(&self) -> Result<()> {
        Self::mkdir_all(&self.host())
    }

    fn to_system_path(&self) -> Option<PathBuf> {
        Some(self.host())
    }

    fn open(&self, mode: OpenMode) -> Result<Box<dyn RandomAccess>> {
        let host = self.host();
        if host.is_dir() {
            return Err(FsError::IsADirectory(self.path.clone()));
        }
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::ReadWrite => options.read(true).write(true).create(true),
        };
        let file = options.open(&host).map_err(|e| self.io_err(e))?;
        Ok(Box::new(OsRandomAccess::new(file, Arc::new(self.clone()))))
    }

    fn open_input(&self) -> Result<InputStream> {
        if self.is_dir() {
            return Err(FsError::IsADirectory(self.path.clone()));
        }
        let file = fs::File::open(self.host()).map_err(|e| self.io_err(e))?;
        Ok(Box::new(file))
    }

    fn open_output(&self, append: bool) -> Result<OutputStream> {
        let host = self.host();
        if host.is_dir() {
            return Err(FsError::IsADirectory(self.path.clone()));
        }
        if !fs::exists(&host).unwrap_or(false) {
            if let Some(parent) = host.parent() {
                if !parent.is_dir() {
                    Self::mkdir_all(parent)?;
                }
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(&host)
            .map_err(|e| self.io_err(e))?;
        Ok(Box::new(file))
    }

    fn size(&self) -> Result<u64> {
        let meta = fs::metadata(self.host()).map_err(|e| self.io_err(e))?;
        Ok(meta.len())
    }

    fn delete(&self) -> Result<()> {
        let host = self.host();
        let meta = fs::symlink_metadata(&host).map_err(|e| self.io_err(e))?;
        if meta.is_dir() {
            fs::remove_dir(&host).map_err(|e| self.io_err(e))
        } else {
            fs::remove_file(&host).map_err(|e| self.io_err(e))
        }
    }

    fn delete_on_exit(&self) {
        self.ctx.register_delete_on_exit(self.host());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn VfsPath) -> bool {
        other
            .as_any()
            .downcast_ref::<OsPath>()
            .is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<OsPath>().hash(&mut state);
        self.hash(&mut state);
    }
}
