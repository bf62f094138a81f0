//! Host-backed [`FsHandler`]: keeps the session work directory and hands out
//! [`OsPath`] values.
//!
//! ### Work directory
//! - Starts at the canonical startup directory, or at [`HandlerConfig::work_dir`].
//! - Readers never block each other and always see a complete value.
//! - Updates are serialized: absolutize, check it is a directory, canonicalize,
//!   publish. A rejected update leaves the previous value in place.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::core::transfer::DEFAULT_BUFFER_SIZE;
use crate::core::{FsError, FsHandler, PathRef, Result, utils};
use crate::vfs::os_path::{OsContext, OsPath};

/// Environment variables consulted, in order, for the temp directory.
const TEMP_DIR_VARS: [&str; 3] = ["TMPDIR", "TMP", "TEMP"];

/// Settings for [`OsFsHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Initial work directory. Defaults to the process directory.
    pub work_dir: Option<PathBuf>,
    /// Where temp files go. Defaults to the platform temp directory.
    pub temp_dir: Option<PathBuf>,
    pub temp_prefix: String,
    pub temp_suffix: String,
    /// Buffer used when a copy has to stream. Never below 1.
    pub copy_buffer_size: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            temp_dir: None,
            temp_prefix: ".vfs".into(),
            temp_suffix: ".tmp".into(),
            copy_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl HandlerConfig {
    pub fn with_work_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_temp_affixes<S: Into<String>, T: Into<String>>(mut self, prefix: S, suffix: T) -> Self {
        self.temp_prefix = prefix.into();
        self.temp_suffix = suffix.into();
        self
    }

    pub fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }
}

/// [`FsHandler`] over the host file system.
///
/// # Example
///
/// ```no_run
/// use vfs_hook::{FsHandler, OsFsHandler};
///
/// let fs = OsFsHandler::new()?;
/// let script = fs.resolve_path("scripts/main.lua")?;
/// if let Some(dir) = script.parent() {
///     fs.set_work_directory(&dir)?;
/// }
/// # Ok::<(), vfs_hook::FsError>(())
/// ```
pub struct OsFsHandler {
    ctx: Arc<OsContext>,
    config: HandlerConfig,
    work_dir: RwLock<PathRef>,     // absolute canonical OsPath
    work_dir_update: Mutex<()>,
}

impl OsFsHandler {
    /// Creates a handler whose work directory is the process directory.
    pub fn new() -> Result<Self> {
        Self::with_config(HandlerConfig::default())
    }

    /// Creates a handler from `config`. Fails if the configured work directory
    /// is not an existing directory.
    pub fn with_config(config: HandlerConfig) -> Result<Self> {
        let cwd = env::current_dir()?;
        let startup_dir = std::fs::canonicalize(&cwd).unwrap_or(cwd);
        let ctx = Arc::new(OsContext::new(startup_dir.clone(), config.copy_buffer_size));
        let start: PathRef = Arc::new(OsPath::new(startup_dir, Arc::clone(&ctx)));

        let handler = Self {
            ctx,
            config,
            work_dir: RwLock::new(start),
            work_dir_update: Mutex::new(()),
        };
        if let Some(dir) = handler.config.work_dir.clone() {
            let dir: PathRef = Arc::new(handler.os_path(dir));
            handler.set_work_directory(&dir)?;
        }
        trace!(work_dir = %handler.work_directory().path(), "Handler created");
        Ok(handler)
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    fn os_path<P: Into<PathBuf>>(&self, path: P) -> OsPath {
        OsPath::new(path, Arc::clone(&self.ctx))
    }
}

impl FsHandler for OsFsHandler {
    fn resolve_path(&self, name: &str) -> Result<PathRef> {
        utils::validate_path_str(name)?;
        let path: PathRef = Arc::new(self.os_path(name));
        self.work_directory().child_path(&path)
    }

    fn relative_path(&self, name: &str) -> Result<PathRef> {
        utils::validate_path_str(name)?;
        Ok(Arc::new(self.os_path(name)))
    }

    fn resolve_sys_path(&self, native: &Path) -> Option<PathRef> {
        let native = if native.is_absolute() {
            native.to_path_buf()
        } else {
            self.ctx.startup_dir().join(native)
        };
        Some(Arc::new(self.os_path(native)))
    }

    fn work_directory(&self) -> PathRef {
        Arc::clone(&self.work_dir.read())
    }

    fn set_work_directory(&self, path: &PathRef) -> Result<()> {
        let _update = self.work_dir_update.lock();

        let path = self.absolute(path)?;
        if !path.is_dir() {
            return Err(FsError::NotADirectory(PathBuf::from(path.path())));
        }
        let path = path.canon()?;
        if path.as_any().downcast_ref::<OsPath>().is_none() {
            return Err(FsError::CrossBackend(format!(
                "{} is not a host path",
                path.path()
            )));
        }

        debug!(work_dir = %path.path(), "Work directory changed");
        *self.work_dir.write() = path;
        Ok(())
    }

    fn tmp_file(&self, prefix: Option<&str>, suffix: Option<&str>) -> Result<PathRef> {
        let mut builder = tempfile::Builder::new();
        builder
            .prefix(prefix.unwrap_or(&self.config.temp_prefix))
            .suffix(suffix.unwrap_or(&self.config.temp_suffix));
        let file = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }?;
        let path = file.into_temp_path().keep().map_err(|e| FsError::Io(e.error))?;
        trace!(path = %path.display(), "Temp file created");
        Ok(Arc::new(self.os_path(path)))
    }

    fn tmp_dir(&self) -> Result<PathRef> {
        if let Some(dir) = &self.config.temp_dir {
            return Ok(Arc::new(self.os_path(dir.clone())));
        }
        for var in TEMP_DIR_VARS {
            if let Some(dir) = env::var_os(var) {
                if !dir.is_empty() {
                    return Ok(Arc::new(self.os_path(dir)));
                }
            }
        }

        // Last resort: wherever temp files end up
        let scratch = self.tmp_file(None, None)?;
        scratch.delete()?;
        scratch.parent().ok_or_else(|| {
            FsError::Io(std::io::Error::other("unable to locate a temp directory"))
        })
    }
}
