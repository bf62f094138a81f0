//! A virtual path and file system handler layer for embedding hosts.
//! Lets a host route every file access of an embedded runtime (script
//! loading, file handles, `remove`/`rename`, temp files, the work directory
//! of spawned processes) through one pluggable abstraction.
//!
//! ### Overview
//!
//! `vfs-hook` separates *where* a file lives from *how* it is reached. A [`VfsPath`]
//! names a location in some backend; a [`FsHandler`] owns the session policy that
//! turns names into paths. [`OsFsHandler`] passes everything straight through
//! to the host file system.
//!
//! **Key ideas**:
//! - **Uniform paths**: Resolution, canonicalization, links, attributes, copy/move,
//!   listing and walking work the same for every backend.
//! - **Session work directory**: Relative names resolve against a work directory
//!   that can be changed at run time and read concurrently.
//! - **Byte access**: Files are opened as seekable [`RandomAccess`] handles or as
//!   plain `Read`/`Write` streams.
//! - **Backends mix**: Copy and move between backends fall back to streaming
//!   when no native primitive applies.

mod core;
mod vfs;

pub use crate::core::transfer::{DEFAULT_BUFFER_SIZE, stream_copy, stream_move};
pub use crate::core::utils;
pub use crate::core::walk::walk_file_tree;
pub use crate::core::{
    Attributes, Depth, FileKind, FileTimes, FileVisitor, FsError, FsErrorKind, FsHandler,
    InputStream, OpenMode, OutputStream, PathRef, RandomAccess, Result, VfsPath, Visit,
};
pub use vfs::{HandlerConfig, OsFsHandler, OsPath, OsRandomAccess};
