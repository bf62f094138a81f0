//! Byte-streaming fallback for copying and moving files between paths that
//! share no native copy primitive (different backends, or a side without a
//! native representation).

use std::io::{Read, Write};
use std::path::PathBuf;

use tracing::trace;

use crate::core::{FsError, Result, VfsPath};

/// Default size of the copy buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Copies the content of `source` into `target` through generic streams.
///
/// The target is created (with missing parents) or truncated. On failure the
/// target may hold partially written content; nothing is rolled back.
/// Returns the number of bytes copied.
pub fn stream_copy(source: &dyn VfsPath, target: &dyn VfsPath, buffer_size: usize) -> Result<u64> {
    if source.is_dir() {
        return Err(FsError::IsADirectory(PathBuf::from(source.path())));
    }
    trace!(
        source = %source.path(),
        target = %target.path(),
        buffer_size,
        "Streaming copy",
    );

    let mut input = source.open_input()?;
    let mut output = target.open_output(false)?;
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        output.write_all(&buf[..n])?;
        total += n as u64;
    }
    output.flush()?;
    Ok(total)
}

/// Streams `source` into `target` and deletes `source` only once the copy
/// completed without error.
pub fn stream_move(source: &dyn VfsPath, target: &dyn VfsPath, buffer_size: usize) -> Result<u64> {
    let copied = stream_copy(source, target, buffer_size)?;
    source.delete()?;
    Ok(copied)
}
