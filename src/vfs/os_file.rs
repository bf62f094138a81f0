use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::core::{FsError, PathRef, RandomAccess, Result};

/// [`RandomAccess`] over a host file.
#[derive(Debug)]
pub struct OsRandomAccess {
    file: File,
    path: PathRef,
}

impl OsRandomAccess {
    pub(crate) fn new(file: File, path: PathRef) -> Self {
        Self { file, path }
    }
}

impl RandomAccess for OsRandomAccess {
    fn path(&self) -> &PathRef {
        &self.path
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok(RandomAccess::read(self, &mut byte)?.map(|_| byte[0]))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        loop {
            match self.file.read(buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FsError::Io(e)),
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        RandomAccess::write(self, &[byte])
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        if self.file.stream_position()? > size {
            self.file.seek(SeekFrom::Start(size))?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn as_file(&self) -> Option<&File> {
        Some(&self.file)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut file = self.file;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}
