use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PersistenceError;

/// File-backed program memory. The file is sized to exactly the flash size
/// and is only touched when the device is created and destroyed.
#[derive(Debug)]
pub struct FlashStore {
    path: PathBuf,
    file: File,
    size: usize,
}

impl FlashStore {
    /// Open (creating if absent) the backing file, resize it to `size` bytes
    /// and read it back. Any failure here leaves the device unusable.
    pub fn load(path: &Path, size: usize) -> Result<(Self, Vec<u8>), PersistenceError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| PersistenceError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        file.set_len(size as u64).map_err(|source| PersistenceError::Resize {
            path: path.to_path_buf(),
            size,
            source,
        })?;

        let mut contents = vec![0u8; size];
        let actual = read_full(&mut file, &mut contents).map_err(|source| PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if actual != size {
            return Err(PersistenceError::ShortRead {
                path: path.to_path_buf(),
                expected: size,
                actual,
            });
        }

        debug!(path = %path.display(), size, "flash loaded");
        let store = Self {
            path: path.to_path_buf(),
            file,
            size,
        };
        Ok((store, contents))
    }

    /// Write `bytes` back from offset 0.
    pub fn store(&mut self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let write_err = |source: std::io::Error| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        self.file.seek(SeekFrom::Start(0)).map_err(write_err)?;
        let actual = write_full(&mut self.file, &bytes[..bytes.len().min(self.size)]).map_err(write_err)?;
        if actual != self.size {
            return Err(PersistenceError::ShortWrite {
                path: self.path.clone(),
                expected: self.size,
                actual,
            });
        }
        self.file.sync_data().map_err(write_err)?;

        debug!(path = %self.path.display(), size = self.size, "flash stored");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

// Like read_exact, but reports how far it got instead of failing on EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn write_full(writer: &mut impl Write, buf: &[u8]) -> std::io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
