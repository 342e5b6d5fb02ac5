//! Byte store abstraction
//!
//! The persisted device state lives in a small fixed-size byte store with
//! EEPROM semantics: random-access reads and writes that only become
//! durable on [`Eeprom::commit`]. Erased cells read as `0xFF`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SwitchError};

const ERASED: u8 = 0xFF;

/// Fixed-size random-access byte store
pub trait Eeprom: Send + Sync {
    /// Total number of addressable bytes
    fn capacity(&self) -> usize;

    /// Fill `buf` from `addr`; fails rather than reading past the end
    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()>;

    /// Stage `data` at `addr`; fails rather than writing past the end
    fn write(&mut self, addr: usize, data: &[u8]) -> Result<()>;

    /// Make all staged writes durable
    fn commit(&mut self) -> Result<()>;
}

fn check_bounds(addr: usize, len: usize, capacity: usize) -> Result<()> {
    match addr.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(SwitchError::Storage(format!(
            "access of {} bytes at {} exceeds store capacity {}",
            len, addr, capacity
        ))),
    }
}

/// Volatile store, used when no storage path is configured and in tests
#[derive(Debug, Clone)]
pub struct MemoryEeprom {
    bytes: Vec<u8>,
    commits: usize,
}

impl MemoryEeprom {
    /// Create an erased store of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self::from_bytes(vec![ERASED; capacity])
    }

    /// Wrap existing contents; the capacity is the length of `bytes`
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, commits: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of commits since creation
    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl Eeprom for MemoryEeprom {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(addr, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        check_bounds(addr, data.len(), self.bytes.len())?;
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }
}

/// Store backed by a file on disk.
///
/// The whole image is held in memory; `commit` replaces the file through a
/// temporary sibling and a rename so a crash never leaves a torn file.
#[derive(Debug)]
pub struct FileEeprom {
    path: PathBuf,
    image: MemoryEeprom,
}

impl FileEeprom {
    /// Open the image at `path`, creating an erased one if it does not exist.
    ///
    /// Short files are padded with erased cells; long files are truncated.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store image at {:?}, starting erased", path);
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        bytes.resize(capacity, ERASED);
        Ok(Self {
            path,
            image: MemoryEeprom::from_bytes(bytes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Eeprom for FileEeprom {
    fn capacity(&self) -> usize {
        self.image.capacity()
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        self.image.read(addr, buf)
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        self.image.write(addr, data)
    }

    fn commit(&mut self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, self.image.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        self.image.commit()
    }
}
