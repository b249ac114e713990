//! Block device seam.
//!
//! The engine touches the underlying bytes through this trait only; callers
//! decide whether the backing store is a host file or a memory buffer. All
//! transfers are sector-aligned whole sectors.

use crate::error::Result;
use crate::SECTOR_SIZE;

use spin::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub trait BlockDevice: Send + Sync {
    /// Read `buf.len() / SECTOR_SIZE` sectors starting at `sector`.
    ///
    /// - `buf.len()` must be a multiple of SECTOR_SIZE
    fn read_sectors(&self, sector: usize, buf: &mut [u8]) -> Result<()>;

    /// Write `buf.len() / SECTOR_SIZE` sectors starting at `sector`.
    ///
    /// - `buf.len()` must be a multiple of SECTOR_SIZE
    fn write_sectors(&self, sector: usize, buf: &[u8]) -> Result<()>;

    /// Total image size in sectors.
    fn sector_count(&self) -> Result<usize>;
}

/// A host file opened read-write as a disk image.
pub struct ImageFile(RwLock<File>);

impl ImageFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(RwLock::new(file)))
    }

    /// Create (or truncate) a file of exactly `bytes` bytes.
    pub fn create<P: AsRef<Path>>(path: P, bytes: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(bytes as u64)?;
        Ok(Self(RwLock::new(file)))
    }
}

impl BlockDevice for ImageFile {
    fn read_sectors(&self, sector: usize, buf: &mut [u8]) -> Result<()> {
        assert!(
            buf.len() % SECTOR_SIZE == 0,
            "buf.len() must be a multiple of SECTOR_SIZE"
        );
        let mut file = self.0.write();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_sectors(&self, sector: usize, buf: &[u8]) -> Result<()> {
        assert!(
            buf.len() % SECTOR_SIZE == 0,
            "buf.len() must be a multiple of SECTOR_SIZE"
        );
        let mut file = self.0.write();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sector_count(&self) -> Result<usize> {
        let file = self.0.read();
        Ok(file.metadata()?.len() as usize / SECTOR_SIZE)
    }
}

/// An in-memory image, used by the formatter tests and anywhere a scratch
/// image is cheaper than a temp file.
pub struct MemDevice(RwLock<Vec<u8>>);

impl MemDevice {
    pub fn new(bytes: usize) -> Self {
        Self(RwLock::new(vec![0u8; bytes]))
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self(RwLock::new(data))
    }

    /// Copy of the current image contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.read().clone()
    }
}

impl BlockDevice for MemDevice {
    fn read_sectors(&self, sector: usize, buf: &mut [u8]) -> Result<()> {
        assert!(
            buf.len() % SECTOR_SIZE == 0,
            "buf.len() must be a multiple of SECTOR_SIZE"
        );
        let data = self.0.read();
        let offset = sector * SECTOR_SIZE;
        let end = offset + buf.len();
        if end > data.len() {
            return Err(IoError::new(ErrorKind::UnexpectedEof, "read past end of image").into());
        }
        buf.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    fn write_sectors(&self, sector: usize, buf: &[u8]) -> Result<()> {
        assert!(
            buf.len() % SECTOR_SIZE == 0,
            "buf.len() must be a multiple of SECTOR_SIZE"
        );
        let mut data = self.0.write();
        let offset = sector * SECTOR_SIZE;
        let end = offset + buf.len();
        if end > data.len() {
            return Err(IoError::new(ErrorKind::UnexpectedEof, "write past end of image").into());
        }
        data[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> Result<usize> {
        Ok(self.0.read().len() / SECTOR_SIZE)
    }
}
