//! CP/M-86 floppies, read-only.
//!
//! A CP/M directory is an array of 32-byte extent entries:
//!
//! | Off | Size | Field |
//! |-----|------|-------|
//! | 0   | 1    | user number, 0xE5 when the slot is free |
//! | 1   | 8    | name, bit 7 of each byte stripped |
//! | 9   | 3    | extension; bit 7 of t1 = read-only, of t2 = system |
//! | 12  | 1    | extent number, low five bits |
//! | 13  | 1    | byte count (unused here) |
//! | 14  | 1    | extent number, high bits |
//! | 15  | 1    | record count of the last logical extent, 128-byte records |
//! | 16  | 16   | allocation blocks: 16 bytes, or 8 little-endian words on  |
//! |     |      | disks with more than 255 blocks                           |
//!
//! Block 0 is the start of the directory itself; a file's data is the
//! concatenation of its non-zero allocation blocks across its extents in
//! extent order, truncated to the size the record count implies.
//!
//! Directory listing and extraction are supported; every mutator answers
//! `ReadOnlyVolume`.

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::{DIRENT_SIZE, SECTOR_SIZE};

use std::collections::BTreeMap;
use std::sync::Arc;

const RECORD_SIZE: usize = 128;
/// One logical extent covers 16 KB (128 records).
const EXTENT_BYTES: usize = 16 * 1024;
const FREE_SLOT: u8 = 0xE5;

/// Disk parameters. CP/M media carry no self-description, so the caller
/// supplies these; the default matches Victor 9000 CP/M-86 floppies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpmGeometry {
    /// First sector of the directory (and of allocation block 0).
    pub dir_start_sector: usize,
    /// Number of 32-byte directory slots.
    pub dir_entries: usize,
    /// Allocation block size in bytes.
    pub block_size: usize,
    /// Sixteen byte-wide block pointers when false, eight word-wide when
    /// true.
    pub wide_alloc: bool,
}

impl Default for CpmGeometry {
    fn default() -> Self {
        Self {
            dir_start_sector: 4,
            dir_entries: 128,
            block_size: 2048,
            wide_alloc: false,
        }
    }
}

/// One file as listed from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpmFile {
    pub user: u8,
    pub name: String,
    pub size: usize,
    pub read_only: bool,
    pub system: bool,
}

struct Extent {
    user: u8,
    name: String,
    index: usize,
    record_count: u8,
    blocks: Vec<u32>,
    read_only: bool,
    system: bool,
}

pub struct CpmVolume {
    device: Arc<dyn BlockDevice>,
    geometry: CpmGeometry,
}

impl CpmVolume {
    pub fn open(device: Arc<dyn BlockDevice>, geometry: CpmGeometry) -> Result<Self> {
        if geometry.block_size == 0 || geometry.block_size % SECTOR_SIZE != 0 {
            return Err(Error::CorruptLabel("block size is not a sector multiple"));
        }
        let dir_bytes = geometry.dir_entries * DIRENT_SIZE;
        let dir_sectors = (dir_bytes + SECTOR_SIZE - 1) / SECTOR_SIZE;
        if geometry.dir_start_sector + dir_sectors > device.sector_count()? {
            return Err(Error::CorruptLabel("directory beyond end of image"));
        }
        Ok(Self { device, geometry })
    }

    fn read_extents(&self) -> Result<Vec<Extent>> {
        let dir_bytes = self.geometry.dir_entries * DIRENT_SIZE;
        let mut raw = vec![0u8; (dir_bytes + SECTOR_SIZE - 1) / SECTOR_SIZE * SECTOR_SIZE];
        self.device
            .read_sectors(self.geometry.dir_start_sector, &mut raw)?;

        let mut extents = Vec::new();
        for slot in 0..self.geometry.dir_entries {
            let bytes = &raw[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE];
            let user = bytes[0];
            if user == FREE_SLOT {
                continue;
            }
            let base: String = bytes[1..9]
                .iter()
                .map(|&b| (b & 0x7F) as char)
                .collect::<String>()
                .trim_end_matches(' ')
                .to_string();
            let ext: String = bytes[9..12]
                .iter()
                .map(|&b| (b & 0x7F) as char)
                .collect::<String>()
                .trim_end_matches(' ')
                .to_string();
            let name = if ext.is_empty() {
                base
            } else {
                format!("{}.{}", base, ext)
            };

            let mut blocks = Vec::new();
            if self.geometry.wide_alloc {
                for pair in bytes[16..32].chunks(2) {
                    let block = u16::from_le_bytes([pair[0], pair[1]]) as u32;
                    if block != 0 {
                        blocks.push(block);
                    }
                }
            } else {
                for &b in &bytes[16..32] {
                    if b != 0 {
                        blocks.push(b as u32);
                    }
                }
            }

            extents.push(Extent {
                user,
                name,
                index: (bytes[12] & 0x1F) as usize | (bytes[14] as usize) << 5,
                record_count: bytes[15],
                blocks,
                read_only: bytes[9] & 0x80 != 0,
                system: bytes[10] & 0x80 != 0,
            });
        }
        Ok(extents)
    }

    /// Group extents per (user, name) in first-appearance order.
    fn files(&self) -> Result<Vec<(u8, String, Vec<Extent>)>> {
        let extents = self.read_extents()?;
        let mut order: Vec<(u8, String)> = Vec::new();
        let mut grouped: BTreeMap<(u8, String), Vec<Extent>> = BTreeMap::new();
        for extent in extents {
            let key = (extent.user, extent.name.to_ascii_uppercase());
            if !grouped.contains_key(&key) {
                order.push(key.clone());
            }
            grouped.entry(key).or_default().push(extent);
        }
        Ok(order
            .into_iter()
            .map(|key| {
                let mut group = grouped.remove(&key).unwrap();
                group.sort_by_key(|e| e.index);
                (key.0, key.1, group)
            })
            .collect())
    }

    /// Directory listing in on-disk order of first appearance.
    pub fn list(&self) -> Result<Vec<CpmFile>> {
        Ok(self
            .files()?
            .into_iter()
            .map(|(user, name, group)| {
                let last = group.last().unwrap();
                CpmFile {
                    user,
                    name,
                    size: last.index * EXTENT_BYTES + last.record_count as usize * RECORD_SIZE,
                    read_only: group.iter().any(|e| e.read_only),
                    system: group.iter().any(|e| e.system),
                }
            })
            .collect())
    }

    /// Extract one file, byte-exact up to CP/M's 128-byte record rounding.
    pub fn copy_out(&self, user: u8, name: &str) -> Result<Vec<u8>> {
        let wanted = name.to_ascii_uppercase();
        let files = self.files()?;
        let (_, _, group) = files
            .into_iter()
            .find(|(u, n, _)| *u == user && *n == wanted)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let last = group.last().unwrap();
        let size = last.index * EXTENT_BYTES + last.record_count as usize * RECORD_SIZE;
        let sectors_per_block = self.geometry.block_size / SECTOR_SIZE;

        let mut data = Vec::with_capacity(size);
        for extent in &group {
            for &block in &extent.blocks {
                let sector = self.geometry.dir_start_sector + block as usize * sectors_per_block;
                let mut buf = vec![0u8; self.geometry.block_size];
                self.device.read_sectors(sector, &mut buf)?;
                data.extend_from_slice(&buf);
            }
        }
        data.truncate(size);
        Ok(data)
    }

    pub fn copy_in(&self, _name: &str, _data: &[u8]) -> Result<()> {
        Err(Error::ReadOnlyVolume)
    }

    pub fn delete(&self, _name: &str) -> Result<()> {
        Err(Error::ReadOnlyVolume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    fn dirent(user: u8, name: &str, ext: &str, flags: (bool, bool), extent: usize, rc: u8, blocks: &[u8]) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[0] = user;
        bytes[1..9].fill(b' ');
        bytes[9..12].fill(b' ');
        bytes[1..1 + name.len()].copy_from_slice(name.as_bytes());
        bytes[9..9 + ext.len()].copy_from_slice(ext.as_bytes());
        if flags.0 {
            bytes[9] |= 0x80;
        }
        if flags.1 {
            bytes[10] |= 0x80;
        }
        bytes[12] = (extent & 0x1F) as u8;
        bytes[14] = (extent >> 5) as u8;
        bytes[15] = rc;
        bytes[16..16 + blocks.len()].copy_from_slice(blocks);
        bytes
    }

    fn scratch_disk() -> MemDevice {
        // 100 sectors, directory at sector 4, 2048-byte blocks
        let mut image = vec![0u8; 100 * SECTOR_SIZE];
        let dir = 4 * SECTOR_SIZE;

        // HELLO.CMD: 3 records (384 bytes) in block 1
        image[dir..dir + 32].copy_from_slice(&dirent(0, "HELLO", "CMD", (false, false), 0, 3, &[1]));
        // PROT.SYS: read-only + system, 1 record in block 2
        image[dir + 32..dir + 64]
            .copy_from_slice(&dirent(0, "PROT", "SYS", (true, true), 0, 1, &[2]));
        // free slot
        image[dir + 64] = FREE_SLOT;

        // block 1 = sectors 8..12, block 2 = sectors 12..16
        for (i, b) in image[8 * SECTOR_SIZE..8 * SECTOR_SIZE + 384].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        image[12 * SECTOR_SIZE] = 0x5A;
        MemDevice::from_vec(image)
    }

    fn open_scratch() -> CpmVolume {
        CpmVolume::open(Arc::new(scratch_disk()), CpmGeometry::default()).unwrap()
    }

    #[test]
    fn listing() {
        let volume = open_scratch();
        let files = volume.list().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "HELLO.CMD");
        assert_eq!(files[0].size, 384);
        assert!(!files[0].read_only);
        assert_eq!(files[1].name, "PROT.SYS");
        assert_eq!(files[1].size, 128);
        assert!(files[1].read_only && files[1].system);
    }

    #[test]
    fn extraction() {
        let volume = open_scratch();
        let data = volume.copy_out(0, "hello.cmd").unwrap();
        assert_eq!(data.len(), 384);
        assert_eq!(data[0], 0);
        assert_eq!(data[383], (383 % 251) as u8);

        assert!(matches!(
            volume.copy_out(0, "MISSING.CMD"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn mutators_refuse() {
        let volume = open_scratch();
        assert!(matches!(
            volume.copy_in("NEW.CMD", b"x"),
            Err(Error::ReadOnlyVolume)
        ));
        assert!(matches!(volume.delete("HELLO.CMD"), Err(Error::ReadOnlyVolume)));
    }
}
