//! Victor 9000 hard-disk labels and partition dispatch.
//!
//! Sector 0 of a hard-disk image is the physical disk label: drive identity,
//! controller parameters, and a list of absolute sector addresses, one per
//! virtual volume. Each listed sector holds a virtual volume label, and each
//! virtual volume is an independent FAT12 filesystem whose sector numbers
//! are local to its slice of the image.
//!
//! The volume label gives the capacity, the data-area offset, the
//! allocation unit, and the root size; the FAT region size falls out of
//! those. The label sector itself is the volume's one reserved sector.

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::geometry::{detect, Detection, FormatVariant, Geometry, DETECT_PREFIX};
use crate::volume::Volume;
use crate::{read_le_u16, read_le_u32, sectors_needed, write_le_u16, write_le_u32};
use crate::{DIRENT_SIZE, MAX_CLUSTER_FAT12, SECTOR_SIZE};

use log::debug;
use std::sync::Arc;

/// Media descriptor reported for hard-disk volumes.
const HD_MEDIA: u8 = 0xF8;

const MAX_VOLUMES: usize = 16;

/// Physical disk label, sector 0 of a hard-disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalLabel {
    /// Offset 0x00. Bit 0 set marks a hard-disk label.
    pub label_type: u16,
    /// Offset 0x02.
    pub device_id: u16,
    /// Offset 0x04.
    pub serial: [u8; 16],
    /// Offset 0x14. Must be 512.
    pub sector_size: u16,
    /// Offset 0x16.
    pub ipl_vector: u32,
    /// Offset 0x1A.
    pub primary_boot_volume: u16,
    /// Offset 0x1C.
    pub controller_params: [u8; 16],
    /// Offset 0x2C. Carried, not interpreted.
    pub available_media_list: u32,
    /// Offset 0x30. Carried, not interpreted.
    pub working_media_list: u32,
    /// Offset 0x36, one 32-bit sector address per virtual volume.
    pub volume_addresses: Vec<u32>,
}

/// Cheap test used by the detector: label bit, sector size, volume count.
pub(crate) fn looks_like_physical_label(sector: &[u8]) -> bool {
    if sector.len() < 0x36 {
        return false;
    }
    let label_type = read_le_u16(&sector[0x00..]);
    let sector_size = read_le_u16(&sector[0x14..]);
    let volume_count = read_le_u16(&sector[0x34..]) as usize;
    label_type & 0x0001 != 0
        && sector_size as usize == SECTOR_SIZE
        && (1..=MAX_VOLUMES).contains(&volume_count)
}

impl PhysicalLabel {
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < SECTOR_SIZE {
            return Err(Error::CorruptLabel("label sector too short"));
        }
        let label_type = read_le_u16(&sector[0x00..]);
        if label_type & 0x0001 == 0 {
            return Err(Error::CorruptLabel("not a hard-disk label"));
        }
        if read_le_u16(&sector[0x14..]) as usize != SECTOR_SIZE {
            return Err(Error::CorruptLabel("label sector size is not 512"));
        }
        let volume_count = read_le_u16(&sector[0x34..]) as usize;
        if !(1..=MAX_VOLUMES).contains(&volume_count) {
            return Err(Error::CorruptLabel("volume count out of range"));
        }
        let mut volume_addresses = Vec::with_capacity(volume_count);
        for i in 0..volume_count {
            volume_addresses.push(read_le_u32(&sector[0x36 + 4 * i..]));
        }
        let mut serial = [0u8; 16];
        serial.copy_from_slice(&sector[0x04..0x14]);
        let mut controller_params = [0u8; 16];
        controller_params.copy_from_slice(&sector[0x1C..0x2C]);
        Ok(Self {
            label_type,
            device_id: read_le_u16(&sector[0x02..]),
            serial,
            sector_size: SECTOR_SIZE as u16,
            ipl_vector: read_le_u32(&sector[0x16..]),
            primary_boot_volume: read_le_u16(&sector[0x1A..]),
            controller_params,
            available_media_list: read_le_u32(&sector[0x2C..]),
            working_media_list: read_le_u32(&sector[0x30..]),
            volume_addresses,
        })
    }

    /// Emit the label into a sector buffer; unspecified bytes stay zero.
    pub fn write_to(&self, sector: &mut [u8]) {
        sector[..SECTOR_SIZE].fill(0);
        write_le_u16(&mut sector[0x00..], self.label_type | 0x0001);
        write_le_u16(&mut sector[0x02..], self.device_id);
        sector[0x04..0x14].copy_from_slice(&self.serial);
        write_le_u16(&mut sector[0x14..], SECTOR_SIZE as u16);
        write_le_u32(&mut sector[0x16..], self.ipl_vector);
        write_le_u16(&mut sector[0x1A..], self.primary_boot_volume);
        sector[0x1C..0x2C].copy_from_slice(&self.controller_params);
        write_le_u32(&mut sector[0x2C..], self.available_media_list);
        write_le_u32(&mut sector[0x30..], self.working_media_list);
        write_le_u16(&mut sector[0x34..], self.volume_addresses.len() as u16);
        for (i, &address) in self.volume_addresses.iter().enumerate() {
            write_le_u32(&mut sector[0x36 + 4 * i..], address);
        }
    }
}

/// Virtual volume label, one per partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLabel {
    /// Offset 0x00.
    pub label_type: u16,
    /// Offset 0x02, 16 bytes, space padded.
    pub name: String,
    /// Offset 0x12.
    pub ipl_vector: u32,
    /// Offset 0x16. Total sectors of this volume.
    pub capacity_blocks: u32,
    /// Offset 0x1A. Volume-local first data sector.
    pub data_start_offset: u16,
    /// Offset 0x1C. Must be 512.
    pub host_block_size: u16,
    /// Offset 0x1E. Sectors per cluster.
    pub allocation_unit: u16,
    /// Offset 0x20.
    pub root_dir_entries: u16,
}

impl VolumeLabel {
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < SECTOR_SIZE {
            return Err(Error::CorruptLabel("volume label sector too short"));
        }
        if read_le_u16(&sector[0x1C..]) as usize != SECTOR_SIZE {
            return Err(Error::CorruptLabel("volume block size is not 512"));
        }
        let name: String = sector[0x02..0x12]
            .iter()
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end_matches([' ', '\0'])
            .to_string();
        Ok(Self {
            label_type: read_le_u16(&sector[0x00..]),
            name,
            ipl_vector: read_le_u32(&sector[0x12..]),
            capacity_blocks: read_le_u32(&sector[0x16..]),
            data_start_offset: read_le_u16(&sector[0x1A..]),
            host_block_size: SECTOR_SIZE as u16,
            allocation_unit: read_le_u16(&sector[0x1E..]),
            root_dir_entries: read_le_u16(&sector[0x20..]),
        })
    }

    pub fn write_to(&self, sector: &mut [u8]) {
        sector[..SECTOR_SIZE].fill(0);
        write_le_u16(&mut sector[0x00..], self.label_type);
        let mut name = [b' '; 16];
        for (i, &b) in self.name.as_bytes().iter().take(16).enumerate() {
            name[i] = b;
        }
        sector[0x02..0x12].copy_from_slice(&name);
        write_le_u32(&mut sector[0x12..], self.ipl_vector);
        write_le_u32(&mut sector[0x16..], self.capacity_blocks);
        write_le_u16(&mut sector[0x1A..], self.data_start_offset);
        write_le_u16(&mut sector[0x1C..], SECTOR_SIZE as u16);
        write_le_u16(&mut sector[0x1E..], self.allocation_unit);
        write_le_u16(&mut sector[0x20..], self.root_dir_entries);
    }

    /// Resolve the volume-local FAT12 layout described by this label.
    /// Layout order is fixed: label sector, FAT copies, root, data.
    pub fn geometry(&self) -> Result<Geometry> {
        if self.allocation_unit == 0 {
            return Err(Error::CorruptLabel("zero allocation unit"));
        }
        if self.root_dir_entries == 0 {
            return Err(Error::CorruptLabel("zero root directory entries"));
        }
        let root_sectors = sectors_needed(self.root_dir_entries as usize * DIRENT_SIZE);
        let data_start = self.data_start_offset as usize;
        if data_start <= 1 + root_sectors {
            return Err(Error::CorruptLabel("data start inside label or root"));
        }
        let fat_region = data_start - 1 - root_sectors;
        if fat_region % 2 != 0 {
            return Err(Error::CorruptLabel("FAT region does not split in two"));
        }
        let capacity = self.capacity_blocks as usize;
        if data_start >= capacity {
            return Err(Error::CorruptLabel("data start beyond capacity"));
        }
        let total_clusters = (capacity - data_start) / self.allocation_unit as usize;
        if total_clusters > MAX_CLUSTER_FAT12 {
            return Err(Error::CorruptLabel("too many clusters for FAT12"));
        }
        Ok(Geometry {
            total_sectors: capacity,
            reserved_sectors: 1,
            fat_count: 2,
            fat_sectors: fat_region / 2,
            root_dir_entries: self.root_dir_entries as usize,
            data_start_sector: data_start,
            sectors_per_cluster: self.allocation_unit as usize,
            total_clusters,
            media_descriptor: HD_MEDIA,
            variant: FormatVariant::VictorHdVolume,
            is_victor_boot_sector: false,
        })
    }
}

/// One row of the partition table listing.
#[derive(Debug, Clone)]
pub struct PartitionRow {
    pub index: usize,
    pub name: String,
    pub capacity_blocks: u32,
}

/// An opened Victor hard-disk image.
pub struct HardDisk {
    device: Arc<dyn BlockDevice>,
    label: PhysicalLabel,
}

impl HardDisk {
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut sector = vec![0u8; SECTOR_SIZE];
        device.read_sectors(0, &mut sector)?;
        let label = PhysicalLabel::parse(&sector)?;
        debug!("hard disk with {} volume(s)", label.volume_addresses.len());
        Ok(Self { device, label })
    }

    pub fn label(&self) -> &PhysicalLabel {
        &self.label
    }

    pub fn partition_count(&self) -> usize {
        self.label.volume_addresses.len()
    }

    fn volume_label(&self, index: usize) -> Result<VolumeLabel> {
        let count = self.partition_count();
        let address = *self
            .label
            .volume_addresses
            .get(index)
            .ok_or(Error::PartitionOutOfRange { index, count })?;
        let mut sector = vec![0u8; SECTOR_SIZE];
        self.device.read_sectors(address as usize, &mut sector)?;
        VolumeLabel::parse(&sector)
    }

    /// Synthetic listing of the virtual volumes: index, name, size.
    pub fn partition_table(&self) -> Result<Vec<PartitionRow>> {
        (0..self.partition_count())
            .map(|index| {
                let label = self.volume_label(index)?;
                Ok(PartitionRow {
                    index,
                    name: label.name,
                    capacity_blocks: label.capacity_blocks,
                })
            })
            .collect()
    }

    /// Mount the `index`-th virtual volume. All of its FAT and directory
    /// offsets are local to the slice starting at its label sector.
    pub fn volume(&self, index: usize) -> Result<Volume> {
        let address = self.label.volume_addresses[self.checked_index(index)?] as usize;
        let geometry = self.volume_label(index)?.geometry()?;
        Volume::open(Arc::clone(&self.device), geometry, address)
    }

    fn checked_index(&self, index: usize) -> Result<usize> {
        let count = self.partition_count();
        if index < count {
            Ok(index)
        } else {
            Err(Error::PartitionOutOfRange { index, count })
        }
    }
}

/// A detected image: either a single-volume floppy or a hard disk whose
/// operations need a partition selector.
pub enum Image {
    Floppy(Volume),
    HardDisk(HardDisk),
}

impl Image {
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let total_sectors = device.sector_count()?;
        let prefix_len = DETECT_PREFIX.min(total_sectors * SECTOR_SIZE);
        let mut prefix = vec![0u8; prefix_len - prefix_len % SECTOR_SIZE];
        if !prefix.is_empty() {
            device.read_sectors(0, &mut prefix)?;
        }
        match detect(&prefix, total_sectors * SECTOR_SIZE)? {
            Detection::VictorHardDisk => Ok(Image::HardDisk(HardDisk::open(device)?)),
            Detection::Floppy(geometry) => {
                Ok(Image::Floppy(Volume::open(device, geometry, 0)?))
            }
        }
    }

    /// Resolve the partition selector to a mounted volume, for every
    /// operation except `list`. Floppies take no selector; hard disks
    /// require one. `list` goes through [`Image::open_for_list`], which is
    /// the one place a bare hard-disk path is meaningful.
    pub fn volume(self, partition: Option<usize>) -> Result<Volume> {
        match (self, partition) {
            (Image::Floppy(volume), None) => Ok(volume),
            (Image::Floppy(_), Some(index)) => {
                Err(Error::PartitionOutOfRange { index, count: 0 })
            }
            (Image::HardDisk(disk), Some(index)) => disk.volume(index),
            (Image::HardDisk(_), None) => Err(Error::PartitionRequired),
        }
    }

    /// Dispatch for `list`. A hard-disk path without a partition selector
    /// lists the partition table, one synthetic row per virtual volume;
    /// everything else mounts the volume for a directory listing.
    pub fn open_for_list(self, partition: Option<usize>) -> Result<ListTarget> {
        match (self, partition) {
            (Image::HardDisk(disk), None) => {
                Ok(ListTarget::PartitionTable(disk.partition_table()?))
            }
            (image, partition) => Ok(ListTarget::Volume(image.volume(partition)?)),
        }
    }
}

/// What a `list` request operates on; see [`Image::open_for_list`].
pub enum ListTarget {
    /// A mounted volume; enumerate it with [`Volume::list`] or
    /// [`Volume::list_path`].
    Volume(Volume),
    /// A bare hard-disk path: the partition table rows.
    PartitionTable(Vec<PartitionRow>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_label_round_trip() {
        let label = PhysicalLabel {
            label_type: 0x0001,
            device_id: 0x0002,
            serial: *b"VICTOR9000SERIAL",
            sector_size: 512,
            ipl_vector: 0x0000_0800,
            primary_boot_volume: 0,
            controller_params: [0xAA; 16],
            available_media_list: 0x100,
            working_media_list: 0x110,
            volume_addresses: vec![0x40, 0x2000],
        };
        let mut sector = vec![0u8; SECTOR_SIZE];
        label.write_to(&mut sector);
        assert!(looks_like_physical_label(&sector));
        assert_eq!(PhysicalLabel::parse(&sector).unwrap(), label);
    }

    #[test]
    fn volume_label_geometry() {
        let label = VolumeLabel {
            label_type: 0,
            name: "WINNIE".to_string(),
            ipl_vector: 0,
            capacity_blocks: 0x1FC0,
            data_start_offset: 25,
            host_block_size: 512,
            allocation_unit: 16,
            root_dir_entries: 128,
        };
        let mut sector = vec![0u8; SECTOR_SIZE];
        label.write_to(&mut sector);
        let parsed = VolumeLabel::parse(&sector).unwrap();
        assert_eq!(parsed, label);

        // 25 = 1 label + 2*8 FAT + 8 root
        let geometry = parsed.geometry().unwrap();
        assert_eq!(geometry.fat_sectors, 8);
        assert_eq!(geometry.root_dir_start_sector(), 17);
        assert_eq!(geometry.data_start_sector, 25);
        assert_eq!(geometry.sectors_per_cluster, 16);
        assert_eq!(geometry.total_clusters, (0x1FC0 - 25) / 16);
        assert_eq!(geometry.variant, FormatVariant::VictorHdVolume);
    }

    #[test]
    fn inconsistent_volume_label_rejected() {
        let mut label = VolumeLabel {
            label_type: 0,
            name: "BAD".to_string(),
            ipl_vector: 0,
            capacity_blocks: 0x1000,
            data_start_offset: 9,
            host_block_size: 512,
            allocation_unit: 0,
            root_dir_entries: 128,
        };
        let mut sector = vec![0u8; SECTOR_SIZE];
        label.write_to(&mut sector);
        assert!(matches!(
            VolumeLabel::parse(&sector).unwrap().geometry(),
            Err(Error::CorruptLabel(_))
        ));

        // data start would leave an odd FAT region
        label.allocation_unit = 16;
        label.data_start_offset = 18;
        label.write_to(&mut sector);
        assert!(matches!(
            VolumeLabel::parse(&sector).unwrap().geometry(),
            Err(Error::CorruptLabel(_))
        ));
    }
}
