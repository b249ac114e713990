//! Boot sector codecs.
//!
//! Two unrelated boot-sector families share sector 0 duty here.
//!
//! The IBM PC floppy boot sector carries a BIOS Parameter Block (BPB) at
//! offset 0x0B and the 0x55AA signature word at offset 0x1FE. The BPB fields
//! read by this engine stop at offset 0x24; everything after that is boot
//! code we never interpret.
//!
//! The Victor 9000 floppy boot sector predates the BPB and has its own
//! layout: a system id word at offset 0, the sector size at offset 26, the
//! first data sector at offset 28, a flags word at offset 32 whose bit 0
//! distinguishes double-sided media, and a disc type byte at offset 34.
//! Real-world dumps frequently carry zeroed header fields, so the geometry
//! layer supplies defaults rather than rejecting them.

use crate::error::{Error, Result};
use crate::geometry::FormatVariant;
use crate::{read_le_u16, write_le_u16, BOOT_SIGNATURE, SECTOR_SIZE, VICTOR_SYSTEM_ID};

/// The slice of the IBM PC boot sector this engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosParameterBlock {
    /// Bytes per sector    Size: 2 bytes    Offset: 0x0B    Must be 512.
    pub bytes_per_sector: u16,
    /// Sectors per cluster    Size: 1 byte    Offset: 0x0D
    pub sectors_per_cluster: u8,
    /// Reserved sector count    Size: 2 bytes    Offset: 0x0E
    pub reserved_sectors: u16,
    /// Number of FATs    Size: 1 byte    Offset: 0x10    Always 2 here.
    pub num_fats: u8,
    /// Root directory entry count    Size: 2 bytes    Offset: 0x11
    pub root_entries: u16,
    /// Total sectors (16-bit form)    Size: 2 bytes    Offset: 0x13
    pub total_sectors16: u16,
    /// Media descriptor    Size: 1 byte    Offset: 0x15
    pub media: u8,
    /// Sectors per FAT    Size: 2 bytes    Offset: 0x16
    pub fat_size16: u16,
    /// Sectors per track    Size: 2 bytes    Offset: 0x18
    pub sectors_per_track: u16,
    /// Number of heads    Size: 2 bytes    Offset: 0x1A
    pub num_heads: u16,
}

impl BiosParameterBlock {
    pub fn parse(sector: &[u8]) -> Self {
        Self {
            bytes_per_sector: read_le_u16(&sector[0x0B..]),
            sectors_per_cluster: sector[0x0D],
            reserved_sectors: read_le_u16(&sector[0x0E..]),
            num_fats: sector[0x10],
            root_entries: read_le_u16(&sector[0x11..]),
            total_sectors16: read_le_u16(&sector[0x13..]),
            media: sector[0x15],
            fat_size16: read_le_u16(&sector[0x16..]),
            sectors_per_track: read_le_u16(&sector[0x18..]),
            num_heads: read_le_u16(&sector[0x1A..]),
        }
    }

    /// Internal consistency gate used by the detector. Deliberately narrow:
    /// only values a FAT12 floppy can actually carry pass.
    pub fn is_consistent(&self) -> bool {
        self.bytes_per_sector as usize == SECTOR_SIZE
            && matches!(self.sectors_per_cluster, 1 | 2 | 4 | 8)
            && self.num_fats == 2
            && self.total_sectors16 > 0
            && self.fat_size16 > 0
    }

    /// Canonical BPB for a freshly formatted variant, exactly as MS-DOS
    /// FORMAT would write it.
    pub fn for_variant(variant: FormatVariant) -> Result<Self> {
        let (spc, root_entries, total, media, fat_size, spt) = match variant {
            FormatVariant::IbmPc360 => (2, 112, 720, 0xF9, 2, 9),
            FormatVariant::IbmPc720 => (2, 112, 1440, 0xF9, 3, 9),
            FormatVariant::IbmPc12M => (1, 224, 2400, 0xF9, 7, 15),
            FormatVariant::IbmPc144M => (1, 224, 2880, 0xF0, 9, 18),
            _ => return Err(Error::UnknownFormat),
        };
        Ok(Self {
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster: spc,
            reserved_sectors: 1,
            num_fats: 2,
            root_entries,
            total_sectors16: total,
            media,
            fat_size16: fat_size,
            sectors_per_track: spt,
            num_heads: 2,
        })
    }

    /// Emit a complete boot sector: jump stub, OEM name, BPB, signature.
    /// The boot code area stays zero.
    pub fn write_boot_sector(&self, sector: &mut [u8]) {
        sector[..SECTOR_SIZE].fill(0);
        sector[0] = 0xEB;
        sector[1] = 0x3C;
        sector[2] = 0x90;
        sector[0x03..0x0B].copy_from_slice(b"FAT12RS ");
        write_le_u16(&mut sector[0x0B..], self.bytes_per_sector);
        sector[0x0D] = self.sectors_per_cluster;
        write_le_u16(&mut sector[0x0E..], self.reserved_sectors);
        sector[0x10] = self.num_fats;
        write_le_u16(&mut sector[0x11..], self.root_entries);
        write_le_u16(&mut sector[0x13..], self.total_sectors16);
        sector[0x15] = self.media;
        write_le_u16(&mut sector[0x16..], self.fat_size16);
        write_le_u16(&mut sector[0x18..], self.sectors_per_track);
        write_le_u16(&mut sector[0x1A..], self.num_heads);
        write_le_u16(&mut sector[0x1FE..], BOOT_SIGNATURE);
    }
}

/// Does the sector end with the 0x55AA signature word?
pub fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= SECTOR_SIZE && read_le_u16(&sector[0x1FE..]) == BOOT_SIGNATURE
}

/// Victor 9000 floppy boot sector header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VictorBootSector {
    /// System id    Size: 2 bytes    Offset: 0    0xFF00 on written media.
    pub system_id: u16,
    /// Sector size    Size: 2 bytes    Offset: 26
    pub sector_size: u16,
    /// First data sector    Size: 2 bytes    Offset: 28    0 in many dumps.
    pub data_start: u16,
    /// Flags    Size: 2 bytes    Offset: 32    Bit 0 set = double-sided.
    pub flags: u16,
    /// Disc type    Size: 1 byte    Offset: 34
    pub disc_type: u8,
}

impl VictorBootSector {
    pub fn parse(sector: &[u8]) -> Self {
        Self {
            system_id: read_le_u16(&sector[0..]),
            sector_size: read_le_u16(&sector[26..]),
            data_start: read_le_u16(&sector[28..]),
            flags: read_le_u16(&sector[32..]),
            disc_type: sector[34],
        }
    }

    pub fn is_double_sided(&self) -> bool {
        self.flags & 0x0001 != 0
    }

    /// Canonical header for a freshly formatted Victor floppy. The rest of
    /// the sector stays zero; the original systems boot fine without a
    /// loader payload in image files.
    pub fn for_variant(double_sided: bool) -> Self {
        Self {
            system_id: VICTOR_SYSTEM_ID,
            sector_size: SECTOR_SIZE as u16,
            data_start: if double_sided { 13 } else { 11 },
            flags: if double_sided { 0x0001 } else { 0x0000 },
            disc_type: 0x10,
        }
    }

    pub fn write_boot_sector(&self, sector: &mut [u8]) {
        sector[..SECTOR_SIZE].fill(0);
        write_le_u16(&mut sector[0..], self.system_id);
        write_le_u16(&mut sector[26..], self.sector_size);
        write_le_u16(&mut sector[28..], self.data_start);
        write_le_u16(&mut sector[32..], self.flags);
        sector[34] = self.disc_type;
    }
}
