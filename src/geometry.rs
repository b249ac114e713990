//! Format detection and geometry resolution.
//!
//! A resolved [`Geometry`] is immutable and answers every layout question
//! the upper layers have: where each FAT copy lives, where the root
//! directory is, and how cluster numbers map to sectors. Detection works on
//! the first 2 KB of the image plus its total length, and is deliberately
//! tolerant of the zeroed header fields found in real-world dumps.

use crate::bpb::{has_boot_signature, BiosParameterBlock, VictorBootSector};
use crate::error::{Error, Result};
use crate::label;
use crate::{sectors_needed, DIRENT_SIZE, SECTOR_SIZE, VICTOR_MEDIA, VICTOR_SYSTEM_ID};

use log::{debug, warn};

/// Canonical sector counts of freshly formatted Victor floppies.
pub const VICTOR_SS_SECTORS: usize = 1224;
pub const VICTOR_DS_SECTORS: usize = 2448;

/// Detection needs this many bytes from the front of the image.
pub const DETECT_PREFIX: usize = 2048;

const HARD_DISK_MIN_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVariant {
    VictorSS,
    VictorDS,
    IbmPc360,
    IbmPc720,
    IbmPc12M,
    IbmPc144M,
    /// One virtual volume of a Victor hard disk.
    VictorHdVolume,
}

impl FormatVariant {
    pub fn is_victor_floppy(&self) -> bool {
        matches!(self, FormatVariant::VictorSS | FormatVariant::VictorDS)
    }

    /// Image size of a freshly created floppy of this variant.
    pub fn image_bytes(&self) -> Option<usize> {
        let sectors = match self {
            FormatVariant::VictorSS => VICTOR_SS_SECTORS,
            FormatVariant::VictorDS => VICTOR_DS_SECTORS,
            FormatVariant::IbmPc360 => 720,
            FormatVariant::IbmPc720 => 1440,
            FormatVariant::IbmPc12M => 2400,
            FormatVariant::IbmPc144M => 2880,
            FormatVariant::VictorHdVolume => return None,
        };
        Some(sectors * SECTOR_SIZE)
    }

    fn from_ibm_total_sectors(total: u16) -> Option<Self> {
        match total {
            720 => Some(FormatVariant::IbmPc360),
            1440 => Some(FormatVariant::IbmPc720),
            2400 => Some(FormatVariant::IbmPc12M),
            2880 => Some(FormatVariant::IbmPc144M),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatVariant::VictorSS => "Victor 9000 single-sided",
            FormatVariant::VictorDS => "Victor 9000 double-sided",
            FormatVariant::IbmPc360 => "IBM PC 360K",
            FormatVariant::IbmPc720 => "IBM PC 720K",
            FormatVariant::IbmPc12M => "IBM PC 1.2M",
            FormatVariant::IbmPc144M => "IBM PC 1.44M",
            FormatVariant::VictorHdVolume => "Victor 9000 hard-disk volume",
        }
    }
}

/// Resolved layout of one FAT12 volume. All sector numbers are local to the
/// volume's image slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub total_sectors: usize,
    pub reserved_sectors: usize,
    pub fat_count: usize,
    pub fat_sectors: usize,
    pub root_dir_entries: usize,
    pub data_start_sector: usize,
    pub sectors_per_cluster: usize,
    pub total_clusters: usize,
    pub media_descriptor: u8,
    pub variant: FormatVariant,
    pub is_victor_boot_sector: bool,
}

impl Geometry {
    pub fn from_bpb(bpb: &BiosParameterBlock, variant: FormatVariant) -> Self {
        let total_sectors = bpb.total_sectors16 as usize;
        let reserved = bpb.reserved_sectors as usize;
        let fat_sectors = bpb.fat_size16 as usize;
        let root_entries = bpb.root_entries as usize;
        let spc = bpb.sectors_per_cluster as usize;
        let data_start = reserved
            + bpb.num_fats as usize * fat_sectors
            + sectors_needed(root_entries * DIRENT_SIZE);
        Self {
            total_sectors,
            reserved_sectors: reserved,
            fat_count: bpb.num_fats as usize,
            fat_sectors,
            root_dir_entries: root_entries,
            data_start_sector: data_start,
            sectors_per_cluster: spc,
            total_clusters: (total_sectors - data_start) / spc,
            media_descriptor: bpb.media,
            variant,
            is_victor_boot_sector: false,
        }
    }

    /// Victor floppy layout is fixed apart from the data start, which many
    /// dumps leave zeroed in the boot sector.
    pub fn victor_floppy(double_sided: bool, data_start: u16, total_sectors: usize) -> Self {
        let fat_sectors = if double_sided { 2 } else { 1 };
        let data_start = if data_start != 0 {
            data_start as usize
        } else if double_sided {
            13
        } else {
            11
        };
        Self {
            total_sectors,
            reserved_sectors: 1,
            fat_count: 2,
            fat_sectors,
            root_dir_entries: 128,
            data_start_sector: data_start,
            sectors_per_cluster: 4,
            total_clusters: (total_sectors - data_start) / 4,
            media_descriptor: VICTOR_MEDIA,
            variant: if double_sided {
                FormatVariant::VictorDS
            } else {
                FormatVariant::VictorSS
            },
            is_victor_boot_sector: true,
        }
    }

    pub fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster * SECTOR_SIZE
    }

    pub fn fat_bytes(&self) -> usize {
        self.fat_sectors * SECTOR_SIZE
    }

    pub fn fat_start_sector(&self, copy: usize) -> usize {
        self.reserved_sectors + copy * self.fat_sectors
    }

    pub fn root_dir_sectors(&self) -> usize {
        sectors_needed(self.root_dir_entries * DIRENT_SIZE)
    }

    pub fn root_dir_start_sector(&self) -> usize {
        self.reserved_sectors + self.fat_count * self.fat_sectors
    }

    /// Sector of cluster `c`; the first data cluster is 2.
    pub fn first_sector_of_cluster(&self, cluster: u32) -> usize {
        assert!(cluster >= 2);
        self.data_start_sector + (cluster as usize - 2) * self.sectors_per_cluster
    }

    /// Largest valid cluster number for this volume.
    pub fn max_cluster(&self) -> u32 {
        self.total_clusters as u32 + 1
    }

    pub fn contains_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster <= self.max_cluster()
    }
}

/// What the detector decided about an image.
#[derive(Debug)]
pub enum Detection {
    /// Sector 0 is a Victor physical disk label; geometry comes from the
    /// selected virtual volume label.
    VictorHardDisk,
    Floppy(Geometry),
}

/// Pick exactly one variant for the image. `prefix` is the first
/// [`DETECT_PREFIX`] bytes (shorter images pass what they have).
pub fn detect(prefix: &[u8], total_len: usize) -> Result<Detection> {
    if prefix.len() < SECTOR_SIZE {
        return Err(Error::UnknownFormat);
    }

    if total_len >= HARD_DISK_MIN_BYTES && label::looks_like_physical_label(prefix) {
        debug!("detected Victor hard-disk label");
        return Ok(Detection::VictorHardDisk);
    }

    if has_boot_signature(prefix) {
        let bpb = BiosParameterBlock::parse(prefix);
        if bpb.is_consistent() {
            match FormatVariant::from_ibm_total_sectors(bpb.total_sectors16) {
                Some(variant) => {
                    debug!("detected {} from BPB", variant.as_str());
                    return Ok(Detection::Floppy(Geometry::from_bpb(&bpb, variant)));
                }
                None => {
                    warn!(
                        "consistent BPB with unsupported sector count {}",
                        bpb.total_sectors16
                    );
                    return Err(Error::UnknownFormat);
                }
            }
        }
    }

    let boot = VictorBootSector::parse(prefix);
    let total_sectors = total_len / SECTOR_SIZE;
    // A zeroed boot sector carries no positive evidence of Victor media, so
    // the canonical media sizes count as evidence too. Without any, the file
    // falls through to the headerless-IBM legacy rule.
    let evidence = boot.system_id == VICTOR_SYSTEM_ID
        || boot.sector_size as usize == SECTOR_SIZE
        || boot.data_start != 0
        || boot.is_double_sided()
        || total_sectors == VICTOR_SS_SECTORS
        || total_sectors == VICTOR_DS_SECTORS;
    if evidence && total_len % SECTOR_SIZE == 0 {
        if boot.sector_size != 0 && boot.sector_size as usize != SECTOR_SIZE {
            return Err(Error::CorruptBootSector("victor sector size is not 512"));
        }
        let geometry =
            Geometry::victor_floppy(boot.is_double_sided(), boot.data_start, total_sectors);
        if geometry.data_start_sector < total_sectors {
            debug!("detected {}", geometry.variant.as_str());
            return Ok(Detection::Floppy(geometry));
        }
    }

    // Legacy fallback: raw IBM PC images without a boot sector, recognised
    // by their exact length.
    for variant in [
        FormatVariant::IbmPc360,
        FormatVariant::IbmPc720,
        FormatVariant::IbmPc12M,
        FormatVariant::IbmPc144M,
    ] {
        if variant.image_bytes() == Some(total_len) {
            debug!("headerless image treated as {}", variant.as_str());
            let bpb = BiosParameterBlock::for_variant(variant)?;
            return Ok(Detection::Floppy(Geometry::from_bpb(&bpb, variant)));
        }
    }

    Err(Error::UnknownFormat)
}
