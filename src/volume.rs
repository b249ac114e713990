//! One mounted FAT12 volume.
//!
//! A volume owns its resolved geometry and the in-memory FAT cache, and sees
//! the image through a byte slice: sector 0 of the volume is
//! `slice_start_sector` of the device. Floppies use the whole image; Victor
//! hard-disk volumes use the span their label describes.
//!
//! Mutations stage in memory. The commit order inside a single operation is
//! fixed: data sectors first, then FAT copy 1, then FAT copy 2, then the
//! affected directory sector. A crash between any two steps leaves orphan
//! clusters or a stale entry, both of which `verify` reports.

use crate::device::BlockDevice;
use crate::dir::DirHandle;
use crate::error::{Error, Result};
use crate::fat::Fat;
use crate::geometry::{detect, Detection, FormatVariant, Geometry, DETECT_PREFIX};
use crate::SECTOR_SIZE;

use log::debug;
use std::sync::Arc;

pub struct Volume {
    device: Arc<dyn BlockDevice>,
    geometry: Geometry,
    fat: Fat,
    slice_start_sector: usize,
    alloc_cursor: u32,
}

impl Volume {
    /// Mount a volume whose geometry is already resolved. Loads FAT copy 1.
    pub fn open(
        device: Arc<dyn BlockDevice>,
        geometry: Geometry,
        slice_start_sector: usize,
    ) -> Result<Self> {
        let mut volume = Self {
            device,
            geometry,
            fat: Fat::from_bytes(vec![0u8; geometry.fat_bytes()], geometry.total_clusters),
            slice_start_sector,
            alloc_cursor: 2,
        };
        volume.reload_fat()?;
        debug!(
            "mounted {} volume, {} clusters",
            geometry.variant.as_str(),
            geometry.total_clusters
        );
        Ok(volume)
    }

    /// Detect and mount a floppy image. Hard-disk images need a partition
    /// selector and are mounted through [`crate::label::Image`].
    pub fn open_floppy(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let total_sectors = device.sector_count()?;
        let mut prefix = vec![0u8; DETECT_PREFIX.min(total_sectors * SECTOR_SIZE)];
        if !prefix.is_empty() {
            device.read_sectors(0, &mut prefix)?;
        }
        match detect(&prefix, total_sectors * SECTOR_SIZE)? {
            Detection::Floppy(geometry) => Self::open(device, geometry, 0),
            Detection::VictorHardDisk => Err(Error::PartitionRequired),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn variant(&self) -> FormatVariant {
        self.geometry.variant
    }

    pub fn fat(&self) -> &Fat {
        &self.fat
    }

    pub(crate) fn fat_mut(&mut self) -> &mut Fat {
        &mut self.fat
    }

    pub(crate) fn alloc_cursor_mut(&mut self) -> &mut u32 {
        &mut self.alloc_cursor
    }

    pub fn read_fat_entry(&self, cluster: u32) -> u16 {
        self.fat.get(cluster)
    }

    pub fn write_fat_entry(&mut self, cluster: u32, value: u16) {
        self.fat.set(cluster, value);
    }

    /// Read whole sectors, volume-local addressing.
    pub(crate) fn read_sectors(&self, sector: usize, buf: &mut [u8]) -> Result<()> {
        self.device
            .read_sectors(self.slice_start_sector + sector, buf)
    }

    pub(crate) fn write_sectors(&self, sector: usize, buf: &[u8]) -> Result<()> {
        self.device
            .write_sectors(self.slice_start_sector + sector, buf)
    }

    pub(crate) fn read_sector(&self, sector: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        self.read_sectors(sector, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.geometry.cluster_bytes()];
        self.read_sectors(self.geometry.first_sector_of_cluster(cluster), &mut buf)?;
        Ok(buf)
    }

    /// Write one cluster; `data` shorter than a cluster is zero-padded.
    pub(crate) fn write_cluster(&self, cluster: u32, data: &[u8]) -> Result<()> {
        let cluster_bytes = self.geometry.cluster_bytes();
        assert!(data.len() <= cluster_bytes);
        let mut buf = vec![0u8; cluster_bytes];
        buf[..data.len()].copy_from_slice(data);
        self.write_sectors(self.geometry.first_sector_of_cluster(cluster), &buf)
    }

    /// Write both FAT copies in full from the cache. Copy 1 goes first.
    pub fn flush_fat(&mut self) -> Result<()> {
        if !self.fat.is_dirty() {
            return Ok(());
        }
        let bytes = self.fat.bytes().to_vec();
        for copy in 0..self.geometry.fat_count {
            self.write_sectors(self.geometry.fat_start_sector(copy), &bytes)?;
        }
        self.fat.mark_clean();
        Ok(())
    }

    /// Discard staged FAT changes and re-read copy 1 from disk.
    pub(crate) fn reload_fat(&mut self) -> Result<()> {
        let mut bytes = vec![0u8; self.geometry.fat_bytes()];
        self.read_sectors(self.geometry.fat_start_sector(0), &mut bytes)?;
        self.fat = Fat::from_bytes(bytes, self.geometry.total_clusters);
        Ok(())
    }

    /// Read the second FAT copy from disk, for entry-level comparison.
    pub(crate) fn read_fat_copy(&self, copy: usize) -> Result<Fat> {
        let mut bytes = vec![0u8; self.geometry.fat_bytes()];
        self.read_sectors(self.geometry.fat_start_sector(copy), &mut bytes)?;
        Ok(Fat::from_bytes(bytes, self.geometry.total_clusters))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.flush_fat()
    }

    pub fn root(&self) -> DirHandle {
        DirHandle::FixedRoot
    }

    /// The root volume-label entry, if one exists. Labels are filtered out
    /// of `list`, so this scans the raw slots.
    pub fn volume_label(&self) -> Result<Option<String>> {
        for (_, entry) in self.dir_slots(&DirHandle::FixedRoot)? {
            if !entry.is_deleted() && !entry.is_long_name() && entry.is_volume_label() {
                return Ok(Some(entry.name()));
            }
        }
        Ok(None)
    }

    /// Usage statistics and a geometry summary.
    pub fn info(&self) -> Result<Stats> {
        let free_clusters = self.fat.count_free();
        let total_clusters = self.geometry.total_clusters;
        let mut file_count = 0usize;
        let mut dir_count = 0usize;
        for result in self.list(&DirHandle::FixedRoot, None, true)? {
            let listed = result?;
            if listed.entry.is_dir() {
                dir_count += 1;
            } else {
                file_count += 1;
            }
        }
        Ok(Stats {
            variant: self.geometry.variant,
            volume_label: self.volume_label()?,
            total_clusters,
            free_clusters,
            used_clusters: total_clusters - free_clusters,
            cluster_bytes: self.geometry.cluster_bytes(),
            total_bytes: total_clusters * self.geometry.cluster_bytes(),
            free_bytes: free_clusters * self.geometry.cluster_bytes(),
            file_count,
            dir_count,
            geometry: self.geometry,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub variant: FormatVariant,
    pub volume_label: Option<String>,
    pub total_clusters: usize,
    pub free_clusters: usize,
    pub used_clusters: usize,
    pub cluster_bytes: usize,
    pub total_bytes: usize,
    pub free_bytes: usize,
    pub file_count: usize,
    pub dir_count: usize,
    pub geometry: Geometry,
}
