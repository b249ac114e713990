//! Image creation.
//!
//! A fresh image is written region by region: filler, boot sector, both FAT
//! copies, root directory, optional volume label. Victor floppies get the
//! MS-DOS FORMAT filler byte 0xF6; IBM images are zero-filled. The result
//! must be bootable media as far as the original operating systems care, so
//! every field is written exactly as the period formatters wrote it.

use crate::bpb::{BiosParameterBlock, VictorBootSector};
use crate::device::BlockDevice;
use crate::entry::{DirEntry, Timestamp};
use crate::error::{Error, Result};
use crate::fat::Fat;
use crate::geometry::{FormatVariant, Geometry};
use crate::{SECTOR_SIZE, VICTOR_FORMAT_FILL};

use log::debug;
use std::io::{Error as IoError, ErrorKind};

const FILL_CHUNK_SECTORS: usize = 64;

/// Materialise a pristine floppy image on `device`, which must already be
/// sized for the variant.
pub fn create_image(
    device: &dyn BlockDevice,
    variant: FormatVariant,
    label: Option<&str>,
    mtime: Timestamp,
) -> Result<()> {
    let image_bytes = variant.image_bytes().ok_or(Error::UnknownFormat)?;
    if device.sector_count()? * SECTOR_SIZE != image_bytes {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            "device size does not match the requested variant",
        )
        .into());
    }
    let total_sectors = image_bytes / SECTOR_SIZE;

    let geometry = match variant {
        FormatVariant::VictorSS => Geometry::victor_floppy(false, 0, total_sectors),
        FormatVariant::VictorDS => Geometry::victor_floppy(true, 0, total_sectors),
        FormatVariant::VictorHdVolume => return Err(Error::UnknownFormat),
        _ => Geometry::from_bpb(&BiosParameterBlock::for_variant(variant)?, variant),
    };

    let filler = if variant.is_victor_floppy() {
        VICTOR_FORMAT_FILL
    } else {
        0x00
    };
    fill(device, total_sectors, filler)?;

    let mut boot = vec![0u8; SECTOR_SIZE];
    match variant {
        FormatVariant::VictorSS => VictorBootSector::for_variant(false).write_boot_sector(&mut boot),
        FormatVariant::VictorDS => VictorBootSector::for_variant(true).write_boot_sector(&mut boot),
        _ => BiosParameterBlock::for_variant(variant)?.write_boot_sector(&mut boot),
    }
    device.write_sectors(0, &boot)?;

    // both FAT copies, entries 0 and 1 seeded
    let fat = Fat::new_formatted(
        geometry.fat_sectors,
        geometry.total_clusters,
        geometry.media_descriptor,
    );
    for copy in 0..geometry.fat_count {
        device.write_sectors(geometry.fat_start_sector(copy), fat.bytes())?;
    }

    let root_zeros = vec![0u8; geometry.root_dir_sectors() * SECTOR_SIZE];
    device.write_sectors(geometry.root_dir_start_sector(), &root_zeros)?;

    if let Some(label) = label {
        let entry = DirEntry::volume_label(label, mtime)?;
        let mut first_root = vec![0u8; SECTOR_SIZE];
        device.read_sectors(geometry.root_dir_start_sector(), &mut first_root)?;
        first_root[..32].copy_from_slice(entry.as_bytes());
        device.write_sectors(geometry.root_dir_start_sector(), &first_root)?;
    }

    debug!(
        "created {} image, {} sectors",
        variant.as_str(),
        total_sectors
    );
    Ok(())
}

fn fill(device: &dyn BlockDevice, total_sectors: usize, filler: u8) -> Result<()> {
    let chunk = vec![filler; FILL_CHUNK_SECTORS * SECTOR_SIZE];
    let mut sector = 0;
    while sector < total_sectors {
        let count = FILL_CHUNK_SECTORS.min(total_sectors - sector);
        device.write_sectors(sector, &chunk[..count * SECTOR_SIZE])?;
        sector += count;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::read_le_u16;

    fn ts() -> Timestamp {
        Timestamp {
            year: 1984,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 6,
        }
    }

    #[test]
    fn create_144m_layout() {
        let device = MemDevice::new(FormatVariant::IbmPc144M.image_bytes().unwrap());
        create_image(&device, FormatVariant::IbmPc144M, Some("HELLO"), ts()).unwrap();
        let image = device.snapshot();

        assert_eq!(image.len(), 1_474_560);
        assert_eq!(&image[0x1FE..0x200], &[0x55, 0xAA]);

        // FAT1 at sectors 1-9, FAT2 at 10-18: entry 0 = 0xFF0, entry 1 = 0xFFF
        for fat_start in [1 * SECTOR_SIZE, 10 * SECTOR_SIZE] {
            assert_eq!(image[fat_start], 0xF0);
            assert_eq!(image[fat_start + 1], 0xFF);
            assert_eq!(image[fat_start + 2], 0xFF);
        }
        assert_eq!(&image[SECTOR_SIZE..SECTOR_SIZE + 9 * SECTOR_SIZE],
                   &image[10 * SECTOR_SIZE..10 * SECTOR_SIZE + 9 * SECTOR_SIZE]);

        // first root entry at sector 19 is the volume label
        let root = 19 * SECTOR_SIZE;
        assert_eq!(&image[root..root + 11], b"HELLO      ");
        assert_eq!(image[root + 11], 0x08);
        // and nothing after it
        assert_eq!(image[root + 32], 0x00);
    }

    #[test]
    fn create_victor_ds_fill_and_header() {
        let device = MemDevice::new(FormatVariant::VictorDS.image_bytes().unwrap());
        create_image(&device, FormatVariant::VictorDS, None, ts()).unwrap();
        let image = device.snapshot();

        assert_eq!(read_le_u16(&image[0..]), 0xFF00);
        assert_eq!(read_le_u16(&image[26..]), 512);
        assert_eq!(read_le_u16(&image[28..]), 13);
        assert_eq!(read_le_u16(&image[32..]), 0x0001);
        assert_eq!(image[34], 0x10);

        // FAT1 at sector 1: media 0x01 seeds
        assert_eq!(image[SECTOR_SIZE], 0x01);
        assert_eq!(image[SECTOR_SIZE + 1], 0xFF);
        assert_eq!(image[SECTOR_SIZE + 2], 0xFF);

        // data area keeps the FORMAT filler
        assert_eq!(image[13 * SECTOR_SIZE], 0xF6);
        assert_eq!(*image.last().unwrap(), 0xF6);
        // root directory is zeroed
        assert_eq!(image[5 * SECTOR_SIZE], 0x00);
    }

    #[test]
    fn wrong_device_size_refused() {
        let device = MemDevice::new(1024);
        assert!(create_image(&device, FormatVariant::IbmPc360, None, ts()).is_err());
    }

    #[test]
    fn hard_disk_variant_not_creatable() {
        let device = MemDevice::new(4 * 1024 * 1024);
        assert!(matches!(
            create_image(&device, FormatVariant::VictorHdVolume, None, ts()),
            Err(Error::UnknownFormat)
        ));
    }
}
