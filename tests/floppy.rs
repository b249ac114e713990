//! End-to-end floppy scenarios against in-memory and file-backed images.

use fat12::device::{ImageFile, MemDevice};
use fat12::entry::Timestamp;
use fat12::format::create_image;
use fat12::{Error, FormatVariant, Volume, ATTR_ARCHIVE, ATTR_READ_ONLY, SECTOR_SIZE};

use std::sync::Arc;

fn ts() -> Timestamp {
    Timestamp {
        year: 1983,
        month: 6,
        day: 14,
        hour: 10,
        minute: 30,
        second: 24,
    }
}

fn fresh_volume(variant: FormatVariant, label: Option<&str>) -> (Arc<MemDevice>, Volume) {
    let device = Arc::new(MemDevice::new(variant.image_bytes().unwrap()));
    create_image(device.as_ref(), variant, label, ts()).unwrap();
    let volume = Volume::open_floppy(device.clone()).unwrap();
    (device, volume)
}

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn fresh_image_lists_only_the_label() {
    let (_, volume) = fresh_volume(FormatVariant::IbmPc144M, Some("HELLO"));
    let entries: Vec<_> = volume
        .list(&volume.root(), None, true)
        .unwrap()
        .collect::<fat12::Result<Vec<_>>>()
        .unwrap();
    assert!(entries.is_empty());
    assert_eq!(volume.volume_label().unwrap().as_deref(), Some("HELLO"));
    assert!(volume.verify().unwrap().is_clean());
}

#[test]
fn floppy_list_dispatch_needs_no_partition() {
    use fat12::label::{Image, ListTarget};

    let device = Arc::new(MemDevice::new(FormatVariant::IbmPc360.image_bytes().unwrap()));
    create_image(device.as_ref(), FormatVariant::IbmPc360, None, ts()).unwrap();
    match Image::open(device).unwrap().open_for_list(None).unwrap() {
        ListTarget::Volume(volume) => {
            assert!(volume
                .list(&volume.root(), None, false)
                .unwrap()
                .next()
                .is_none());
        }
        ListTarget::PartitionTable(_) => panic!("floppies have no partition table"),
    }
}

#[test]
fn command_com_extraction() {
    // 26,912 bytes on a Victor DS floppy: 13 full clusters plus 288 bytes
    let (_, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    let data = pattern_bytes(26_912);
    volume
        .copy_in(&["COMMAND.COM"], &data, false, ATTR_ARCHIVE, ts())
        .unwrap();

    let (_, entry) = volume.resolve_entry(&["COMMAND.COM"]).unwrap();
    assert_eq!(entry.file_size(), 26_912);
    assert_eq!(volume.fat().chain_len(entry.first_cluster()).unwrap(), 14);

    let out = volume.copy_out(&["COMMAND.COM"]).unwrap();
    assert_eq!(out.len(), 26_912);
    assert_eq!(out, data);
}

#[test]
fn copy_round_trip_is_byte_exact() {
    let (_, mut volume) = fresh_volume(FormatVariant::IbmPc720, None);
    let data = pattern_bytes(10_000);

    volume.copy_in(&["A.BIN"], &data, false, ATTR_ARCHIVE, ts()).unwrap();
    let first = volume.copy_out(&["A.BIN"]).unwrap();
    assert_eq!(first, data);

    // extract, delete, re-insert, extract again
    volume.delete(&["A.BIN"]).unwrap();
    volume.copy_in(&["A.BIN"], &first, false, ATTR_ARCHIVE, ts()).unwrap();
    assert_eq!(volume.copy_out(&["A.BIN"]).unwrap(), data);

    let (_, entry) = volume.resolve_entry(&["A.BIN"]).unwrap();
    assert_eq!(entry.modified(), ts());
}

#[test]
fn fat_copies_agree_after_flush() {
    let (device, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    volume
        .copy_in(&["ONE.DAT"], &pattern_bytes(5000), false, ATTR_ARCHIVE, ts())
        .unwrap();
    volume
        .copy_in(&["TWO.DAT"], &pattern_bytes(100), false, ATTR_ARCHIVE, ts())
        .unwrap();
    volume.delete(&["ONE.DAT"]).unwrap();
    volume.flush().unwrap();

    // Victor DS: FAT1 at sectors 1-2, FAT2 at sectors 3-4
    let image = device.snapshot();
    assert_eq!(
        &image[SECTOR_SIZE..3 * SECTOR_SIZE],
        &image[3 * SECTOR_SIZE..5 * SECTOR_SIZE]
    );
    assert!(volume.verify().unwrap().is_clean());
}

#[test]
fn zero_length_file_owns_no_clusters() {
    let (_, mut volume) = fresh_volume(FormatVariant::IbmPc360, None);
    let free_before = volume.fat().count_free();
    volume.copy_in(&["EMPTY"], &[], false, ATTR_ARCHIVE, ts()).unwrap();

    let (_, entry) = volume.resolve_entry(&["EMPTY"]).unwrap();
    assert_eq!(entry.first_cluster(), 0);
    assert_eq!(entry.file_size(), 0);
    assert_eq!(volume.fat().count_free(), free_before);
    assert_eq!(volume.copy_out(&["EMPTY"]).unwrap(), Vec::<u8>::new());
}

#[test]
fn whole_cluster_file_ends_on_eoc() {
    let (_, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    // exactly two clusters on a 2048-byte-cluster volume
    let data = pattern_bytes(4096);
    volume.copy_in(&["FULL.BIN"], &data, false, ATTR_ARCHIVE, ts()).unwrap();

    let (_, entry) = volume.resolve_entry(&["FULL.BIN"]).unwrap();
    let chain = volume.fat().chain_clusters(entry.first_cluster()).unwrap();
    assert_eq!(chain.len(), 2);
    assert!(volume.fat().get(chain[1]) >= 0xFF8);
    assert_eq!(volume.copy_out(&["FULL.BIN"]).unwrap(), data);
}

#[test]
fn overwrite_semantics() {
    let (_, mut volume) = fresh_volume(FormatVariant::IbmPc360, None);
    volume.copy_in(&["F.TXT"], b"first", false, ATTR_ARCHIVE, ts()).unwrap();

    assert!(matches!(
        volume.copy_in(&["F.TXT"], b"second", false, ATTR_ARCHIVE, ts()),
        Err(Error::ExistsAndNoOverwrite(_))
    ));
    volume.copy_in(&["F.TXT"], b"second", true, ATTR_ARCHIVE, ts()).unwrap();
    assert_eq!(volume.copy_out(&["F.TXT"]).unwrap(), b"second");
}

#[test]
fn delete_then_recreate_keeps_chain_length() {
    let (device, mut volume) = fresh_volume(FormatVariant::VictorSS, None);
    let data = pattern_bytes(9000);
    volume.copy_in(&["R.BIN"], &data, false, ATTR_ARCHIVE, ts()).unwrap();
    let (_, entry) = volume.resolve_entry(&["R.BIN"]).unwrap();
    let first_len = volume.fat().chain_len(entry.first_cluster()).unwrap();
    let data_sector = volume.geometry().first_sector_of_cluster(entry.first_cluster());
    let free_before_delete = volume.fat().count_free();

    volume.delete(&["R.BIN"]).unwrap();
    assert!(matches!(
        volume.copy_out(&["R.BIN"]),
        Err(Error::NotFound(_))
    ));
    assert_eq!(volume.fat().count_free(), free_before_delete + first_len);

    // data sectors are not zeroed by delete
    let image = device.snapshot();
    assert_eq!(image[data_sector * SECTOR_SIZE], data[0]);

    volume.copy_in(&["R.BIN"], &data, false, ATTR_ARCHIVE, ts()).unwrap();
    let (_, entry) = volume.resolve_entry(&["R.BIN"]).unwrap();
    assert_eq!(volume.fat().chain_len(entry.first_cluster()).unwrap(), first_len);
}

#[test]
fn wildcard_star_vs_star_dot_star() {
    let (_, mut volume) = fresh_volume(FormatVariant::IbmPc360, None);
    for name in ["XH", "FOO.COM", "BAR"] {
        volume.copy_in(&[name], b"x", false, ATTR_ARCHIVE, ts()).unwrap();
    }

    let names = |pattern: &str| -> Vec<String> {
        volume
            .list_path(&[pattern], false)
            .unwrap()
            .map(|r| r.unwrap().name)
            .collect()
    };
    assert_eq!(names("*"), vec!["XH", "FOO.COM", "BAR"]);
    assert_eq!(names("*.*"), vec!["FOO.COM"]);
    assert_eq!(names("?H"), vec!["XH"]);
}

#[test]
fn recursive_listing_is_preorder() {
    let (_, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    volume.copy_in(&["A.TXT"], b"a", false, ATTR_ARCHIVE, ts()).unwrap();
    volume.create_dir(&["SUB"], ts()).unwrap();
    volume.copy_in(&["SUB", "B.TXT"], b"b", false, ATTR_ARCHIVE, ts()).unwrap();
    volume.copy_in(&["C.TXT"], b"c", false, ATTR_ARCHIVE, ts()).unwrap();

    let listed: Vec<(String, usize)> = volume
        .list(&volume.root(), None, true)
        .unwrap()
        .map(|r| {
            let row = r.unwrap();
            (row.name, row.depth)
        })
        .collect();
    assert_eq!(
        listed,
        vec![
            ("A.TXT".to_string(), 0),
            ("SUB".to_string(), 0),
            ("B.TXT".to_string(), 1),
            ("C.TXT".to_string(), 0),
        ]
    );

    // non-recursive stays at the top level
    let top: Vec<String> = volume
        .list(&volume.root(), None, false)
        .unwrap()
        .map(|r| r.unwrap().name)
        .collect();
    assert_eq!(top, vec!["A.TXT", "SUB", "C.TXT"]);
}

#[test]
fn path_resolution_errors() {
    let (_, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    volume.copy_in(&["PLAIN.TXT"], b"x", false, ATTR_ARCHIVE, ts()).unwrap();
    volume.create_dir(&["DIR"], ts()).unwrap();

    assert!(matches!(
        volume.copy_out(&["MISSING"]),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        volume.copy_out(&["PLAIN.TXT", "X"]),
        Err(Error::NotADirectory(_))
    ));
    assert!(matches!(
        volume.copy_out(&["DIR"]),
        Err(Error::IsADirectory(_))
    ));
    // dot and dotdot resolve inside subdirectories
    volume.copy_in(&["DIR", "IN.TXT"], b"y", false, ATTR_ARCHIVE, ts()).unwrap();
    assert_eq!(
        volume.copy_out(&["DIR", ".", "IN.TXT"]).unwrap(),
        b"y".to_vec()
    );
    assert_eq!(
        volume.copy_out(&["DIR", "..", "PLAIN.TXT"]).unwrap(),
        b"x".to_vec()
    );
}

#[test]
fn subdirectory_grows_by_one_cluster() {
    let (_, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    volume.create_dir(&["SUB"], ts()).unwrap();
    let (_, dir_entry) = volume.resolve_entry(&["SUB"]).unwrap();
    let first = dir_entry.first_cluster();
    assert_eq!(volume.fat().chain_len(first).unwrap(), 1);

    // a 2048-byte cluster holds 64 slots; dot and dotdot take two
    for i in 0..62 {
        let name = format!("F{}", i);
        volume.copy_in(&["SUB", &name], &[], false, ATTR_ARCHIVE, ts()).unwrap();
    }
    assert_eq!(volume.fat().chain_len(first).unwrap(), 1);

    volume.copy_in(&["SUB", "LAST"], &[], false, ATTR_ARCHIVE, ts()).unwrap();
    assert_eq!(volume.fat().chain_len(first).unwrap(), 2);

    let listed: Vec<String> = volume
        .list(&fat12::dir::DirHandle::Chain(first), None, false)
        .unwrap()
        .map(|r| r.unwrap().name)
        .collect();
    assert_eq!(listed.len(), 63);
    assert_eq!(listed[0], "F0");
    assert_eq!(listed[62], "LAST");
    assert!(volume.verify().unwrap().is_clean());
}

#[test]
fn fixed_root_fills_up() {
    let (_, mut volume) = fresh_volume(FormatVariant::VictorSS, None);
    for i in 0..128 {
        let name = format!("F{}", i);
        volume.copy_in(&[&name], &[], false, ATTR_ARCHIVE, ts()).unwrap();
    }
    assert!(matches!(
        volume.copy_in(&["ONEMORE"], &[], false, ATTR_ARCHIVE, ts()),
        Err(Error::DirectoryFull)
    ));
}

#[test]
fn out_of_space_is_transactional() {
    let (device, mut volume) = fresh_volume(FormatVariant::IbmPc360, None);
    let free = volume.fat().count_free();
    let too_big = vec![0xA5u8; (free + 1) * volume.geometry().cluster_bytes()];

    let before = device.snapshot();
    assert!(matches!(
        volume.copy_in(&["BIG.BIN"], &too_big, false, ATTR_ARCHIVE, ts()),
        Err(Error::OutOfSpace)
    ));
    assert_eq!(device.snapshot(), before);
    assert_eq!(volume.fat().count_free(), free);
    assert!(matches!(
        volume.copy_out(&["BIG.BIN"]),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn attribute_handling() {
    let (_, mut volume) = fresh_volume(FormatVariant::IbmPc12M, None);
    volume.copy_in(&["LOCK.ME"], b"data", false, ATTR_ARCHIVE, ts()).unwrap();

    let attr = volume.set_attrs(&["LOCK.ME"], ATTR_READ_ONLY, 0).unwrap();
    assert_eq!(attr & ATTR_READ_ONLY, ATTR_READ_ONLY);

    assert!(matches!(
        volume.delete(&["LOCK.ME"]),
        Err(Error::AttributeProtected(_))
    ));
    assert!(matches!(
        volume.copy_in(&["LOCK.ME"], b"new", true, ATTR_ARCHIVE, ts()),
        Err(Error::AttributeProtected(_))
    ));
    assert!(matches!(
        volume.set_attrs(&["LOCK.ME"], fat12::ATTR_VOLUME_ID, 0),
        Err(Error::AttributeProtected(_))
    ));

    volume.set_attrs(&["LOCK.ME"], 0, ATTR_READ_ONLY).unwrap();
    volume.delete(&["LOCK.ME"]).unwrap();
}

#[test]
fn verify_reports_cross_links_and_orphans() {
    let (_, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    // two files of two clusters each: A -> [2,3], B -> [4,5]
    volume.copy_in(&["A"], &pattern_bytes(3000), false, ATTR_ARCHIVE, ts()).unwrap();
    volume.copy_in(&["B"], &pattern_bytes(3000), false, ATTR_ARCHIVE, ts()).unwrap();

    // point B's first cluster at A's second: cluster 3 is now shared and
    // B's old tail 5 is stranded
    volume.write_fat_entry(4, 3);
    volume.flush().unwrap();

    let report = volume.verify().unwrap();
    assert_eq!(report.cross_links.len(), 1);
    assert_eq!(report.cross_links[0].cluster, 3);
    assert_eq!(report.cross_links[0].entries.len(), 2);
    assert!(report.cross_links[0].entries.contains(&"\\A".to_string()));
    assert!(report.cross_links[0].entries.contains(&"\\B".to_string()));
    assert_eq!(report.orphan_clusters, vec![5]);
    assert!(report.fat_copy_mismatches.is_empty());
}

#[test]
fn verify_reports_unterminated_chains() {
    let (_, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    volume.copy_in(&["C"], &pattern_bytes(3000), false, ATTR_ARCHIVE, ts()).unwrap();
    let (_, entry) = volume.resolve_entry(&["C"]).unwrap();
    let chain = volume.fat().chain_clusters(entry.first_cluster()).unwrap();

    // last cluster now points at a free entry instead of EOC
    volume.write_fat_entry(chain[1], 0);
    volume.flush().unwrap();
    let report = volume.verify().unwrap();
    assert_eq!(report.unterminated_chains, vec!["\\C".to_string()]);
}

#[test]
fn verify_reports_fat_copy_divergence() {
    use fat12::device::BlockDevice;

    let (device, mut volume) = fresh_volume(FormatVariant::VictorDS, None);
    volume.copy_in(&["C"], &pattern_bytes(3000), false, ATTR_ARCHIVE, ts()).unwrap();

    // patch entry 30 in FAT copy 2 only (Victor DS copy 2 starts at sector 3);
    // entry 30 is even, byte offset 45 plus the low nibble of byte 46
    let mut sector = vec![0u8; SECTOR_SIZE];
    device.read_sectors(3, &mut sector).unwrap();
    sector[45] = 0x34;
    sector[46] = (sector[46] & 0xF0) | 0x01;
    device.write_sectors(3, &sector).unwrap();

    let report = volume.verify().unwrap();
    assert_eq!(report.fat_copy_mismatches, vec![30]);
}

#[test]
fn file_backed_image_round_trip() {
    let path = std::env::temp_dir().join(format!("fat12-floppy-{}.img", std::process::id()));
    {
        let device = Arc::new(
            ImageFile::create(&path, FormatVariant::IbmPc144M.image_bytes().unwrap()).unwrap(),
        );
        create_image(device.as_ref(), FormatVariant::IbmPc144M, Some("DISK1"), ts()).unwrap();
        let mut volume = Volume::open_floppy(device).unwrap();
        volume
            .copy_in(&["KEEP.ME"], &pattern_bytes(40_000), false, ATTR_ARCHIVE, ts())
            .unwrap();
        volume.flush().unwrap();
    }

    let device = Arc::new(ImageFile::open(&path).unwrap());
    let volume = Volume::open_floppy(device).unwrap();
    assert_eq!(volume.volume_label().unwrap().as_deref(), Some("DISK1"));
    assert_eq!(volume.copy_out(&["KEEP.ME"]).unwrap(), pattern_bytes(40_000));
    assert!(volume.verify().unwrap().is_clean());

    std::fs::remove_file(&path).unwrap();
}
