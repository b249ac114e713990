//! 32-byte directory entry codec.
//!
//! Special notes about the first byte (Name[0]) of an entry:
//! - 0x00 means the entry is free and nothing is allocated after it, so
//!   directory scans stop here.
//! - 0xE5 means the entry is free (deleted).
//! - 0x05 means the real first name byte is 0xE5 (a valid KANJI lead byte).
//! - 0x2E is a dot entry (`.` or `..`).
//!
//! The name field is 8 characters plus a 3-character extension, both
//! trailing-space padded with 0x20. Lower case is folded to upper on write
//! and the original case is lost. Decoding treats bytes as Latin-1 rather
//! than strict ASCII; plenty of surviving images carry high-bit characters
//! in names.
//!
//! An attribute byte of exactly 0x0F marks a VFAT long-name entry. The
//! formats this engine targets predate VFAT, so such entries are skipped on
//! read and never written.
//!
//! On FAT12 the high word of the first cluster is always zero; the low word
//! plus the 32-bit file size end the entry. All multi-byte fields are
//! little-endian.

use crate::error::{Error, Result};
use crate::{
    is_legal_name_char, split_name_ext, ATTR_DIRECTORY, ATTR_LONG_NAME, ATTR_VOLUME_ID,
    DIR_ENTRY_KANJI, DIR_ENTRY_LAST_AND_UNUSED, DIR_ENTRY_UNUSED, DOT, SPACE,
};

/// Caller-supplied wall-clock timestamp. The engine never reads a clock, so
/// emitted entries stay deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    /// Sentinel for zeroed on-disk date/time words.
    pub const DOS_EPOCH: Timestamp = Timestamp {
        year: 1980,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Packed FAT date word: bits 0-4 day, 5-8 month, 9-15 years since 1980.
    pub fn pack_date(&self) -> u16 {
        let year = self.year.saturating_sub(1980).min(127);
        (self.day as u16 & 0x1F) | ((self.month as u16 & 0x0F) << 5) | (year << 9)
    }

    /// Packed FAT time word: bits 0-4 seconds/2, 5-10 minutes, 11-15 hours.
    pub fn pack_time(&self) -> u16 {
        (self.second as u16 / 2) | ((self.minute as u16 & 0x3F) << 5) | ((self.hour as u16) << 11)
    }

    pub fn unpack(date: u16, time: u16) -> Timestamp {
        if date == 0 {
            let mut ts = Timestamp::DOS_EPOCH;
            ts.hour = (time >> 11) as u8;
            ts.minute = ((time >> 5) & 0x3F) as u8;
            ts.second = ((time & 0x1F) * 2) as u8;
            return ts;
        }
        Timestamp {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }
}

/// FAT 32 Byte Directory Entry Structure
///
// 8 + 3 + 1 + 1 + 1 + 2 + 2 + 2 + 2 + 2 + 2 + 2 + 4 = 32 bytes
#[derive(Clone, Copy, Debug)]
#[repr(packed)]
pub struct DirEntry {
    /// Name    size: 8 bytes    offset: 0x00
    name: [u8; 8],
    /// Extension    size: 3 bytes    offset: 0x08
    extension: [u8; 3],
    /// Attributes    size: 1 byte    offset: 0x0B
    attr: u8,
    /// Reserved for Windows NT    size: 1 byte    offset: 0x0C
    nt_res: u8,
    /// Creation time, tenths of a second    size: 1 byte    offset: 0x0D
    crt_time_tenth: u8,
    /// Creation time    size: 2 bytes    offset: 0x0E
    crt_time: u16,
    /// Creation date    size: 2 bytes    offset: 0x10
    crt_date: u16,
    /// Last access date    size: 2 bytes    offset: 0x12
    lst_acc_date: u16,
    /// First cluster, high word; always 0 on FAT12    offset: 0x14
    fst_clus_hi: u16,
    /// Last write time    size: 2 bytes    offset: 0x16
    wrt_time: u16,
    /// Last write date    size: 2 bytes    offset: 0x18
    wrt_date: u16,
    /// First cluster, low word    size: 2 bytes    offset: 0x1A
    fst_clus_lo: u16,
    /// File size in bytes    size: 4 bytes    offset: 0x1C
    file_size: u32,
}

impl Default for DirEntry {
    fn default() -> Self {
        Self::empty()
    }
}

impl DirEntry {
    pub fn empty() -> Self {
        Self {
            name: [0; 8],
            extension: [0; 3],
            attr: 0,
            nt_res: 0,
            crt_time_tenth: 0,
            crt_time: 0,
            crt_date: 0,
            lst_acc_date: 0,
            fst_clus_hi: 0,
            wrt_time: 0,
            wrt_date: 0,
            fst_clus_lo: 0,
            file_size: 0,
        }
    }

    /// A fresh entry for `name`, validated against the 8.3 character set.
    pub fn new(name: &str, attr: u8, first_cluster: u32, size: u32, mtime: Timestamp) -> Result<Self> {
        let (name_bytes, ext_bytes) = format_83(name)?;
        let mut entry = Self::empty();
        entry.name = name_bytes;
        entry.extension = ext_bytes;
        entry.attr = attr;
        entry.set_first_cluster(first_cluster);
        entry.file_size = size;
        entry.set_modified(mtime);
        entry.crt_time = entry.wrt_time;
        entry.crt_date = entry.wrt_date;
        entry.lst_acc_date = entry.wrt_date;
        Ok(entry)
    }

    /// The volume-label entry written as the first root entry on create.
    /// Label names allow a space-padded free-form 11 bytes.
    pub fn volume_label(label: &str, mtime: Timestamp) -> Result<Self> {
        let upper = label.to_ascii_uppercase();
        if upper.is_empty() || upper.len() > 11 || !upper.chars().all(|c| c == ' ' || is_legal_name_char(c)) {
            return Err(Error::InvalidName(label.to_string()));
        }
        let mut name = [SPACE; 8];
        let mut extension = [SPACE; 3];
        for (i, &b) in upper.as_bytes().iter().enumerate() {
            if i < 8 {
                name[i] = b;
            } else {
                extension[i - 8] = b;
            }
        }
        let mut entry = Self::empty();
        entry.name = name;
        entry.extension = extension;
        entry.attr = ATTR_VOLUME_ID;
        entry.set_modified(mtime);
        Ok(entry)
    }

    /// `.` and `..` entries for a freshly created subdirectory. `first_cluster`
    /// is the directory itself for `.`, the parent for `..` (0 when the
    /// parent is the root).
    pub fn dot_entry(double: bool, first_cluster: u32, mtime: Timestamp) -> Self {
        let mut name = [SPACE; 8];
        name[0] = DOT;
        if double {
            name[1] = DOT;
        }
        let mut entry = Self::empty();
        entry.name = name;
        entry.extension = [SPACE; 3];
        entry.attr = ATTR_DIRECTORY;
        entry.set_first_cluster(first_cluster);
        entry.set_modified(mtime);
        entry
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        assert!(buf.len() >= 32);
        unsafe { *(buf.as_ptr() as *const DirEntry) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self as *const DirEntry as *const u8, 32) }
    }

    pub fn to_bytes_array(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.as_bytes());
        bytes
    }

    /// Entry marks the end of the directory; nothing after it is allocated.
    pub fn is_end(&self) -> bool {
        self.name[0] == DIR_ENTRY_LAST_AND_UNUSED
    }

    pub fn is_deleted(&self) -> bool {
        self.name[0] == DIR_ENTRY_UNUSED
    }

    pub fn is_long_name(&self) -> bool {
        self.attr == ATTR_LONG_NAME
    }

    pub fn is_volume_label(&self) -> bool {
        !self.is_long_name() && self.attr & ATTR_VOLUME_ID != 0
    }

    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_dot(&self) -> bool {
        self.name[0] == DOT
    }

    pub fn attr(&self) -> u8 {
        self.attr
    }

    pub fn set_attr(&mut self, attr: u8) {
        self.attr = attr;
    }

    pub fn first_cluster(&self) -> u32 {
        ((self.fst_clus_hi as u32) << 16) + (self.fst_clus_lo as u32)
    }

    pub fn set_first_cluster(&mut self, cluster: u32) {
        // FAT12 never needs the high word
        self.fst_clus_hi = 0;
        self.fst_clus_lo = cluster as u16;
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn set_file_size(&mut self, size: u32) {
        self.file_size = size;
    }

    pub fn modified(&self) -> Timestamp {
        Timestamp::unpack(self.wrt_date, self.wrt_time)
    }

    pub fn set_modified(&mut self, ts: Timestamp) {
        self.wrt_date = ts.pack_date();
        self.wrt_time = ts.pack_time();
    }

    pub fn delete(&mut self) {
        self.name[0] = DIR_ENTRY_UNUSED;
    }

    /// Reconstructed `NAME.EXT` form: trailing spaces trimmed, bytes decoded
    /// as Latin-1, the 0x05 escape mapped back to 0xE5.
    pub fn name(&self) -> String {
        let raw_name = self.name;
        let raw_ext = self.extension;
        let mut name = String::new();
        for (i, &b) in raw_name.iter().enumerate() {
            let b = if i == 0 && b == DIR_ENTRY_KANJI {
                DIR_ENTRY_UNUSED
            } else {
                b
            };
            name.push(b as char);
        }
        let mut name: String = name.trim_end_matches(' ').to_string();
        let ext: String = raw_ext.iter().map(|&b| b as char).collect();
        let ext = ext.trim_end_matches(' ');
        if !ext.is_empty() {
            name.push('.');
            name.push_str(ext);
        }
        name
    }

    /// Case-insensitive comparison against a caller-supplied 8.3 name.
    pub fn name_matches(&self, other: &str) -> bool {
        self.name().eq_ignore_ascii_case(other)
    }
}

/// Validate and pack an 8.3 name, folding lowercase to upper. Rejects
/// anything outside the DOS character set, empty names, oversized parts and
/// second dots.
pub fn format_83(name: &str) -> Result<([u8; 8], [u8; 3])> {
    let upper = name.to_ascii_uppercase();
    let (base, ext) = split_name_ext(&upper);
    if base.is_empty()
        || base.len() > 8
        || ext.len() > 3
        || ext.contains('.')
        || !base.chars().all(is_legal_name_char)
        || !ext.chars().all(is_legal_name_char)
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    let mut name_bytes = [SPACE; 8];
    let mut ext_bytes = [SPACE; 3];
    name_bytes[..base.len()].copy_from_slice(base.as_bytes());
    ext_bytes[..ext.len()].copy_from_slice(ext.as_bytes());
    Ok((name_bytes, ext_bytes))
}

/// Does the string contain wildcard metacharacters?
pub fn has_wildcards(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Wildcard match against a reconstructed 8.3 name, case-insensitive.
///
/// `?` matches any single character; `*` consumes the rest of its
/// component. A pattern with a dot matches name and extension separately
/// and never matches an extensionless name, so `*` matches everything
/// while `*.*` only matches names containing a dot.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_ascii_uppercase();
    let name = name.to_ascii_uppercase();
    match pattern.find('.') {
        Some(_) => {
            let (pat_base, pat_ext) = split_name_ext(&pattern);
            match name.find('.') {
                Some(_) => {
                    let (base, ext) = split_name_ext(&name);
                    component_match(pat_base.as_bytes(), base.as_bytes())
                        && component_match(pat_ext.as_bytes(), ext.as_bytes())
                }
                None => false,
            }
        }
        None => component_match(pattern.as_bytes(), name.as_bytes()),
    }
}

fn component_match(pattern: &[u8], s: &[u8]) -> bool {
    match pattern.split_first() {
        None => s.is_empty(),
        Some((b'*', _)) => true,
        Some((b'?', rest)) => !s.is_empty() && component_match(rest, &s[1..]),
        Some((&c, rest)) => s.first() == Some(&c) && component_match(rest, &s[1..]),
    }
}
