//! Directory walking, path resolution, and subdirectory management.
//!
//! The root directory of every supported volume is a fixed sector range.
//! Subdirectories live in cluster chains and grow one zero-filled cluster at
//! a time. A directory handle is therefore just the kind plus the first
//! cluster; the parent is recomputed from the `..` entry when needed rather
//! than kept as a pointer.
//!
//! Scans run in on-disk order and stop at the 0x00 end marker. Long-name
//! entries are skipped silently everywhere.

use crate::entry::{format_83, has_wildcards, wildcard_match, DirEntry, Timestamp};
use crate::error::{Error, Result};
use crate::volume::Volume;
use crate::{ATTR_DIRECTORY, DIRENT_SIZE, SECTOR_SIZE};

/// A directory position: kind and, for chains, the first cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirHandle {
    FixedRoot,
    Chain(u32),
}

/// Volume-local location of one 32-byte entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryPos {
    pub sector: usize,
    pub offset: usize,
}

/// One row yielded by [`Volume::list`].
#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub name: String,
    pub depth: usize,
    pub entry: DirEntry,
    pub pos: DirEntryPos,
}

impl Volume {
    /// Sectors of a directory in on-disk order.
    pub(crate) fn dir_sector_list(&self, dir: &DirHandle) -> Result<Vec<usize>> {
        match dir {
            DirHandle::FixedRoot => {
                let start = self.geometry().root_dir_start_sector();
                Ok((start..start + self.geometry().root_dir_sectors()).collect())
            }
            DirHandle::Chain(first) => {
                let spc = self.geometry().sectors_per_cluster;
                let mut sectors = Vec::new();
                for cluster in self.fat().chain_clusters(*first)? {
                    let base = self.geometry().first_sector_of_cluster(cluster);
                    sectors.extend(base..base + spc);
                }
                Ok(sectors)
            }
        }
    }

    /// Every allocated slot up to the end marker, deleted entries included.
    pub(crate) fn dir_slots(&self, dir: &DirHandle) -> Result<Vec<(DirEntryPos, DirEntry)>> {
        let mut slots = Vec::new();
        for sector in self.dir_sector_list(dir)? {
            let bytes = self.read_sector(sector)?;
            for offset in (0..SECTOR_SIZE).step_by(DIRENT_SIZE) {
                let entry = DirEntry::from_bytes(&bytes[offset..offset + DIRENT_SIZE]);
                if entry.is_end() {
                    return Ok(slots);
                }
                slots.push((DirEntryPos { sector, offset }, entry));
            }
        }
        Ok(slots)
    }

    /// Non-deleted, non-LFN entries of a directory in on-disk order.
    pub(crate) fn live_entries(&self, dir: &DirHandle) -> Result<Vec<(DirEntryPos, DirEntry)>> {
        Ok(self
            .dir_slots(dir)?
            .into_iter()
            .filter(|(_, e)| !e.is_deleted() && !e.is_long_name())
            .collect())
    }

    /// Patch one entry in place; the final step of every mutating operation.
    pub(crate) fn write_dir_entry(&self, pos: DirEntryPos, entry: &DirEntry) -> Result<()> {
        let mut bytes = self.read_sector(pos.sector)?;
        bytes[pos.offset..pos.offset + DIRENT_SIZE].copy_from_slice(entry.as_bytes());
        self.write_sectors(pos.sector, &bytes)
    }

    /// Find `name` in a directory. Exactly one non-deleted match is sane;
    /// more than one means a corrupt directory.
    pub(crate) fn find_in_dir(
        &self,
        dir: &DirHandle,
        name: &str,
    ) -> Result<Option<(DirEntryPos, DirEntry)>> {
        let mut found: Option<(DirEntryPos, DirEntry)> = None;
        for (pos, entry) in self.live_entries(dir)? {
            if entry.is_volume_label() || entry.is_dot() {
                continue;
            }
            if entry.name_matches(name) {
                if found.is_some() {
                    return Err(Error::Ambiguous(name.to_string()));
                }
                found = Some((pos, entry));
            }
        }
        Ok(found)
    }

    /// Walk `components` from the root to a directory handle.
    pub fn resolve_dir(&self, components: &[&str]) -> Result<DirHandle> {
        let mut current = DirHandle::FixedRoot;
        for &component in components {
            if component.is_empty() || component == "." {
                continue;
            }
            if component == ".." {
                current = self.parent_of(&current)?;
                continue;
            }
            let (_, entry) = self
                .find_in_dir(&current, component)?
                .ok_or_else(|| Error::NotFound(component.to_string()))?;
            if !entry.is_dir() {
                return Err(Error::NotADirectory(component.to_string()));
            }
            current = DirHandle::Chain(entry.first_cluster());
        }
        Ok(current)
    }

    /// Split a path into parent directory and final component, resolving the
    /// parent. An empty path has no final component.
    pub(crate) fn resolve_parent<'p>(
        &self,
        components: &'p [&'p str],
    ) -> Result<(DirHandle, &'p str)> {
        let (last, parents) = components
            .split_last()
            .ok_or_else(|| Error::NotFound(String::new()))?;
        Ok((self.resolve_dir(parents)?, *last))
    }

    /// Resolve a path to its directory entry.
    pub fn resolve_entry(&self, components: &[&str]) -> Result<(DirEntryPos, DirEntry)> {
        let (parent, name) = self.resolve_parent(components)?;
        self.find_in_dir(&parent, name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// The parent directory, recomputed from the `..` entry.
    fn parent_of(&self, dir: &DirHandle) -> Result<DirHandle> {
        match dir {
            // `cd ..` at the root stays at the root
            DirHandle::FixedRoot => Ok(DirHandle::FixedRoot),
            DirHandle::Chain(_) => {
                for (_, entry) in self.live_entries(dir)? {
                    if entry.is_dot() && entry.name() == ".." {
                        return Ok(if entry.first_cluster() == 0 {
                            DirHandle::FixedRoot
                        } else {
                            DirHandle::Chain(entry.first_cluster())
                        });
                    }
                }
                Err(Error::NotFound("..".to_string()))
            }
        }
    }

    /// A slot for a new entry: a deleted slot, the end-marker slot, or a
    /// slot in a freshly grown cluster. The fixed root cannot grow, so a
    /// full root is `DirectoryFull`. Growth only stages the FAT in memory
    /// and zero-fills the new cluster on disk; the caller flushes.
    pub(crate) fn find_free_slot(&mut self, dir: &DirHandle) -> Result<DirEntryPos> {
        let sectors = self.dir_sector_list(dir)?;
        for &sector in &sectors {
            let bytes = self.read_sector(sector)?;
            for offset in (0..SECTOR_SIZE).step_by(DIRENT_SIZE) {
                let entry = DirEntry::from_bytes(&bytes[offset..offset + DIRENT_SIZE]);
                if entry.is_end() || entry.is_deleted() {
                    return Ok(DirEntryPos { sector, offset });
                }
            }
        }
        match dir {
            DirHandle::FixedRoot => Err(Error::DirectoryFull),
            DirHandle::Chain(first) => {
                let tail = *self
                    .fat()
                    .chain_clusters(*first)?
                    .last()
                    .ok_or(Error::CorruptChain(*first))?;
                let mut cursor = *self.alloc_cursor_mut();
                let grown = self.fat_mut().alloc_chain(1, &mut cursor)?;
                *self.alloc_cursor_mut() = cursor;
                self.fat_mut().set(tail, grown as u16);
                self.write_cluster(grown, &[])?;
                Ok(DirEntryPos {
                    sector: self.geometry().first_sector_of_cluster(grown),
                    offset: 0,
                })
            }
        }
    }

    /// Create a subdirectory. The first two entries of its cluster are `.`
    /// (itself) and `..` (the parent; 0 when the parent is the root).
    pub fn create_dir(&mut self, components: &[&str], mtime: Timestamp) -> Result<()> {
        let (parent, name) = self.resolve_parent(components)?;
        format_83(name)?;
        if self.find_in_dir(&parent, name)?.is_some() {
            return Err(Error::ExistsAndNoOverwrite(name.to_string()));
        }

        let slot = self.find_free_slot(&parent)?;
        let mut cursor = *self.alloc_cursor_mut();
        let cluster = match self.fat_mut().alloc_chain(1, &mut cursor) {
            Ok(c) => c,
            Err(e) => {
                self.reload_fat()?;
                return Err(e);
            }
        };
        *self.alloc_cursor_mut() = cursor;

        let parent_cluster = match parent {
            DirHandle::FixedRoot => 0,
            DirHandle::Chain(c) => c,
        };
        let mut first_sector = vec![0u8; self.geometry().cluster_bytes()];
        first_sector[..DIRENT_SIZE]
            .copy_from_slice(DirEntry::dot_entry(false, cluster, mtime).as_bytes());
        first_sector[DIRENT_SIZE..2 * DIRENT_SIZE]
            .copy_from_slice(DirEntry::dot_entry(true, parent_cluster, mtime).as_bytes());

        let entry = DirEntry::new(name, ATTR_DIRECTORY, cluster, 0, mtime)?;

        // data, then both FAT copies, then the parent entry
        self.write_cluster(cluster, &first_sector)?;
        self.flush_fat()?;
        self.write_dir_entry(slot, &entry)
    }

    /// Enumerate a directory. With `recursive` the traversal is pre-order
    /// (parent before children), skipping `.` and `..`. A pattern filters
    /// the yielded entries at every level; volume labels and long-name
    /// entries never appear. Directory sectors are read from the device one
    /// at a time as the iterator advances, and re-invocation re-reads from
    /// disk, so the sequence tolerates mutations between calls.
    pub fn list(
        &self,
        dir: &DirHandle,
        pattern: Option<&str>,
        recursive: bool,
    ) -> Result<ListIter<'_>> {
        let sectors = self.dir_sector_list(dir)?;
        Ok(ListIter {
            volume: self,
            pattern: pattern.map(|p| p.to_string()),
            recursive,
            stack: vec![Frame::new(sectors, 0)],
            failed: false,
        })
    }

    /// Resolve a path for listing: an empty or directory path lists that
    /// directory unfiltered; a final wildcard component lists the parent
    /// filtered by the pattern.
    pub fn list_path(
        &self,
        components: &[&str],
        recursive: bool,
    ) -> Result<ListIter<'_>> {
        match components.split_last() {
            Some((last, parents)) if has_wildcards(last) => {
                let parent = self.resolve_dir(parents)?;
                self.list(&parent, Some(*last), recursive)
            }
            _ => {
                let dir = self.resolve_dir(components)?;
                self.list(&dir, None, recursive)
            }
        }
    }
}

/// One directory being walked: its sector list (computed from the in-memory
/// FAT, no directory bytes touched) plus at most one loaded sector.
struct Frame {
    sectors: Vec<usize>,
    cursor: usize,
    buf: Vec<u8>,
    slot: usize,
    depth: usize,
    ended: bool,
}

const SLOTS_PER_SECTOR: usize = SECTOR_SIZE / DIRENT_SIZE;

impl Frame {
    fn new(sectors: Vec<usize>, depth: usize) -> Self {
        Self {
            sectors,
            cursor: 0,
            buf: Vec::new(),
            slot: 0,
            depth,
            ended: false,
        }
    }

    /// Next raw slot, loading one sector from the device at a time.
    fn next_slot(&mut self, volume: &Volume) -> Result<Option<(DirEntryPos, DirEntry)>> {
        if self.ended {
            return Ok(None);
        }
        if self.slot == SLOTS_PER_SECTOR {
            self.buf.clear();
            self.slot = 0;
            self.cursor += 1;
        }
        if self.buf.is_empty() {
            match self.sectors.get(self.cursor) {
                Some(&sector) => self.buf = volume.read_sector(sector)?,
                None => {
                    self.ended = true;
                    return Ok(None);
                }
            }
        }
        let offset = self.slot * DIRENT_SIZE;
        let entry = DirEntry::from_bytes(&self.buf[offset..offset + DIRENT_SIZE]);
        if entry.is_end() {
            self.ended = true;
            return Ok(None);
        }
        self.slot += 1;
        Ok(Some((
            DirEntryPos {
                sector: self.sectors[self.cursor],
                offset,
            },
            entry,
        )))
    }
}

/// Lazy, restartable listing; see [`Volume::list`].
pub struct ListIter<'a> {
    volume: &'a Volume,
    pattern: Option<String>,
    recursive: bool,
    stack: Vec<Frame>,
    failed: bool,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Result<ListedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let volume = self.volume;
        loop {
            let frame = self.stack.last_mut()?;
            let depth = frame.depth;
            let (pos, entry) = match frame.next_slot(volume) {
                Ok(Some(slot)) => slot,
                Ok(None) => {
                    self.stack.pop();
                    continue;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };
            if entry.is_deleted() || entry.is_long_name() {
                continue;
            }
            if entry.is_volume_label() || entry.is_dot() {
                continue;
            }
            if self.recursive && entry.is_dir() {
                match volume.dir_sector_list(&DirHandle::Chain(entry.first_cluster())) {
                    Ok(sectors) => self.stack.push(Frame::new(sectors, depth + 1)),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }
            let name = entry.name();
            if let Some(pattern) = &self.pattern {
                if !wildcard_match(pattern, &name) {
                    continue;
                }
            }
            return Some(Ok(ListedEntry {
                name,
                depth,
                entry,
                pos,
            }));
        }
    }
}
