//! File-level operations: extraction, insertion, deletion, attributes.
//!
//! Every mutator stages its FAT changes in the volume's cache and only
//! touches the disk in the fixed commit order (data sectors, FAT copy 1,
//! FAT copy 2, directory sector). A logical failure reloads the cache from
//! disk, so the image bytes stay exactly as they were.

use crate::entry::{format_83, DirEntry, Timestamp};
use crate::error::{Error, Result};
use crate::volume::Volume;
use crate::{
    ATTR_ARCHIVE, ATTR_HIDDEN, ATTR_READ_ONLY, ATTR_SYSTEM, ATTR_VOLUME_ID,
};

/// Attribute bits a plain file entry may carry.
const FILE_ATTR_MASK: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_ARCHIVE;
/// Bits 0-5 are real attributes; the upper two are reserved.
const ATTR_MASK: u8 = 0x3F;

impl Volume {
    /// Extract a file, byte-exact. Walks the chain a cluster at a time; the
    /// final cluster contributes only the residual `size mod cluster_bytes`
    /// bytes (the whole cluster when the residual is zero).
    pub fn copy_out(&self, components: &[&str]) -> Result<Vec<u8>> {
        let (_, entry) = self.resolve_entry(components)?;
        if entry.is_dir() {
            return Err(Error::IsADirectory(entry.name()));
        }

        let size = entry.file_size() as usize;
        let mut data = Vec::with_capacity(size);
        if size == 0 {
            return Ok(data);
        }

        let cluster_bytes = self.geometry().cluster_bytes();
        let clusters_needed = (size + cluster_bytes - 1) / cluster_bytes;
        let mut walked = 0usize;
        for cluster in self.fat().chain(entry.first_cluster()) {
            let cluster = cluster?;
            let chunk = self.read_cluster(cluster)?;
            let remaining = size - data.len();
            data.extend_from_slice(&chunk[..remaining.min(cluster_bytes)]);
            walked += 1;
            if walked == clusters_needed {
                break;
            }
        }
        if data.len() < size {
            // chain ended before the directory entry's size was satisfied
            return Err(Error::CorruptChain(entry.first_cluster()));
        }
        Ok(data)
    }

    /// Insert `data` as a file. Replacing an existing file frees its old
    /// chain; an out-of-space failure leaves the image untouched and writes
    /// no directory entry.
    pub fn copy_in(
        &mut self,
        components: &[&str],
        data: &[u8],
        overwrite: bool,
        attrs: u8,
        mtime: Timestamp,
    ) -> Result<()> {
        let (parent, name) = self.resolve_parent(components)?;
        format_83(name)?;

        let existing = self.find_in_dir(&parent, name)?;
        if let Some((_, old)) = &existing {
            if old.is_dir() {
                return Err(Error::IsADirectory(name.to_string()));
            }
            if !overwrite {
                return Err(Error::ExistsAndNoOverwrite(name.to_string()));
            }
            if old.attr() & ATTR_READ_ONLY != 0 {
                return Err(Error::AttributeProtected(name.to_string()));
            }
        }

        let result = self.copy_in_staged(&parent, name, data, &existing, attrs, mtime);
        if result.is_err() {
            // drop staged FAT state; nothing was flushed yet
            self.reload_fat()?;
        }
        result
    }

    fn copy_in_staged(
        &mut self,
        parent: &crate::dir::DirHandle,
        name: &str,
        data: &[u8],
        existing: &Option<(crate::dir::DirEntryPos, DirEntry)>,
        attrs: u8,
        mtime: Timestamp,
    ) -> Result<()> {
        // freeing the old chain first lets the replacement reuse its clusters
        if let Some((_, old)) = existing {
            if old.first_cluster() != 0 {
                self.fat_mut().free_chain(old.first_cluster())?;
            }
        }

        let cluster_bytes = self.geometry().cluster_bytes();
        let clusters_needed = (data.len() + cluster_bytes - 1) / cluster_bytes;
        let first_cluster = if clusters_needed == 0 {
            // zero-length files own no clusters
            0
        } else {
            let mut cursor = *self.alloc_cursor_mut();
            let first = self.fat_mut().alloc_chain(clusters_needed, &mut cursor)?;
            *self.alloc_cursor_mut() = cursor;
            first
        };

        let slot = match existing {
            Some((pos, _)) => *pos,
            None => self.find_free_slot(parent)?,
        };

        let entry = DirEntry::new(
            name,
            attrs & FILE_ATTR_MASK,
            first_cluster,
            data.len() as u32,
            mtime,
        )?;

        // data, then both FAT copies, then the directory entry
        if first_cluster != 0 {
            let mut offset = 0usize;
            for cluster in self.fat().chain_clusters(first_cluster)? {
                let end = (offset + cluster_bytes).min(data.len());
                self.write_cluster(cluster, &data[offset..end])?;
                offset = end;
            }
        }
        self.flush_fat()?;
        self.write_dir_entry(slot, &entry)
    }

    /// Mark the entry deleted and free its chain. Data sectors keep their
    /// bytes. Subdirectories must be empty; read-only files refuse.
    pub fn delete(&mut self, components: &[&str]) -> Result<()> {
        let (pos, entry) = self.resolve_entry(components)?;
        if entry.is_dir() {
            let children = self
                .live_entries(&crate::dir::DirHandle::Chain(entry.first_cluster()))?
                .into_iter()
                .filter(|(_, e)| !e.is_dot())
                .count();
            if children != 0 {
                return Err(Error::IsADirectory(entry.name()));
            }
        } else if entry.attr() & ATTR_READ_ONLY != 0 {
            return Err(Error::AttributeProtected(entry.name()));
        }

        if entry.first_cluster() != 0 {
            if let Err(e) = self.fat_mut().free_chain(entry.first_cluster()) {
                self.reload_fat()?;
                return Err(e);
            }
        }

        let mut deleted = entry;
        deleted.delete();
        self.flush_fat()?;
        self.write_dir_entry(pos, &deleted)
    }

    /// Update attribute bits 0-5. The volume-label bit is off limits in
    /// either direction.
    pub fn set_attrs(&mut self, components: &[&str], set_mask: u8, clear_mask: u8) -> Result<u8> {
        if (set_mask | clear_mask) & ATTR_VOLUME_ID != 0 {
            return Err(Error::AttributeProtected("volume label bit".to_string()));
        }
        let set_mask = set_mask & ATTR_MASK;
        let clear_mask = clear_mask & ATTR_MASK;

        let (pos, entry) = self.resolve_entry(components)?;
        let mut updated = entry;
        let attr = (entry.attr() & !clear_mask) | set_mask;
        updated.set_attr(attr);
        self.write_dir_entry(pos, &updated)?;
        Ok(attr)
    }
}
