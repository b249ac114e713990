//! Volume integrity checking.
//!
//! `verify` never repairs and never aborts early: it walks every directory
//! reachable from the root, follows every chain, and reports everything it
//! finds in one pass. The cross-link list is sorted by cluster index so
//! reports are stable across runs.

use crate::dir::DirHandle;
use crate::error::Result;
use crate::fat::Fat;
use crate::volume::Volume;
use crate::{FAT_BAD, FAT_CHAIN_MAX};

use log::warn;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// One cluster referenced by more than one chain.
#[derive(Debug, Clone)]
pub struct CrossLink {
    pub cluster: u32,
    /// Paths of the entries whose chains share the cluster.
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// In-use clusters reachable from no directory entry.
    pub orphan_clusters: Vec<u32>,
    /// Clusters shared between chains, sorted by cluster index.
    pub cross_links: Vec<CrossLink>,
    /// Paths whose chain ends on something other than an end-of-chain mark
    /// (free, reserved, bad, out-of-range pointer, or a cycle).
    pub unterminated_chains: Vec<String>,
    /// Paths whose first cluster points outside the data area.
    pub out_of_range_entries: Vec<String>,
    /// Cluster indices where FAT copy 1 and copy 2 disagree, compared at
    /// the entry level so the unused high nibble of a trailing shared byte
    /// does not count.
    pub fat_copy_mismatches: Vec<u32>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_clusters.is_empty()
            && self.cross_links.is_empty()
            && self.unterminated_chains.is_empty()
            && self.out_of_range_entries.is_empty()
            && self.fat_copy_mismatches.is_empty()
    }

    pub fn problem_count(&self) -> usize {
        self.orphan_clusters.len()
            + self.cross_links.len()
            + self.unterminated_chains.len()
            + self.out_of_range_entries.len()
            + self.fat_copy_mismatches.len()
    }
}

impl Volume {
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut refs: BTreeMap<u32, Vec<String>> = BTreeMap::new();

        // walk every reachable directory, breadth-first, cycle-guarded
        let mut queue: VecDeque<(DirHandle, String)> = VecDeque::new();
        let mut visited_dirs: HashSet<u32> = HashSet::new();
        queue.push_back((DirHandle::FixedRoot, "\\".to_string()));

        while let Some((dir, prefix)) = queue.pop_front() {
            let entries = match self.live_entries(&dir) {
                Ok(entries) => entries,
                // the chain problem was recorded when the entry was seen
                Err(_) => continue,
            };
            for (_, entry) in entries {
                if entry.is_volume_label() || entry.is_dot() {
                    continue;
                }
                let path = format!("{}{}", prefix, entry.name());
                let first = entry.first_cluster();

                if first == 0 {
                    if entry.is_dir() || entry.file_size() != 0 {
                        report.out_of_range_entries.push(path);
                    }
                    continue;
                }
                if !self.geometry().contains_cluster(first) {
                    report.out_of_range_entries.push(path);
                    continue;
                }

                self.trace_chain(first, &path, &mut refs, &mut report);

                if entry.is_dir() && visited_dirs.insert(first) {
                    queue.push_back((DirHandle::Chain(first), format!("{}\\", path)));
                }
            }
        }

        for (&cluster, paths) in &refs {
            if paths.len() > 1 {
                report.cross_links.push(CrossLink {
                    cluster,
                    entries: paths.clone(),
                });
            }
        }

        for cluster in 2..=self.geometry().max_cluster() {
            let value = self.fat().get(cluster);
            let in_use = value >= 2 && value != FAT_BAD;
            if in_use && !refs.contains_key(&cluster) {
                report.orphan_clusters.push(cluster);
            }
        }

        let second = self.read_fat_copy(1)?;
        report.fat_copy_mismatches = self.compare_fat_copies(&second);

        if !report.is_clean() {
            warn!("verify found {} problem(s)", report.problem_count());
        }
        Ok(report)
    }

    /// Follow one chain, recording every visited cluster against `path` and
    /// classifying how the chain ends.
    fn trace_chain(
        &self,
        first: u32,
        path: &str,
        refs: &mut BTreeMap<u32, Vec<String>>,
        report: &mut VerifyReport,
    ) {
        let mut current = first;
        let mut seen: HashSet<u32> = HashSet::new();
        loop {
            if !self.geometry().contains_cluster(current) || !seen.insert(current) {
                report.unterminated_chains.push(path.to_string());
                return;
            }
            refs.entry(current).or_default().push(path.to_string());

            let value = self.fat().get(current);
            if Fat::is_end_of_chain(value) {
                return;
            }
            if (2..=FAT_CHAIN_MAX).contains(&value) {
                current = value as u32;
            } else {
                report.unterminated_chains.push(path.to_string());
                return;
            }
        }
    }

    fn compare_fat_copies(&self, second: &Fat) -> Vec<u32> {
        let mut mismatches = Vec::new();
        for cluster in 0..=self.geometry().max_cluster() {
            if self.fat().get(cluster) != second.get(cluster) {
                mismatches.push(cluster);
            }
        }
        mismatches
    }
}
