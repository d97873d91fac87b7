//! Ownership and size statistics over a walk

use crate::identity::IdentityMap;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::debug;
use vmdiff_core::{FileEntry, FileKind};

/// Usage attributed to one uid
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserUsage {
    pub uid: u32,
    pub user: String,
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

/// Usage attributed to one gid
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupUsage {
    pub gid: u32,
    pub group: String,
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

/// Totals and per-owner breakdowns for one image
///
/// `per_user` and `per_group` are sorted by bytes descending, then id
/// ascending. Per-owner `bytes` count regular files only, so they sum to
/// `total_file_bytes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub files_count: u64,
    pub dirs_count: u64,
    pub total_file_bytes: u64,
    pub total_dir_bytes: u64,
    pub total_bytes: u64,
    pub users_total: usize,
    pub users_with_files: usize,
    pub per_user: Vec<UserUsage>,
    pub groups_total: usize,
    pub groups_with_files: usize,
    pub per_group: Vec<GroupUsage>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    files: u64,
    dirs: u64,
    bytes: u64,
}

/// Accumulates walker entries into an [`AggregateReport`]
#[derive(Debug, Default)]
pub struct StatAggregator {
    files_count: u64,
    dirs_count: u64,
    total_file_bytes: u64,
    total_dir_bytes: u64,
    per_uid: BTreeMap<u32, Usage>,
    per_gid: BTreeMap<u32, Usage>,
    skipped: u64,
}

impl StatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one entry
    ///
    /// Entries whose stat failed are skipped; only regular files and
    /// directories are counted.
    pub fn add(&mut self, entry: &FileEntry) {
        let Some(stat) = entry.stat else {
            self.skipped += 1;
            return;
        };
        let size = u64::try_from(stat.size).unwrap_or(0);

        match stat.kind() {
            FileKind::File => {
                self.files_count += 1;
                self.total_file_bytes += size;
                for usage in [
                    self.per_uid.entry(stat.uid).or_default(),
                    self.per_gid.entry(stat.gid).or_default(),
                ] {
                    usage.files += 1;
                    usage.bytes += size;
                }
            }
            FileKind::Dir => {
                self.dirs_count += 1;
                self.total_dir_bytes += size;
                self.per_uid.entry(stat.uid).or_default().dirs += 1;
                self.per_gid.entry(stat.gid).or_default().dirs += 1;
            }
            _ => {}
        }
    }

    /// Build the report, naming owners from `identities`
    pub fn finish(self, identities: &IdentityMap) -> AggregateReport {
        if self.skipped > 0 {
            debug!("{} entries without stat were not counted", self.skipped);
        }

        let per_user = breakdown(&self.per_uid, identities.users())
            .into_iter()
            .map(|(uid, usage)| UserUsage {
                uid,
                user: identities.user_name(uid),
                files: usage.files,
                dirs: usage.dirs,
                bytes: usage.bytes,
            })
            .collect();

        let per_group = breakdown(&self.per_gid, identities.groups())
            .into_iter()
            .map(|(gid, usage)| GroupUsage {
                gid,
                group: identities.group_name(gid),
                files: usage.files,
                dirs: usage.dirs,
                bytes: usage.bytes,
            })
            .collect();

        AggregateReport {
            files_count: self.files_count,
            dirs_count: self.dirs_count,
            total_file_bytes: self.total_file_bytes,
            total_dir_bytes: self.total_dir_bytes,
            total_bytes: self.total_file_bytes + self.total_dir_bytes,
            users_total: identities.users().len(),
            users_with_files: self.per_uid.values().filter(|u| u.files > 0).count(),
            per_user,
            groups_total: identities.groups().len(),
            groups_with_files: self.per_gid.values().filter(|u| u.files > 0).count(),
            per_group,
        }
    }
}

/// Every known id plus every observed id, sorted by bytes desc then id asc
fn breakdown(observed: &BTreeMap<u32, Usage>, known: &BTreeMap<u32, String>) -> Vec<(u32, Usage)> {
    let mut rows: Vec<(u32, Usage)> = known
        .keys()
        .chain(observed.keys().filter(|id| !known.contains_key(id)))
        .map(|&id| (id, observed.get(&id).copied().unwrap_or_default()))
        .collect();

    rows.sort_by_key(|&(id, usage)| (Reverse(usage.bytes), id));
    rows
}
