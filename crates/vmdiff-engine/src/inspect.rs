//! Per-path inspection: existence checks and directory listings

use crate::walker::normalize_walk_path;
use serde::Serialize;
use vmdiff_core::{
    absolute_guest_path, format_permissions, format_timestamp, guest_directory_path,
    join_guest_path, FileKind, GuestSession, Result, RowSize,
};

/// What is known about one guest path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub exists: bool,
    pub full_path: String,

    /// `None` when the path does not exist, `Unknown` when stat failed
    pub kind: Option<FileKind>,

    pub owner: Option<u32>,
    pub group: Option<u32>,
    pub permissions: String,
    pub size: RowSize,
    pub modified_time: String,
}

impl FileStatus {
    fn absent(full_path: String) -> Self {
        Self {
            exists: false,
            full_path,
            kind: None,
            owner: None,
            group: None,
            permissions: "-".to_string(),
            size: RowSize::Unknown,
            modified_time: "-".to_string(),
        }
    }
}

/// Check whether `name` exists and describe it
///
/// A missing path is reported with `exists = false`, not as an error.
pub fn file_status(guest: &mut dyn GuestSession, name: &str) -> Result<FileStatus> {
    let full_path = absolute_guest_path(name);
    if !guest.exists(&full_path)? {
        return Ok(FileStatus::absent(full_path));
    }

    let status = match guest.stat(&full_path) {
        Ok(stat) => FileStatus {
            exists: true,
            kind: Some(stat.kind()),
            owner: Some(stat.uid),
            group: Some(stat.gid),
            permissions: format_permissions(stat.mode),
            size: u64::try_from(stat.size).map_or(RowSize::Unknown, RowSize::Bytes),
            modified_time: format_timestamp(stat.mtime_secs),
            full_path,
        },
        Err(e) => {
            tracing::debug!("{} exists but stat failed: {}", full_path, e);
            FileStatus {
                exists: true,
                kind: Some(FileKind::Unknown),
                ..FileStatus::absent(full_path)
            }
        }
    };

    Ok(status)
}

/// One name in a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
}

/// Contents of one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    pub directory: String,
    pub entries: Vec<DirectoryEntry>,
}

impl DirectoryListing {
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

/// List the names in `dir`, each with its [`FileStatus`] when `detailed`
pub fn list_directory(
    guest: &mut dyn GuestSession,
    dir: &str,
    detailed: bool,
) -> Result<DirectoryListing> {
    let directory = guest_directory_path(dir);
    let names = guest.list_directory(&directory)?;

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let status = if detailed {
            Some(file_status(guest, &join_guest_path(&directory, &name))?)
        } else {
            None
        };
        entries.push(DirectoryEntry { name, status });
    }

    Ok(DirectoryListing { directory, entries })
}

/// Every absolute path below `dir`, sorted
pub fn all_filenames(guest: &mut dyn GuestSession, dir: &str) -> Result<Vec<String>> {
    let directory = guest_directory_path(dir);
    let mut paths = guest
        .find_all(&directory)?
        .iter()
        .map(|relative| normalize_walk_path(&directory, relative))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}
