//! Core types for guest inspection

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// File type mask and type bits from `st_mode`
const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// Result of a successful stat on a guest path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatInfo {
    /// Size in bytes as reported by the filesystem
    pub size: i64,

    /// Full `st_mode` (type bits and permission bits)
    pub mode: u32,

    /// Owner user id
    pub uid: u32,

    /// Owner group id
    pub gid: u32,

    /// Modification time, seconds since the Unix epoch
    pub mtime_secs: i64,
}

impl StatInfo {
    /// File type encoded in the mode bits
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }
}

/// Type of a filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
    Link,
    Socket,
    CharDev,
    BlockDev,
    Fifo,
    Unknown,
}

impl FileKind {
    /// Decode the type bits of a POSIX mode
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileKind::File,
            S_IFDIR => FileKind::Dir,
            S_IFLNK => FileKind::Link,
            S_IFSOCK => FileKind::Socket,
            S_IFCHR => FileKind::CharDev,
            S_IFBLK => FileKind::BlockDev,
            S_IFIFO => FileKind::Fifo,
            _ => FileKind::Unknown,
        }
    }

    /// The type bits for this kind (zero for `Unknown`)
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileKind::File => S_IFREG,
            FileKind::Dir => S_IFDIR,
            FileKind::Link => S_IFLNK,
            FileKind::Socket => S_IFSOCK,
            FileKind::CharDev => S_IFCHR,
            FileKind::BlockDev => S_IFBLK,
            FileKind::Fifo => S_IFIFO,
            FileKind::Unknown => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Dir => "dir",
            FileKind::Link => "link",
            FileKind::Socket => "socket",
            FileKind::CharDev => "chardev",
            FileKind::BlockDev => "blockdev",
            FileKind::Fifo => "fifo",
            FileKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A filesystem root exposed at a guest path, backed by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Guest path the device is mounted at (e.g. `/boot`)
    pub mount_path: String,

    /// Device or partition identifier (e.g. `/dev/sda1`)
    pub device: String,
}

impl MountPoint {
    pub fn new(mount_path: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            mount_path: mount_path.into(),
            device: device.into(),
        }
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.device, self.mount_path)
    }
}

/// One path produced by a filesystem walk
///
/// A failed stat is kept as `stat: None`; every derived field then falls back
/// to its sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute guest path
    pub path: String,

    /// Stat result, `None` when stat failed
    pub stat: Option<StatInfo>,
}

impl FileEntry {
    pub fn new(path: String, stat: Option<StatInfo>) -> Self {
        Self { path, stat }
    }

    pub fn kind(&self) -> FileKind {
        self.stat.map(|s| s.kind()).unwrap_or(FileKind::Unknown)
    }

    /// Size in bytes, `None` when unknown
    pub fn size(&self) -> Option<u64> {
        self.stat.and_then(|s| u64::try_from(s.size).ok())
    }

    /// Permission triads (`rwxr-xr-x`), or `-` when unknown
    pub fn permissions(&self) -> String {
        match self.stat {
            Some(s) => format_permissions(s.mode),
            None => "-".to_string(),
        }
    }

    /// Local modification time, or `-` when unknown or not positive
    pub fn modified_time(&self) -> String {
        match self.stat {
            Some(s) => format_timestamp(s.mtime_secs),
            None => "-".to_string(),
        }
    }

    pub fn owner_uid(&self) -> Option<u32> {
        self.stat.map(|s| s.uid)
    }

    pub fn owner_gid(&self) -> Option<u32> {
        self.stat.map(|s| s.gid)
    }

    /// Render as a listing row
    pub fn row(&self) -> FileRow {
        FileRow {
            size: self.size().map(RowSize::Bytes).unwrap_or(RowSize::Unknown),
            permissions: self.permissions(),
            modified_time: self.modified_time(),
            path: self.path.clone(),
        }
    }
}

/// Size column of a listing row: a byte count or `-`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSize {
    Bytes(u64),
    Unknown,
}

impl fmt::Display for RowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSize::Bytes(n) => write!(f, "{}", n),
            RowSize::Unknown => f.write_str("-"),
        }
    }
}

impl Serialize for RowSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RowSize::Bytes(n) => serializer.serialize_u64(*n),
            RowSize::Unknown => serializer.serialize_str("-"),
        }
    }
}

/// One row of a file listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRow {
    pub size: RowSize,
    pub permissions: String,
    pub modified_time: String,
    pub path: String,
}

impl fmt::Display for FileRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.size, self.permissions, self.modified_time, self.path
        )
    }
}

/// Convert POSIX mode bits to an `rwxrwxrwx` string (user, group, other)
pub fn format_permissions(mode: u32) -> String {
    const FLAGS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];

    FLAGS
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}

/// Format seconds since the epoch as local `YYYY-MM-DD HH:MM:SS`
///
/// Non-positive or unrepresentable timestamps render as `-`.
pub fn format_timestamp(secs: i64) -> String {
    if secs <= 0 {
        return "-".to_string();
    }

    match Local.timestamp_opt(secs, 0).earliest() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(mode: u32, size: i64) -> StatInfo {
        StatInfo {
            size,
            mode,
            uid: 1000,
            gid: 100,
            mtime_secs: 1_700_000_000,
        }
    }

    #[test]
    fn test_file_kind_from_mode() {
        assert_eq!(FileKind::from_mode(0o100644), FileKind::File);
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Dir);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::Link);
        assert_eq!(FileKind::from_mode(0o140755), FileKind::Socket);
        assert_eq!(FileKind::from_mode(0o020620), FileKind::CharDev);
        assert_eq!(FileKind::from_mode(0o060660), FileKind::BlockDev);
        assert_eq!(FileKind::from_mode(0o010644), FileKind::Fifo);
        assert_eq!(FileKind::from_mode(0o000644), FileKind::Unknown);
    }

    #[test]
    fn test_mode_bits_roundtrip() {
        for kind in [
            FileKind::File,
            FileKind::Dir,
            FileKind::Link,
            FileKind::Socket,
            FileKind::CharDev,
            FileKind::BlockDev,
            FileKind::Fifo,
        ] {
            assert_eq!(FileKind::from_mode(kind.mode_bits() | 0o644), kind);
        }
    }

    #[test]
    fn test_format_permissions() {
        assert_eq!(format_permissions(0o755), "rwxr-xr-x");
        assert_eq!(format_permissions(0o100644), "rw-r--r--");
        assert_eq!(format_permissions(0o000), "---------");
        assert_eq!(format_permissions(0o777), "rwxrwxrwx");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "-");
        assert_eq!(format_timestamp(-5), "-");

        let rendered = format_timestamp(1_700_000_000);
        assert_eq!(rendered.len(), 19);
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[10..11], " ");
    }

    #[test]
    fn test_entry_with_failed_stat() {
        let entry = FileEntry::new("/broken".to_string(), None);
        assert_eq!(entry.kind(), FileKind::Unknown);
        assert_eq!(entry.size(), None);
        assert_eq!(entry.permissions(), "-");
        assert_eq!(entry.modified_time(), "-");

        let row = entry.row();
        assert_eq!(row.size, RowSize::Unknown);
        assert_eq!(row.to_string(), "- - - /broken");
    }

    #[test]
    fn test_entry_row() {
        let entry = FileEntry::new("/hello.txt".to_string(), Some(stat(0o100644, 2)));
        let row = entry.row();
        assert_eq!(row.size, RowSize::Bytes(2));
        assert_eq!(row.permissions, "rw-r--r--");
        assert_eq!(row.path, "/hello.txt");
    }

    #[test]
    fn test_negative_size_is_unknown() {
        let entry = FileEntry::new("/odd".to_string(), Some(stat(0o100644, -1)));
        assert_eq!(entry.size(), None);
        assert_eq!(entry.kind(), FileKind::File);
    }

    #[test]
    fn test_mount_point_display() {
        let mp = MountPoint::new("/boot", "/dev/sda1");
        assert_eq!(mp.to_string(), "/dev/sda1 on /boot");
    }
}
