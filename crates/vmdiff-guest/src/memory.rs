//! In-memory guest images
//!
//! A [`MemoryImage`] describes a whole guest disk: named devices each holding
//! a filesystem tree, OS roots with their mount tables, and raw disk bytes.
//! [`MemoryProvider`] serves such images by host path, and every session it
//! hands out reports its lifecycle calls to a shared [`SessionLog`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use vmdiff_core::{
    guest_directory_path, Error, FileKind, GuestProvider, GuestSession, MountPoint, Result,
    StatInfo,
};

/// Modification time given to nodes that do not set one (2023-11-14)
const DEFAULT_MTIME: i64 = 1_700_000_000;

/// Size reported for directories, matching common ext4 behaviour
const DIR_SIZE: i64 = 4096;

/// How many symlinks `read_file` follows before giving up
const MAX_LINK_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeData {
    File(Vec<u8>),
    Dir,
    Symlink(String),
    Special(FileKind),
}

/// One filesystem object on an in-memory device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNode {
    data: NodeData,
    perm: u32,
    uid: u32,
    gid: u32,
    mtime_secs: i64,
}

impl MemoryNode {
    fn with_data(data: NodeData, perm: u32) -> Self {
        Self {
            data,
            perm,
            uid: 0,
            gid: 0,
            mtime_secs: DEFAULT_MTIME,
        }
    }

    /// Regular file, `rw-r--r--`, owned by root
    pub fn file(contents: impl Into<Vec<u8>>) -> Self {
        Self::with_data(NodeData::File(contents.into()), 0o644)
    }

    /// Directory, `rwxr-xr-x`, owned by root
    pub fn dir() -> Self {
        Self::with_data(NodeData::Dir, 0o755)
    }

    /// Symbolic link to `target`
    pub fn symlink(target: impl Into<String>) -> Self {
        Self::with_data(NodeData::Symlink(target.into()), 0o777)
    }

    /// Socket, device node, or FIFO
    pub fn special(kind: FileKind) -> Self {
        Self::with_data(NodeData::Special(kind), 0o600)
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Permission bits only; the type bits come from the node kind
    pub fn perm(mut self, perm: u32) -> Self {
        self.perm = perm & 0o7777;
        self
    }

    pub fn mtime(mut self, secs: i64) -> Self {
        self.mtime_secs = secs;
        self
    }

    pub fn kind(&self) -> FileKind {
        match &self.data {
            NodeData::File(_) => FileKind::File,
            NodeData::Dir => FileKind::Dir,
            NodeData::Symlink(_) => FileKind::Link,
            NodeData::Special(kind) => *kind,
        }
    }

    fn stat(&self) -> StatInfo {
        let size = match &self.data {
            NodeData::File(bytes) => bytes.len() as i64,
            NodeData::Dir => DIR_SIZE,
            NodeData::Symlink(target) => target.len() as i64,
            NodeData::Special(_) => 0,
        };

        StatInfo {
            size,
            mode: self.kind().mode_bits() | self.perm,
            uid: self.uid,
            gid: self.gid,
            mtime_secs: self.mtime_secs,
        }
    }
}

type DeviceTree = BTreeMap<String, MemoryNode>;

/// A complete in-memory guest disk
///
/// Paths given to the builder methods are device-relative and may omit the
/// leading `/`. Missing parent directories are created automatically.
///
/// # Example
///
/// ```rust
/// use vmdiff_guest::{MemoryImage, MemoryNode};
///
/// let image = MemoryImage::single_root("/dev/sda1")
///     .file("/dev/sda1", "/etc/hostname", "guest\n")
///     .node("/dev/sda1", "/home/alice", MemoryNode::dir().owner(1000, 1000));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    devices: BTreeMap<String, DeviceTree>,
    roots: Vec<(String, Vec<MountPoint>)>,
    broken_stats: BTreeSet<String>,
    failing_mounts: BTreeSet<String>,
    raw: Vec<u8>,
    launch_fails: bool,
}

impl MemoryImage {
    /// An image with no devices and no OS roots
    pub fn new() -> Self {
        Self::default()
    }

    /// One OS root whose single device is mounted at `/`
    pub fn single_root(device: &str) -> Self {
        Self::new().os_root(device, &[("/", device)])
    }

    /// Add an OS root with its `(mount_path, device)` table
    pub fn os_root(mut self, root: &str, mounts: &[(&str, &str)]) -> Self {
        let table = mounts
            .iter()
            .map(|(path, device)| MountPoint::new(*path, *device))
            .collect::<Vec<_>>();
        for mp in &table {
            self = self.device(&mp.device);
        }
        self.roots.push((root.to_string(), table));
        self
    }

    /// Make sure a device exists with an empty root directory
    pub fn device(mut self, device: &str) -> Self {
        self.devices
            .entry(device.to_string())
            .or_insert_with(|| BTreeMap::from([("/".to_string(), MemoryNode::dir())]));
        self
    }

    /// Place a node on a device, creating parent directories as needed
    pub fn node(mut self, device: &str, path: &str, node: MemoryNode) -> Self {
        self = self.device(device);
        let path = guest_directory_path(path);
        if let Some(tree) = self.devices.get_mut(device) {
            for parent in parents_of(&path) {
                tree.entry(parent).or_insert_with(MemoryNode::dir);
            }
            tree.insert(path, node);
        }
        self
    }

    pub fn file(self, device: &str, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.node(device, path, MemoryNode::file(contents))
    }

    pub fn dir(self, device: &str, path: &str) -> Self {
        self.node(device, path, MemoryNode::dir())
    }

    /// Make `stat` fail for this absolute guest path
    pub fn broken_stat(mut self, guest_path: &str) -> Self {
        self.broken_stats.insert(guest_directory_path(guest_path));
        self
    }

    /// Make every mount of this device fail
    pub fn failing_mount(mut self, device: &str) -> Self {
        self.failing_mounts.insert(device.to_string());
        self
    }

    /// Make `launch` fail
    pub fn failing_launch(mut self) -> Self {
        self.launch_fails = true;
        self
    }

    /// Raw bytes served by block reads
    pub fn raw_disk(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.raw = bytes.into();
        self
    }
}

/// Every proper ancestor of an absolute path, excluding `/`, outermost first
fn parents_of(path: &str) -> Vec<String> {
    let mut parents = Vec::new();
    let mut end = 0;
    while let Some(pos) = path[end + 1..].find('/') {
        end += pos + 1;
        parents.push(path[..end].to_string());
    }
    parents
}

fn is_at_or_under(path: &str, dir: &str) -> bool {
    dir == "/" || path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Lifecycle counters shared by all sessions of one provider
#[derive(Debug, Default)]
pub struct SessionLog {
    opened: AtomicUsize,
    launched: AtomicUsize,
    mounted: AtomicUsize,
    unmounted: AtomicUsize,
    shut_down: AtomicUsize,
    closed: AtomicUsize,
}

impl SessionLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    /// Successful mounts
    pub fn mounted(&self) -> usize {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Calls to `unmount_all`
    pub fn unmounted(&self) -> usize {
        self.unmounted.load(Ordering::SeqCst)
    }

    pub fn shut_down(&self) -> usize {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sessions opened but not yet closed
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider serving registered [`MemoryImage`]s by host path
///
/// # Example
///
/// ```rust
/// use vmdiff_core::GuestProvider;
/// use vmdiff_guest::{MemoryImage, MemoryProvider};
/// use std::path::Path;
///
/// let provider = MemoryProvider::new()
///     .with_image("vm.img", MemoryImage::single_root("/dev/sda1"));
/// let mut session = provider.open(Path::new("vm.img"), true).unwrap();
/// session.launch().unwrap();
/// assert_eq!(session.inspect_operating_systems().unwrap(), vec!["/dev/sda1"]);
/// session.close().unwrap();
/// assert_eq!(provider.log().live(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryProvider {
    images: BTreeMap<PathBuf, MemoryImage>,
    log: Arc<SessionLog>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under a host path
    pub fn with_image(mut self, path: impl Into<PathBuf>, image: MemoryImage) -> Self {
        self.images.insert(path.into(), image);
        self
    }

    /// Lifecycle counters for every session opened so far
    pub fn log(&self) -> Arc<SessionLog> {
        Arc::clone(&self.log)
    }
}

impl GuestProvider for MemoryProvider {
    fn identify(&self) -> &str {
        "In-memory guest"
    }

    fn open(&self, image: &Path, _read_only: bool) -> Result<Box<dyn GuestSession>> {
        let found = self
            .images
            .get(image)
            .ok_or_else(|| Error::access(format!("No guest image registered at {}", image.display())))?;

        SessionLog::bump(&self.log.opened);
        Ok(Box::new(MemorySession {
            image: found.clone(),
            launched: false,
            mounts: Vec::new(),
            log: Arc::clone(&self.log),
        }))
    }
}

/// An open session on a [`MemoryImage`]
pub struct MemorySession {
    image: MemoryImage,
    launched: bool,
    mounts: Vec<MountPoint>,
    log: Arc<SessionLog>,
}

impl MemorySession {
    fn require_launched(&self) -> Result<()> {
        if self.launched {
            Ok(())
        } else {
            Err(Error::invalid_operation("Session has not been launched"))
        }
    }

    /// The innermost active mount covering `path`, and the device-relative path
    fn resolve(&self, path: &str) -> Option<(&MountPoint, String)> {
        let mp = self
            .mounts
            .iter()
            .filter(|mp| is_at_or_under(path, &mp.mount_path))
            .max_by_key(|mp| mp.mount_path.len())?;

        let relative = if mp.mount_path == "/" {
            path.to_string()
        } else {
            match &path[mp.mount_path.len()..] {
                "" => "/".to_string(),
                rest => rest.to_string(),
            }
        };
        Some((mp, relative))
    }

    fn lookup(&self, path: &str) -> Result<&MemoryNode> {
        let path = guest_directory_path(path);
        let (mp, relative) = self
            .resolve(&path)
            .ok_or_else(|| Error::not_found(path.clone()))?;

        self.image
            .devices
            .get(&mp.device)
            .and_then(|tree| tree.get(&relative))
            .ok_or_else(|| Error::not_found(path))
    }

    /// Every guest path visible through the active mounts, sorted
    fn visible_paths(&self) -> BTreeSet<String> {
        let mut visible = BTreeSet::new();
        for mp in &self.mounts {
            let Some(tree) = self.image.devices.get(&mp.device) else {
                continue;
            };
            for relative in tree.keys() {
                let absolute = match (mp.mount_path.as_str(), relative.as_str()) {
                    ("/", rel) => rel.to_string(),
                    (base, "/") => base.to_string(),
                    (base, rel) => format!("{}{}", base, rel),
                };
                let shadowed = self
                    .resolve(&absolute)
                    .map_or(true, |(owner, _)| owner.mount_path != mp.mount_path);
                if !shadowed {
                    visible.insert(absolute);
                }
            }
        }
        visible
    }

    fn require_dir(&self, path: &str) -> Result<String> {
        let dir = guest_directory_path(path);
        match self.lookup(&dir)?.kind() {
            FileKind::Dir => Ok(dir),
            _ => Err(Error::io(format!("{} is not a directory", dir))),
        }
    }
}

impl GuestSession for MemorySession {
    fn launch(&mut self) -> Result<()> {
        if self.image.launch_fails {
            return Err(Error::access("Guest back end failed to launch"));
        }
        self.launched = true;
        SessionLog::bump(&self.log.launched);
        Ok(())
    }

    fn inspect_operating_systems(&mut self) -> Result<Vec<String>> {
        self.require_launched()?;
        Ok(self.image.roots.iter().map(|(root, _)| root.clone()).collect())
    }

    fn mountpoints_for(&mut self, root: &str) -> Result<Vec<MountPoint>> {
        self.require_launched()?;
        self.image
            .roots
            .iter()
            .find(|(name, _)| name == root)
            .map(|(_, table)| table.clone())
            .ok_or_else(|| Error::not_found(format!("Unknown OS root {}", root)))
    }

    fn mount(&mut self, device: &str, mount_path: &str, _read_only: bool) -> Result<()> {
        self.require_launched()?;

        if self.image.failing_mounts.contains(device) {
            return Err(Error::io(format!("mount {} failed", device)));
        }
        if !self.image.devices.contains_key(device) {
            return Err(Error::not_found(format!("No such device {}", device)));
        }

        let mount_path = guest_directory_path(mount_path);
        if mount_path != "/" {
            self.require_dir(&mount_path)?;
        }

        self.mounts
            .retain(|mp| !is_at_or_under(&mp.mount_path, &mount_path));
        self.mounts.push(MountPoint::new(mount_path, device));
        SessionLog::bump(&self.log.mounted);
        debug!("mounted {} at {}", device, self.mounts[self.mounts.len() - 1].mount_path);
        Ok(())
    }

    fn find_all(&mut self, root: &str) -> Result<Vec<String>> {
        self.require_launched()?;
        let dir = self.require_dir(root)?;

        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };

        Ok(self
            .visible_paths()
            .into_iter()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .filter(|relative| !relative.is_empty())
            .collect())
    }

    fn stat(&mut self, path: &str) -> Result<StatInfo> {
        self.require_launched()?;
        if self.image.broken_stats.contains(&guest_directory_path(path)) {
            return Err(Error::io(format!("stat {} failed", path)));
        }
        Ok(self.lookup(path)?.stat())
    }

    fn exists(&mut self, path: &str) -> Result<bool> {
        self.require_launched()?;
        match self.lookup(path) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.require_launched()?;
        let mut current = guest_directory_path(path);

        for _ in 0..MAX_LINK_DEPTH {
            match &self.lookup(&current)?.data {
                NodeData::File(bytes) => return Ok(bytes.clone()),
                NodeData::Symlink(target) if target.starts_with('/') => {
                    current = guest_directory_path(target);
                }
                NodeData::Symlink(target) => {
                    let parent = match current.rfind('/') {
                        Some(0) | None => "/".to_string(),
                        Some(pos) => current[..pos].to_string(),
                    };
                    current = vmdiff_core::join_guest_path(&parent, target);
                }
                NodeData::Dir => return Err(Error::io(format!("{} is a directory", current))),
                NodeData::Special(kind) => {
                    return Err(Error::io(format!("{} is a {}", current, kind)))
                }
            }
        }

        Err(Error::io(format!("Too many levels of symbolic links: {}", path)))
    }

    fn list_directory(&mut self, path: &str) -> Result<Vec<String>> {
        self.require_launched()?;
        let dir = self.require_dir(path)?;

        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };

        Ok(self
            .visible_paths()
            .into_iter()
            .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .collect())
    }

    fn disk_size(&mut self) -> Result<u64> {
        Ok(self.image.raw.len() as u64)
    }

    fn read_raw(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let total = self.image.raw.len();
        let start = match usize::try_from(offset) {
            Ok(start) if start < total => start,
            _ => return Ok(Vec::new()),
        };
        let end = start.saturating_add(len).min(total);
        Ok(self.image.raw[start..end].to_vec())
    }

    fn unmount_all(&mut self) -> Result<()> {
        self.mounts.clear();
        SessionLog::bump(&self.log.unmounted);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.launched = false;
        SessionLog::bump(&self.log.shut_down);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        SessionLog::bump(&self.log.closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_device_image() -> MemoryImage {
        MemoryImage::new()
            .os_root("/dev/sda2", &[("/", "/dev/sda2"), ("/boot", "/dev/sda1")])
            .dir("/dev/sda2", "/boot")
            .file("/dev/sda2", "/boot/hidden", "shadowed")
            .file("/dev/sda2", "/etc/hostname", "guest\n")
            .file("/dev/sda1", "/vmlinuz", vec![0u8; 16])
    }

    fn open(image: MemoryImage) -> Box<dyn GuestSession> {
        let provider = MemoryProvider::new().with_image("vm.img", image);
        let mut session = provider.open(Path::new("vm.img"), true).unwrap();
        session.launch().unwrap();
        session
    }

    fn mount_all(session: &mut Box<dyn GuestSession>) {
        session.mount("/dev/sda2", "/", true).unwrap();
        session.mount("/dev/sda1", "/boot", true).unwrap();
    }

    #[test]
    fn test_parents_of() {
        assert_eq!(parents_of("/a/b/c"), vec!["/a", "/a/b"]);
        assert!(parents_of("/a").is_empty());
        assert!(parents_of("/").is_empty());
    }

    #[test]
    fn test_unknown_image_is_access_error() {
        let provider = MemoryProvider::new();
        let result = provider.open(Path::new("missing.img"), true);
        assert!(matches!(result, Err(Error::Access(_))));
    }

    #[test]
    fn test_find_all_through_mounts() {
        let mut session = open(two_device_image());
        mount_all(&mut session);

        let paths = session.find_all("/").unwrap();
        assert_eq!(paths, vec!["boot", "boot/vmlinuz", "etc", "etc/hostname"]);
    }

    #[test]
    fn test_find_all_subdirectory() {
        let mut session = open(two_device_image());
        mount_all(&mut session);

        assert_eq!(session.find_all("/boot").unwrap(), vec!["vmlinuz"]);
        assert!(session.find_all("/etc/hostname").is_err());
    }

    #[test]
    fn test_nested_mount_needs_existing_dir() {
        let image = MemoryImage::new()
            .os_root("/dev/sda2", &[("/", "/dev/sda2"), ("/boot", "/dev/sda1")])
            .file("/dev/sda1", "/vmlinuz", "k");
        let mut session = open(image);

        assert!(session.mount("/dev/sda1", "/boot", true).is_err());
        session.mount("/dev/sda2", "/", true).unwrap();
        assert!(session.mount("/dev/sda1", "/boot", true).is_err());
    }

    #[test]
    fn test_mount_at_root_replaces_everything() {
        let mut session = open(two_device_image());
        session.mount("/dev/sda1", "/", true).unwrap();
        mount_all(&mut session);
        session.mount("/dev/sda1", "/", true).unwrap();

        assert_eq!(session.find_all("/").unwrap(), vec!["vmlinuz"]);
    }

    #[test]
    fn test_stat_and_read() {
        let mut session = open(two_device_image());
        mount_all(&mut session);

        let stat = session.stat("/etc/hostname").unwrap();
        assert_eq!(stat.size, 6);
        assert_eq!(stat.kind(), FileKind::File);
        assert_eq!(stat.mode & 0o777, 0o644);

        assert_eq!(session.read_file("/etc/hostname").unwrap(), b"guest\n");
        assert!(session.read_file("/etc").is_err());
        assert!(session.read_file("/nope").unwrap_err().is_not_found());
        assert!(session.exists("/boot/vmlinuz").unwrap());
        assert!(!session.exists("/boot/hidden").unwrap());
    }

    #[test]
    fn test_read_through_symlink() {
        let image = MemoryImage::single_root("/dev/sda1")
            .file("/dev/sda1", "/etc/os-release", "ID=test\n")
            .node("/dev/sda1", "/etc/release", MemoryNode::symlink("os-release"))
            .node("/dev/sda1", "/release", MemoryNode::symlink("/etc/release"));
        let mut session = open(image);
        session.mount("/dev/sda1", "/", true).unwrap();

        assert_eq!(session.read_file("/release").unwrap(), b"ID=test\n");
        assert_eq!(session.stat("/release").unwrap().kind(), FileKind::Link);
    }

    #[test]
    fn test_broken_stat() {
        let image = MemoryImage::single_root("/dev/sda1")
            .file("/dev/sda1", "/weird", "x")
            .broken_stat("/weird");
        let mut session = open(image);
        session.mount("/dev/sda1", "/", true).unwrap();

        assert!(session.stat("/weird").is_err());
        assert!(session.exists("/weird").unwrap());
    }

    #[test]
    fn test_list_directory() {
        let mut session = open(two_device_image());
        mount_all(&mut session);

        assert_eq!(session.list_directory("/").unwrap(), vec!["boot", "etc"]);
        assert_eq!(session.list_directory("/etc/").unwrap(), vec!["hostname"]);
    }

    #[test]
    fn test_raw_reads_clamp() {
        let image = MemoryImage::new().raw_disk((0u8..10).collect::<Vec<_>>());
        let mut session = open(image);

        assert_eq!(session.disk_size().unwrap(), 10);
        assert_eq!(session.read_raw(8, 4).unwrap(), vec![8, 9]);
        assert!(session.read_raw(10, 4).unwrap().is_empty());
        assert_eq!(session.read_raw_block(1, 4).unwrap(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_lifecycle_counters() {
        let provider = MemoryProvider::new().with_image("vm.img", two_device_image());
        let log = provider.log();

        let mut session = provider.open(Path::new("vm.img"), true).unwrap();
        session.launch().unwrap();
        session.mount("/dev/sda2", "/", true).unwrap();
        assert_eq!(log.live(), 1);

        session.unmount_all().unwrap();
        session.shutdown().unwrap();
        session.close().unwrap();

        assert_eq!(log.opened(), 1);
        assert_eq!(log.launched(), 1);
        assert_eq!(log.mounted(), 1);
        assert_eq!(log.unmounted(), 1);
        assert_eq!(log.shut_down(), 1);
        assert_eq!(log.closed(), 1);
        assert_eq!(log.live(), 0);
    }

    #[test]
    fn test_failing_launch_and_mount() {
        let provider = MemoryProvider::new().with_image(
            "vm.img",
            MemoryImage::single_root("/dev/sda1")
                .failing_mount("/dev/sda1")
                .failing_launch(),
        );
        let mut session = provider.open(Path::new("vm.img"), true).unwrap();
        assert!(matches!(session.launch(), Err(Error::Access(_))));
        assert!(session.inspect_operating_systems().is_err());
    }
}
