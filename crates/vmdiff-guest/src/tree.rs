//! Host directory trees as guests
//!
//! An extracted or already mounted guest filesystem on the host is treated as
//! a single OS root with one device mounted at `/`.
//!
//! Guest symlinks are resolved inside the mounted root: absolute targets are
//! re-rooted at the guest's `/` and `..` stops at it, so a link never reaches
//! host files outside the tree.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use vmdiff_core::{
    guest_directory_path, validate_guest_path, validate_image_path, Error, GuestProvider,
    GuestSession, MountPoint, Result, StatInfo,
};
use walkdir::WalkDir;

/// Provider for host directories holding a guest filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeProvider;

impl GuestProvider for TreeProvider {
    fn identify(&self) -> &str {
        "Host directory tree"
    }

    fn open(&self, image: &Path, _read_only: bool) -> Result<Box<dyn GuestSession>> {
        Ok(Box::new(TreeSession::open(image)?))
    }
}

/// An open host directory tree
pub struct TreeSession {
    root_id: String,
    mounted: Option<PathBuf>,
}

impl TreeSession {
    pub fn open(path: &Path) -> Result<Self> {
        let host_root = validate_image_path(path)?;
        if !host_root.is_dir() {
            return Err(Error::access(format!(
                "{} is not a directory",
                host_root.display()
            )));
        }

        let root_id = host_root.to_string_lossy().into_owned();
        Ok(Self {
            root_id,
            mounted: None,
        })
    }

    /// Translate a guest path to a host path below the mounted root
    ///
    /// Symlinks in every component are followed within the root; the final
    /// component is followed only when `follow_final` is set.
    fn host_path(&self, guest: &str, follow_final: bool) -> Result<PathBuf> {
        validate_guest_path(guest)?;
        let base = self
            .mounted
            .as_ref()
            .ok_or_else(|| Error::not_found(format!("{} (nothing mounted)", guest)))?;

        resolve_in_root(base, &guest_directory_path(guest), follow_final)
    }
}

/// Maximum symlinks followed while resolving one path
const MAX_LINK_HOPS: usize = 40;

fn path_components(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}

fn resolve_in_root(base: &Path, guest: &str, follow_final: bool) -> Result<PathBuf> {
    let mut pending = path_components(guest);
    let mut resolved: Vec<String> = Vec::new();
    let mut hops = 0;

    while let Some(component) = pending.pop_front() {
        if component == ".." {
            resolved.pop();
            continue;
        }

        let candidate = resolved
            .iter()
            .fold(base.to_path_buf(), |path, c| path.join(c))
            .join(&component);
        let follow = follow_final || !pending.is_empty();
        let is_link = fs::symlink_metadata(&candidate)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        if !(is_link && follow) {
            resolved.push(component);
            continue;
        }

        hops += 1;
        if hops > MAX_LINK_HOPS {
            return Err(Error::io(format!(
                "Too many levels of symbolic links in {}",
                guest
            )));
        }

        let target = fs::read_link(&candidate).map_err(|e| Error::from_host_io(e, guest))?;
        let target = target.to_string_lossy().replace('\\', "/");
        if target.starts_with('/') {
            resolved.clear();
        }

        let mut next = path_components(&target);
        next.extend(pending.drain(..));
        pending = next;
    }

    Ok(resolved
        .iter()
        .fold(base.to_path_buf(), |path, c| path.join(c)))
}

#[cfg(unix)]
fn stat_from_metadata(metadata: &fs::Metadata) -> StatInfo {
    use std::os::unix::fs::MetadataExt;

    StatInfo {
        size: metadata.size() as i64,
        mode: metadata.mode(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        mtime_secs: metadata.mtime(),
    }
}

#[cfg(not(unix))]
fn stat_from_metadata(metadata: &fs::Metadata) -> StatInfo {
    use std::time::UNIX_EPOCH;
    use vmdiff_core::FileKind;

    let file_type = metadata.file_type();
    let (kind, perm) = if file_type.is_dir() {
        (FileKind::Dir, 0o755)
    } else if file_type.is_symlink() {
        (FileKind::Link, 0o777)
    } else if file_type.is_file() {
        (FileKind::File, 0o644)
    } else {
        (FileKind::Unknown, 0o644)
    };
    let perm = if metadata.permissions().readonly() {
        perm & 0o555
    } else {
        perm
    };

    StatInfo {
        size: metadata.len() as i64,
        mode: kind.mode_bits() | perm,
        uid: 0,
        gid: 0,
        mtime_secs: metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64),
    }
}

impl GuestSession for TreeSession {
    fn launch(&mut self) -> Result<()> {
        Ok(())
    }

    fn inspect_operating_systems(&mut self) -> Result<Vec<String>> {
        Ok(vec![self.root_id.clone()])
    }

    fn mountpoints_for(&mut self, root: &str) -> Result<Vec<MountPoint>> {
        if root != self.root_id {
            return Err(Error::not_found(format!("Unknown OS root {}", root)));
        }
        Ok(vec![MountPoint::new("/", self.root_id.clone())])
    }

    fn mount(&mut self, device: &str, mount_path: &str, _read_only: bool) -> Result<()> {
        if guest_directory_path(mount_path) != "/" {
            return Err(Error::unsupported(format!(
                "Host trees only mount at /, not {}",
                mount_path
            )));
        }

        let source = PathBuf::from(device);
        if !source.is_dir() {
            return Err(Error::not_found(format!("No such directory {}", device)));
        }

        self.mounted = Some(source);
        Ok(())
    }

    fn find_all(&mut self, root: &str) -> Result<Vec<String>> {
        let base = self.host_path(root, true)?;
        if !base.is_dir() {
            return Err(Error::not_found(format!("{} is not a directory", root)));
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&base)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            match entry {
                Ok(entry) => {
                    if let Ok(relative) = entry.path().strip_prefix(&base) {
                        paths.push(relative.to_string_lossy().replace('\\', "/"));
                    }
                }
                Err(e) => debug!("skipping unreadable entry under {}: {}", root, e),
            }
        }
        Ok(paths)
    }

    fn stat(&mut self, path: &str) -> Result<StatInfo> {
        let host = self.host_path(path, false)?;
        let metadata = fs::symlink_metadata(&host).map_err(|e| Error::from_host_io(e, path))?;
        Ok(stat_from_metadata(&metadata))
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let host = self.host_path(path, true)?;
        if host.is_dir() {
            return Err(Error::io(format!("{} is a directory", path)));
        }
        fs::read(&host).map_err(|e| Error::from_host_io(e, path))
    }

    fn download(&mut self, path: &str, dest: &Path) -> Result<()> {
        let host = self.host_path(path, true)?;
        if host.is_dir() {
            return Err(Error::io(format!("{} is a directory", path)));
        }
        fs::copy(&host, dest).map_err(|e| Error::from_host_io(e, path))?;
        Ok(())
    }

    fn list_directory(&mut self, path: &str) -> Result<Vec<String>> {
        let host = self.host_path(path, true)?;
        let mut names = fs::read_dir(&host)
            .map_err(|e| Error::from_host_io(e, path))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn disk_size(&mut self) -> Result<u64> {
        Err(Error::unsupported("Host directory trees have no raw disk"))
    }

    fn read_raw(&mut self, _offset: u64, _len: usize) -> Result<Vec<u8>> {
        Err(Error::unsupported("Host directory trees have no raw disk"))
    }

    fn unmount_all(&mut self) -> Result<()> {
        self.mounted = None;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
