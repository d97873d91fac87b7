//! Core traits for guest access

use crate::{
    error::{Error, Result},
    types::{MountPoint, StatInfo},
};
use std::path::Path;

/// Trait for Guest Access Providers
///
/// A provider knows how to open a disk image and hand back a session that
/// performs the actual mounting, listing, stat, and raw read operations.
pub trait GuestProvider: Send + Sync {
    /// Get a human-readable identifier for this provider
    fn identify(&self) -> &str;

    /// Open a disk image, returning a session that has not been launched yet
    ///
    /// Fails with [`Error::Access`] when the image cannot be attached.
    fn open(&self, image: &Path, read_only: bool) -> Result<Box<dyn GuestSession>>;
}

/// Trait for an opened guest access session
///
/// All paths are absolute guest paths. Sessions are single-threaded; callers
/// that want parallelism open one session per thread.
pub trait GuestSession: Send {
    /// Start the appliance/back end behind this session
    fn launch(&mut self) -> Result<()>;

    /// Detect operating-system roots on the attached disk
    fn inspect_operating_systems(&mut self) -> Result<Vec<String>>;

    /// List `(mount_path, device)` pairs for one OS root
    fn mountpoints_for(&mut self, root: &str) -> Result<Vec<MountPoint>>;

    /// Mount a device at a guest path
    fn mount(&mut self, device: &str, mount_path: &str, read_only: bool) -> Result<()>;

    /// Recursively list every path below `root`, relative to it
    fn find_all(&mut self, root: &str) -> Result<Vec<String>>;

    /// Stat a single path without following a final symlink
    fn stat(&mut self, path: &str) -> Result<StatInfo>;

    /// Check whether a path exists
    fn exists(&mut self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read the full raw contents of a file
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>>;

    /// Copy a guest file byte-for-byte to a host path
    fn download(&mut self, path: &str, dest: &Path) -> Result<()> {
        let data = self.read_file(path)?;
        std::fs::write(dest, data)?;
        Ok(())
    }

    /// List the entry names of a directory
    fn list_directory(&mut self, path: &str) -> Result<Vec<String>>;

    /// Size of the attached disk in bytes
    fn disk_size(&mut self) -> Result<u64>;

    /// Read raw disk bytes at `offset`
    ///
    /// Returns fewer than `len` bytes when the range crosses the end of the
    /// disk, and an empty buffer when `offset` is at or past the end.
    fn read_raw(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Read one fixed-size block of raw disk storage
    fn read_raw_block(&mut self, index: u64, block_size: usize) -> Result<Vec<u8>> {
        let offset = crate::security::checked_multiply_u64(index, block_size as u64, "block offset")?;
        self.read_raw(offset, block_size)
    }

    /// Unmount every mounted filesystem
    fn unmount_all(&mut self) -> Result<()>;

    /// Stop the back end
    fn shutdown(&mut self) -> Result<()>;

    /// Release the session handle
    fn close(&mut self) -> Result<()>;
}
