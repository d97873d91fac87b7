//! Raw disk image guests
//!
//! A raw image is a plain sector dump with no container metadata (`.img`,
//! `.raw`, `.dd`). It has no filesystem back end behind it, so sessions only
//! serve raw block reads; OS inspection finds nothing.

use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;
use vmdiff_core::{
    validate_allocation_size, validate_image_path, Error, GuestProvider, GuestSession,
    MountPoint, Result, StatInfo, MAX_ALLOCATION_SIZE,
};
use vmdiff_pipeline::{ByteWindow, MappedImage};

/// Configuration for opening raw images
#[derive(Debug, Clone)]
pub struct RawImageConfig {
    /// Memory-map the image instead of seeking a file handle per read
    pub use_mmap: bool,
}

impl Default for RawImageConfig {
    fn default() -> Self {
        Self { use_mmap: true }
    }
}

enum Backing {
    Mapped(MappedImage),
    Stream(File),
}

/// Provider for raw disk image files
#[derive(Debug, Clone, Default)]
pub struct RawImageProvider {
    config: RawImageConfig,
}

impl RawImageProvider {
    pub fn new(config: RawImageConfig) -> Self {
        Self { config }
    }
}

impl GuestProvider for RawImageProvider {
    fn identify(&self) -> &str {
        "Raw disk image"
    }

    fn open(&self, image: &Path, _read_only: bool) -> Result<Box<dyn GuestSession>> {
        Ok(Box::new(RawImageSession::open(image, &self.config)?))
    }
}

/// An open raw image
///
/// # Example
///
/// ```rust,no_run
/// use vmdiff_core::GuestSession;
/// use vmdiff_guest::{RawImageConfig, RawImageSession};
/// use std::path::Path;
///
/// let mut session = RawImageSession::open(Path::new("disk.img"), &RawImageConfig::default()).unwrap();
/// let first_sector = session.read_raw(0, 512).unwrap();
/// ```
pub struct RawImageSession {
    path: PathBuf,
    backing: Option<Backing>,
    length: u64,
}

impl RawImageSession {
    /// Open a raw image file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Access`] if the path does not name a readable regular
    /// file
    pub fn open(path: &Path, config: &RawImageConfig) -> Result<Self> {
        let path = validate_image_path(path)?;
        let file = File::open(&path)
            .map_err(|e| Error::access(format!("Cannot open {}: {}", path.display(), e)))?;
        let metadata = file
            .metadata()
            .map_err(|e| Error::access(format!("Cannot stat {}: {}", path.display(), e)))?;

        if !metadata.is_file() {
            return Err(Error::access(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let length = metadata.len();
        let backing = if config.use_mmap && length > 0 {
            match MappedImage::from_file(&file) {
                Ok(mapped) => Backing::Mapped(mapped),
                Err(e) => {
                    debug!("falling back to file reads for {}: {}", path.display(), e);
                    Backing::Stream(file)
                }
            }
        } else {
            Backing::Stream(file)
        };

        Ok(Self {
            path,
            backing: Some(backing),
            length,
        })
    }

    /// Canonical host path of the image
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn no_filesystem<T>(&self) -> Result<T> {
        Err(Error::unsupported(format!(
            "{} is a raw image without a filesystem back end",
            self.path.display()
        )))
    }
}

impl GuestSession for RawImageSession {
    fn launch(&mut self) -> Result<()> {
        Ok(())
    }

    fn inspect_operating_systems(&mut self) -> Result<Vec<String>> {
        debug!("raw image {} has no OS inspection", self.path.display());
        Ok(Vec::new())
    }

    fn mountpoints_for(&mut self, _root: &str) -> Result<Vec<MountPoint>> {
        Ok(Vec::new())
    }

    fn mount(&mut self, _device: &str, _mount_path: &str, _read_only: bool) -> Result<()> {
        self.no_filesystem()
    }

    fn find_all(&mut self, _root: &str) -> Result<Vec<String>> {
        self.no_filesystem()
    }

    fn stat(&mut self, _path: &str) -> Result<StatInfo> {
        self.no_filesystem()
    }

    fn read_file(&mut self, _path: &str) -> Result<Vec<u8>> {
        self.no_filesystem()
    }

    fn list_directory(&mut self, _path: &str) -> Result<Vec<String>> {
        self.no_filesystem()
    }

    fn disk_size(&mut self) -> Result<u64> {
        Ok(self.length)
    }

    fn read_raw(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        validate_allocation_size(len as u64, MAX_ALLOCATION_SIZE, "Raw read")?;

        match self.backing.as_mut() {
            Some(Backing::Mapped(mapped)) => Ok(mapped.slice_at(offset, len).to_vec()),
            Some(Backing::Stream(file)) => {
                let window = ByteWindow::clamped(&mut *file, offset, len as u64)?;
                Ok(window.read_all()?)
            }
            None => Err(Error::invalid_operation("Raw image session is closed")),
        }
    }

    fn unmount_all(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.backing = None;
        Ok(())
    }
}
