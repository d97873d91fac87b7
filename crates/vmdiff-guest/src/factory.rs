//! Guest provider selection for host paths
//!
//! Picks the provider that can serve a given image path: directories are
//! guest filesystem trees, regular files are raw disk images.

use crate::{RawImageConfig, RawImageProvider, TreeProvider};
use std::path::Path;
use vmdiff_core::{Error, GuestProvider, GuestSession, Result};

/// Detected guest kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    /// Host directory holding an extracted guest filesystem
    Tree,
    /// Raw sector image (.img, .raw, .dd, etc.)
    Raw,
}

impl GuestKind {
    /// Get a human-readable name for this guest kind
    pub fn name(&self) -> &'static str {
        match self {
            GuestKind::Tree => "Host directory tree",
            GuestKind::Raw => "Raw disk image",
        }
    }
}

/// Detect the guest kind from a host path
///
/// # Errors
///
/// Returns [`Error::Access`] if the path cannot be read or is neither a
/// directory nor a regular file
pub fn detect_guest_kind(path: &Path) -> Result<GuestKind> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| Error::access(format!("Cannot open {}: {}", path.display(), e)))?;

    if metadata.is_dir() {
        Ok(GuestKind::Tree)
    } else if metadata.is_file() {
        Ok(GuestKind::Raw)
    } else {
        Err(Error::access(format!(
            "{} is neither a directory nor a disk image file",
            path.display()
        )))
    }
}

/// Provider that dispatches on the kind of host path it is given
///
/// # Example
///
/// ```rust,no_run
/// use vmdiff_core::GuestProvider;
/// use vmdiff_guest::HostProvider;
/// use std::path::Path;
///
/// let provider = HostProvider::default();
/// let session = provider.open(Path::new("/srv/guests/web01"), true).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct HostProvider {
    raw: RawImageProvider,
}

impl HostProvider {
    pub fn new(raw_config: RawImageConfig) -> Self {
        Self {
            raw: RawImageProvider::new(raw_config),
        }
    }
}

impl GuestProvider for HostProvider {
    fn identify(&self) -> &str {
        "Host image provider"
    }

    fn open(&self, image: &Path, read_only: bool) -> Result<Box<dyn GuestSession>> {
        let kind = detect_guest_kind(image)?;
        tracing::debug!("opening {} as {}", image.display(), kind.name());

        match kind {
            GuestKind::Tree => TreeProvider.open(image, read_only),
            GuestKind::Raw => self.raw.open(image, read_only),
        }
    }
}
