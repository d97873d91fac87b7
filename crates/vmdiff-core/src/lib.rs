//! # vmdiff Core
//!
//! Core traits, types, and error handling for guest disk inspection.
//!
//! This crate provides the foundational abstractions shared by every other
//! crate in the workspace:
//! - **GuestProvider / GuestSession**: the Guest Access Provider interface that
//!   opens a disk image read-only, mounts its filesystems, and exposes stat,
//!   read, and raw block primitives
//! - **FileEntry / StatInfo / FileKind**: per-path metadata as produced by a walk
//! - **MountPoint**: a `(mount_path, device)` pair reported by OS inspection
//!
//! ## Example
//!
//! ```rust,no_run
//! use vmdiff_core::{GuestProvider, Result};
//! use std::path::Path;
//!
//! fn disk_size(provider: &dyn GuestProvider, image: &Path) -> Result<u64> {
//!     let mut session = provider.open(image, true)?;
//!     session.launch()?;
//!     let size = session.disk_size()?;
//!     session.close()?;
//!     Ok(size)
//! }
//! ```

pub mod error;
pub mod security;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{Error, Result};
pub use security::*;
pub use traits::{GuestProvider, GuestSession};
pub use types::{
    format_permissions, format_timestamp, FileEntry, FileKind, FileRow, MountPoint, RowSize,
    StatInfo,
};
