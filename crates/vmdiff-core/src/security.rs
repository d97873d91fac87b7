//! Security validation constants and helpers
//!
//! Limits and checks applied to host image paths, guest paths, and block
//! arithmetic before they reach a provider.

use crate::Error;
use std::path::{Component, Path, PathBuf};

/// Default raw block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Largest block size accepted for raw block reads (64 MB)
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Maximum allocation size for a single raw read (256 MB)
pub const MAX_ALLOCATION_SIZE: usize = 256 * 1024 * 1024;

/// Maximum image size for memory mapping (16 GB)
pub const MAX_MMAP_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// Validate that a block size is usable
pub fn validate_block_size(block_size: usize) -> crate::Result<()> {
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(Error::invalid_block_range(format!(
            "Invalid block size: {} (must be 1-{})",
            block_size, MAX_BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Validate that a size is within allocation limits
pub fn validate_allocation_size(size: u64, limit: usize, context: &str) -> crate::Result<usize> {
    if size > limit as u64 {
        return Err(Error::invalid_operation(format!(
            "{} size {} exceeds limit {}",
            context, size, limit
        )));
    }

    size.try_into()
        .map_err(|_| Error::invalid_operation(format!("{} size exceeds platform limits", context)))
}

/// Safely multiply two u64 values with overflow checking
pub fn checked_multiply_u64(a: u64, b: u64, context: &str) -> crate::Result<u64> {
    a.checked_mul(b)
        .ok_or_else(|| Error::invalid_block_range(format!("{}: multiplication overflow", context)))
}

/// Safely convert u64 to usize with platform checking
pub fn u64_to_usize(value: u64, context: &str) -> crate::Result<usize> {
    value.try_into().map_err(|_| {
        Error::invalid_operation(format!(
            "{}: value {} exceeds platform usize limit",
            context, value
        ))
    })
}

/// Validate the host path of a disk image before handing it to a provider
///
/// # Returns
/// Canonical absolute path if it exists, [`Error::Access`] otherwise
pub fn validate_image_path(path: &Path) -> crate::Result<PathBuf> {
    let raw = path.to_string_lossy();
    if raw.is_empty() {
        return Err(Error::access("Empty image path"));
    }

    if raw.contains('\0') {
        return Err(Error::access("Image path contains null byte"));
    }

    path.canonicalize().map_err(|e| {
        Error::access(format!(
            "Image {} does not exist or is inaccessible: {}",
            path.display(),
            e
        ))
    })
}

/// Reject guest paths that could escape a host-backed guest root
///
/// # Security
/// Host-tree providers join guest paths onto a host directory, so `..`
/// components and NUL bytes are refused.
pub fn validate_guest_path(path: &str) -> crate::Result<()> {
    if path.contains('\0') {
        return Err(Error::invalid_path("Guest path contains null byte"));
    }

    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::invalid_path(format!(
            "Guest path traversal not allowed: {}",
            path
        )));
    }

    Ok(())
}

/// Make a guest path absolute by prefixing `/` when missing
pub fn absolute_guest_path(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

/// Absolute guest directory path without a trailing `/` (root stays `/`)
pub fn guest_directory_path(name: &str) -> String {
    let absolute = absolute_guest_path(name);
    let trimmed = absolute.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join a child name onto a guest directory path
pub fn join_guest_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
