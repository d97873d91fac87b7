//! Mount planning
//!
//! Every detected OS root is mounted read-only with its mountpoints ordered by
//! ascending path length, so `/` goes in before `/boot` and `/boot` before
//! `/boot/efi`. A failed mount is recorded as a [`MountWarning`] and the next
//! mountpoint is tried.

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};
use vmdiff_core::{Error, GuestSession, MountPoint, Result};

/// A mount attempt that failed without failing the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountWarning {
    pub device: String,
    pub mount_path: String,
    pub reason: String,
}

impl fmt::Display for MountWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not mount {} on {}: {}",
            self.device, self.mount_path, self.reason
        )
    }
}

/// Outcome of mounting every OS root of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountReport {
    /// Detected OS roots, in provider order
    pub roots: Vec<String>,

    /// Mountpoints that mounted, in mount order
    pub mounted: Vec<MountPoint>,

    pub warnings: Vec<MountWarning>,
}

impl MountReport {
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Order mountpoints parents-first (stable ascending mount path length)
pub fn plan_mounts(mut points: Vec<MountPoint>) -> Vec<MountPoint> {
    points.sort_by_key(|mp| mp.mount_path.len());
    points
}

/// Detect OS roots and mount each one's filesystems read-only
///
/// # Errors
///
/// Returns [`Error::NotFound`] when no OS root is detected; any inspection
/// failure is returned unchanged. Individual mount failures are not errors.
pub fn mount_all(guest: &mut dyn GuestSession) -> Result<MountReport> {
    let roots = guest.inspect_operating_systems()?;
    if roots.is_empty() {
        return Err(Error::not_found("No operating system found in image"));
    }

    let mut report = MountReport {
        roots: roots.clone(),
        ..Default::default()
    };

    for root in &roots {
        let points = match guest.mountpoints_for(root) {
            Ok(points) => points,
            Err(e) => {
                warn!("no mountpoints for root {}: {}", root, e);
                report.warnings.push(MountWarning {
                    device: root.clone(),
                    mount_path: String::new(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        for mp in plan_mounts(points) {
            match guest.mount(&mp.device, &mp.mount_path, true) {
                Ok(()) => {
                    debug!("mounted {}", mp);
                    report.mounted.push(mp);
                }
                Err(e) => {
                    let warning = MountWarning {
                        device: mp.device,
                        mount_path: mp.mount_path,
                        reason: e.to_string(),
                    };
                    warn!("{}", warning);
                    report.warnings.push(warning);
                }
            }
        }
    }

    Ok(report)
}
