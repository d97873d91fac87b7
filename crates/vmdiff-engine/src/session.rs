//! Scoped guest sessions
//!
//! [`DiskSession`] owns one provider session for the duration of a single
//! engine call. Teardown (unmount all, shut down, close) happens exactly once:
//! either through [`DiskSession::finish`], which reports the first failure, or
//! on drop, which only logs.

use crate::mount::{mount_all, MountReport};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vmdiff_core::{GuestProvider, GuestSession, Result};

pub struct DiskSession {
    image: PathBuf,
    guest: Box<dyn GuestSession>,
    torn_down: bool,
}

impl DiskSession {
    /// Open `image` read-only through `provider` and launch the back end
    ///
    /// A launch failure still tears the opened handle down before the error
    /// is returned.
    pub fn open(provider: &dyn GuestProvider, image: &Path) -> Result<Self> {
        debug!("opening {} with {}", image.display(), provider.identify());
        let guest = provider.open(image, true)?;

        let mut session = Self {
            image: image.to_path_buf(),
            guest,
            torn_down: false,
        };
        session.guest.launch()?;
        Ok(session)
    }

    /// Open, launch, and mount every detected OS root
    pub fn open_mounted(provider: &dyn GuestProvider, image: &Path) -> Result<(Self, MountReport)> {
        let mut session = Self::open(provider, image)?;
        let report = mount_all(session.guest())?;
        Ok((session, report))
    }

    /// The underlying provider session
    pub fn guest(&mut self) -> &mut dyn GuestSession {
        &mut *self.guest
    }

    /// Tear the session down, returning the first teardown error
    pub fn finish(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let mut first_error = None;
        let steps: [(&str, fn(&mut dyn GuestSession) -> Result<()>); 3] = [
            ("unmount", |g| g.unmount_all()),
            ("shutdown", |g| g.shutdown()),
            ("close", |g| g.close()),
        ];

        for (step, run) in steps {
            if let Err(e) = run(&mut *self.guest) {
                warn!("{} of {} failed: {}", step, self.image.display(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for DiskSession {
    fn drop(&mut self) {
        // failures were already logged per step
        let _ = self.teardown();
    }
}
