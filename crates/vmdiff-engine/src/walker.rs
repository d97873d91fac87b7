//! Filesystem walker
//!
//! Lists every path below a directory once, then stats paths lazily as the
//! [`Walk`] is iterated. A failed stat yields an entry with sentinel fields
//! instead of stopping the walk.

use tracing::debug;
use vmdiff_core::{guest_directory_path, join_guest_path, FileEntry, GuestSession, Result};

/// Turn a path reported by `find_all(dir)` into an absolute guest path
pub fn normalize_walk_path(dir: &str, relative: &str) -> String {
    match relative {
        "." | "" => dir.to_string(),
        rel => join_guest_path(dir, rel.trim_start_matches('/')),
    }
}

/// A restartable walk over one directory tree of a session
pub struct Walk<'s> {
    guest: &'s mut dyn GuestSession,
    paths: Vec<String>,
    position: usize,
    progress_interval: usize,
    stat_failures: usize,
}

impl<'s> Walk<'s> {
    /// List every path below `dir`
    ///
    /// # Errors
    ///
    /// Fails if the provider cannot list the directory; stat failures are
    /// deferred to iteration and never fail the walk.
    pub fn new(guest: &'s mut dyn GuestSession, dir: &str) -> Result<Self> {
        let dir = guest_directory_path(dir);
        let paths = guest
            .find_all(&dir)?
            .iter()
            .map(|relative| normalize_walk_path(&dir, relative))
            .collect::<Vec<_>>();

        debug!("walk of {} found {} paths", dir, paths.len());
        Ok(Self {
            guest,
            paths,
            position: 0,
            progress_interval: 0,
            stat_failures: 0,
        })
    }

    /// Log progress every `interval` entries (0 disables)
    pub fn with_progress(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Every path this walk will visit, in order
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Stat failures seen so far
    pub fn stat_failures(&self) -> usize {
        self.stat_failures
    }

    /// Start again from the first path without re-listing
    pub fn rewind(&mut self) {
        self.position = 0;
        self.stat_failures = 0;
    }
}

impl Iterator for Walk<'_> {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        let path = self.paths.get(self.position)?.clone();
        self.position += 1;

        let stat = match self.guest.stat(&path) {
            Ok(stat) => Some(stat),
            Err(e) => {
                debug!("stat {} failed: {}", path, e);
                self.stat_failures += 1;
                None
            }
        };

        if self.progress_interval > 0 && self.position % self.progress_interval == 0 {
            debug!("processed {} of {} entries", self.position, self.paths.len());
        }

        Some(FileEntry::new(path, stat))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.paths.len() - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Walk<'_> {}
