//! Call-scoped engine operations
//!
//! Every operation opens its own [`DiskSession`], does its work, and tears the
//! session down before returning, so one [`Engine`] can serve concurrent calls
//! from several threads.

use crate::aggregate::{AggregateReport, StatAggregator};
use crate::blocks::{self, BlockDiffReport, BlockRange};
use crate::config::EngineConfig;
use crate::content::{self, Content, ContentFormat, ContentLimits};
use crate::identity::IdentityMap;
use crate::inspect::{self, DirectoryListing, FileStatus};
use crate::listing::{write_listing, NumberedRows};
use crate::session::DiskSession;
use crate::walker::Walk;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;
use vmdiff_core::{Error, FileEntry, FileRow, GuestProvider, GuestSession, Result};

/// Guest Disk Inspection & Comparison Engine
///
/// # Example
///
/// ```rust
/// use vmdiff_engine::Engine;
/// use vmdiff_guest::{MemoryImage, MemoryProvider};
/// use std::path::Path;
///
/// let provider = MemoryProvider::new().with_image(
///     "vm.img",
///     MemoryImage::single_root("/dev/sda1").file("/dev/sda1", "/hello.txt", "hi"),
/// );
/// let engine = Engine::new(provider);
///
/// let hex = engine
///     .file_contents_in_format(Path::new("vm.img"), "/hello.txt", "hex", &Default::default())
///     .unwrap();
/// assert_eq!(hex, "68 69");
/// ```
pub struct Engine {
    provider: Box<dyn GuestProvider>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(provider: impl GuestProvider + 'static) -> Self {
        Self::with_config(provider, EngineConfig::default())
    }

    pub fn with_config(provider: impl GuestProvider + 'static, config: EngineConfig) -> Self {
        Self {
            provider: Box::new(provider),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Identifier of the Guest Access Provider behind this engine
    pub fn provider_identity(&self) -> &str {
        self.provider.identify()
    }

    /// Run `op` against a freshly mounted session, then tear it down
    fn with_mounted<T>(
        &self,
        image: &Path,
        op: impl FnOnce(&mut dyn GuestSession) -> Result<T>,
    ) -> Result<T> {
        let (mut session, _mounts) = DiskSession::open_mounted(self.provider.as_ref(), image)?;
        let result = op(session.guest());

        match (result, session.finish()) {
            (Err(e), _) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Every entry below `/`, in walk order
    pub fn walk_entries(&self, image: &Path) -> Result<Vec<FileEntry>> {
        let interval = self.config.progress_interval;
        self.with_mounted(image, |guest| {
            let walk = Walk::new(guest, "/")?.with_progress(interval);
            Ok(walk.collect())
        })
    }

    /// One listing row per path
    pub fn list_files(&self, image: &Path) -> Result<Vec<FileRow>> {
        let rows: Vec<FileRow> = self
            .walk_entries(image)?
            .iter()
            .map(FileEntry::row)
            .collect();
        info!("listed {} paths in {}", rows.len(), image.display());
        Ok(rows)
    }

    /// Write the listing of `image` as a text table to `out`
    ///
    /// Returns the number of rows written.
    pub fn write_files_with_metadata(&self, image: &Path, out: &Path) -> Result<usize> {
        let rows = self.list_files(image)?;
        let mut writer = BufWriter::new(File::create(out)?);
        write_listing(&rows, &mut writer)?;
        writer.flush()?;
        Ok(rows.len())
    }

    /// The listing of `image` as a JSON object keyed `"1".."n"`
    pub fn files_with_metadata_json(&self, image: &Path) -> Result<serde_json::Value> {
        let rows = self.list_files(image)?;
        serde_json::to_value(NumberedRows(&rows)).map_err(|e| Error::Io(e.into()))
    }

    /// Ownership and size statistics for the whole image
    pub fn disk_metadata(&self, image: &Path) -> Result<AggregateReport> {
        let interval = self.config.progress_interval;
        let report = self.with_mounted(image, |guest| {
            let identities = IdentityMap::load(guest);
            let mut aggregator = StatAggregator::new();
            let mut walk = Walk::new(guest, "/")?.with_progress(interval);
            for entry in walk.by_ref() {
                aggregator.add(&entry);
            }
            if walk.stat_failures() > 0 {
                info!("{} paths could not be stat'ed", walk.stat_failures());
            }
            Ok(aggregator.finish(&identities))
        })?;

        info!(
            "{}: {} files, {} dirs, {} bytes",
            image.display(),
            report.files_count,
            report.dirs_count,
            report.total_bytes
        );
        Ok(report)
    }

    /// Byte-exact contents of `name`, raw or decoded as UTF-8
    pub fn file_contents(
        &self,
        image: &Path,
        name: &str,
        binary: bool,
        limits: &ContentLimits,
    ) -> Result<Content> {
        let data = self.extract(image, name, limits)?;
        Ok(if binary {
            Content::Binary(data)
        } else {
            Content::text(&data)
        })
    }

    /// Contents of `name` rendered as `"hex"` or `"bits"`
    pub fn file_contents_in_format(
        &self,
        image: &Path,
        name: &str,
        format: &str,
        limits: &ContentLimits,
    ) -> Result<String> {
        let format: ContentFormat = format.parse()?;
        let data = self.extract(image, name, limits)?;
        Ok(format.render(&data))
    }

    fn extract(&self, image: &Path, name: &str, limits: &ContentLimits) -> Result<Vec<u8>> {
        let scratch_dir = self.config.scratch_dir.as_deref();
        self.with_mounted(image, |guest| {
            content::extract(guest, name, limits, scratch_dir)
        })
    }

    /// Existence and metadata of one path
    pub fn check_file_exists(&self, image: &Path, name: &str) -> Result<FileStatus> {
        self.with_mounted(image, |guest| inspect::file_status(guest, name))
    }

    /// Names in `dir`, optionally with per-name metadata
    pub fn list_directory(&self, image: &Path, dir: &str, detailed: bool) -> Result<DirectoryListing> {
        self.with_mounted(image, |guest| inspect::list_directory(guest, dir, detailed))
    }

    /// Every absolute path in the image, sorted
    pub fn list_all_filenames(&self, image: &Path) -> Result<Vec<String>> {
        self.list_filenames_in_directory(image, "/")
    }

    /// Every absolute path below `dir`, sorted
    pub fn list_filenames_in_directory(&self, image: &Path, dir: &str) -> Result<Vec<String>> {
        self.with_mounted(image, |guest| inspect::all_filenames(guest, dir))
    }

    /// Blocks that differ between two images
    ///
    /// `block_size` defaults to the configured block size.
    pub fn diff_blocks(
        &self,
        left: &Path,
        right: &Path,
        block_size: Option<usize>,
        range: BlockRange,
    ) -> Result<BlockDiffReport> {
        let block_size = block_size.unwrap_or(self.config.block_size);
        vmdiff_core::validate_block_size(block_size)?;

        let mut left_session = DiskSession::open(self.provider.as_ref(), left)?;
        let mut right_session = DiskSession::open(self.provider.as_ref(), right)?;

        let result = blocks::diff_blocks(
            left_session.guest(),
            right_session.guest(),
            block_size,
            range,
            self.config.batch_blocks,
        );

        let left_done = left_session.finish();
        let right_done = right_session.finish();
        let report = result?;
        left_done?;
        right_done?;
        Ok(report)
    }

    /// Raw bytes of one block
    pub fn read_block(&self, image: &Path, index: u64, block_size: Option<usize>) -> Result<Vec<u8>> {
        let block_size = block_size.unwrap_or(self.config.block_size);
        let mut session = DiskSession::open(self.provider.as_ref(), image)?;
        let result = blocks::block_data(session.guest(), index, block_size);
        let done = session.finish();
        let data = result?;
        done?;
        Ok(data)
    }

    /// One block rendered as `"hex"` or `"bits"`
    pub fn get_block_data(
        &self,
        image: &Path,
        index: u64,
        block_size: Option<usize>,
        format: &str,
    ) -> Result<String> {
        let format: ContentFormat = format.parse()?;
        Ok(format.render(&self.read_block(image, index, block_size)?))
    }
}
