//! Engine configuration

use std::path::PathBuf;
use vmdiff_core::{validate_block_size, DEFAULT_BLOCK_SIZE};

/// Configuration shared by every engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Default block size for block diffs and block reads
    pub block_size: usize,

    /// Blocks fetched from each image per read during a diff
    pub batch_blocks: usize,

    /// Emit a progress line every this many walked entries (0 disables)
    pub progress_interval: usize,

    /// Directory for scratch downloads (system temp dir when `None`)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            batch_blocks: 256,
            progress_interval: 5000,
            scratch_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `VMDIFF_BLOCK_SIZE`, `VMDIFF_BATCH_BLOCKS`,
    /// `VMDIFF_PROGRESS_INTERVAL` and `VMDIFF_SCRATCH_DIR`. Missing or invalid
    /// values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let block_size = std::env::var("VMDIFF_BLOCK_SIZE")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&size| validate_block_size(size).is_ok())
            .unwrap_or(defaults.block_size);

        let batch_blocks = std::env::var("VMDIFF_BATCH_BLOCKS")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.batch_blocks);

        let progress_interval = std::env::var("VMDIFF_PROGRESS_INTERVAL")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.progress_interval);

        let scratch_dir = std::env::var("VMDIFF_SCRATCH_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            block_size,
            batch_blocks,
            progress_interval,
            scratch_dir,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.batch_blocks, 256);
        assert_eq!(config.progress_interval, 5000);
        assert!(config.scratch_dir.is_none());
    }

    #[test]
    fn test_engine_config_builders() {
        let config = EngineConfig::default()
            .with_block_size(512)
            .with_scratch_dir("/var/tmp");
        assert_eq!(config.block_size, 512);
        assert_eq!(config.scratch_dir, Some(PathBuf::from("/var/tmp")));
    }
}
