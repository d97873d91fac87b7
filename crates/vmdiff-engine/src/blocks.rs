//! Raw block comparison between two images
//!
//! Blocks are addressed by index at a fixed block size. The block count of a
//! pair of images is that of the longer one; a block is compared as the exact
//! bytes each image holds at that index, so a block that runs past the end of
//! only one image always differs and identical short trailing blocks are
//! equal.

use serde::{Serialize, Serializer};
use tracing::{debug, info};
use vmdiff_core::{
    checked_multiply_u64, u64_to_usize, validate_block_size, Error, GuestSession, Result,
    MAX_ALLOCATION_SIZE,
};

/// Inclusive block range; `end = -1` means the last block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: i64,
}

impl Default for BlockRange {
    fn default() -> Self {
        Self::full()
    }
}

impl BlockRange {
    pub fn new(start: u64, end: i64) -> Self {
        Self { start, end }
    }

    /// Every block of the image
    pub fn full() -> Self {
        Self { start: 0, end: -1 }
    }

    /// Concrete `[start, end]` for an image pair with `block_count` blocks
    ///
    /// An explicit end past the last block is clamped. Returns `None` when
    /// the range selects no blocks.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlockRange`] for `end < -1` or an explicit
    /// `end < start`
    pub fn resolve(&self, block_count: u64) -> Result<Option<(u64, u64)>> {
        let explicit_end = match self.end {
            -1 => None,
            end if end < -1 => {
                return Err(Error::invalid_block_range(format!(
                    "End block {} is invalid (use -1 for the last block)",
                    end
                )))
            }
            end => Some(end as u64),
        };

        if let Some(end) = explicit_end {
            if end < self.start {
                return Err(Error::invalid_block_range(format!(
                    "End block {} is before start block {}",
                    end, self.start
                )));
            }
        }

        let Some(last) = block_count.checked_sub(1) else {
            return Ok(None);
        };
        let end = explicit_end.map_or(last, |end| end.min(last));

        if self.start > end {
            Ok(None)
        } else {
            Ok(Some((self.start, end)))
        }
    }
}

/// Number of blocks needed to cover `len` bytes
pub fn block_count(len: u64, block_size: usize) -> u64 {
    len.div_ceil(block_size as u64)
}

/// Differing blocks between two images over a range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDiffReport {
    pub block_size: usize,

    /// First block compared
    pub start_block: u64,

    /// Last block compared, `None` when the range selected nothing
    pub end_block: Option<u64>,

    pub total_differing_blocks: usize,

    /// Differing block indices in ascending order, serialized as `Block-<N>`
    #[serde(serialize_with = "serialize_block_labels")]
    pub differing_blocks: Vec<u64>,
}

impl BlockDiffReport {
    fn empty(block_size: usize, start_block: u64) -> Self {
        Self {
            block_size,
            start_block,
            end_block: None,
            total_differing_blocks: 0,
            differing_blocks: Vec::new(),
        }
    }

    pub fn is_identical(&self) -> bool {
        self.differing_blocks.is_empty()
    }

    /// `Block-<N>` labels in order
    pub fn labels(&self) -> Vec<String> {
        self.differing_blocks.iter().map(|n| block_label(*n)).collect()
    }
}

pub fn block_label(index: u64) -> String {
    format!("Block-{}", index)
}

fn serialize_block_labels<S: Serializer>(
    blocks: &[u64],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(blocks.iter().map(|n| block_label(*n)))
}

fn block_slice(chunk: &[u8], offset: usize, block_size: usize) -> &[u8] {
    if offset >= chunk.len() {
        return &[];
    }
    let end = offset.saturating_add(block_size).min(chunk.len());
    &chunk[offset..end]
}

/// Compare two images block by block
///
/// Reads `batch_blocks` blocks from each image per call into the provider.
pub fn diff_blocks(
    left: &mut dyn GuestSession,
    right: &mut dyn GuestSession,
    block_size: usize,
    range: BlockRange,
    batch_blocks: usize,
) -> Result<BlockDiffReport> {
    validate_block_size(block_size)?;

    let left_len = left.disk_size()?;
    let right_len = right.disk_size()?;
    let count = block_count(left_len.max(right_len), block_size);

    let Some((start, end)) = range.resolve(count)? else {
        debug!("block range {:?} selects nothing of {} blocks", range, count);
        return Ok(BlockDiffReport::empty(block_size, range.start));
    };

    let batch = batch_blocks.clamp(1, (MAX_ALLOCATION_SIZE / block_size).max(1)) as u64;
    let mut differing = Vec::new();
    let mut index = start;

    while index <= end {
        let blocks = batch.min(end - index + 1);
        let offset = checked_multiply_u64(index, block_size as u64, "block offset")?;
        let len = u64_to_usize(
            checked_multiply_u64(blocks, block_size as u64, "batch length")?,
            "batch length",
        )?;

        let left_chunk = left.read_raw(offset, len)?;
        let right_chunk = right.read_raw(offset, len)?;

        for i in 0..blocks {
            let within = (i as usize) * block_size;
            if block_slice(&left_chunk, within, block_size)
                != block_slice(&right_chunk, within, block_size)
            {
                differing.push(index + i);
            }
        }

        index += blocks;
    }

    info!(
        "compared blocks {}..={} at {} bytes: {} differ",
        start,
        end,
        block_size,
        differing.len()
    );

    Ok(BlockDiffReport {
        block_size,
        start_block: start,
        end_block: Some(end),
        total_differing_blocks: differing.len(),
        differing_blocks: differing,
    })
}

/// Raw bytes of one block; the trailing block may be short
///
/// # Errors
///
/// [`Error::NotFound`] when the block starts at or past the end of the image
pub fn block_data(guest: &mut dyn GuestSession, index: u64, block_size: usize) -> Result<Vec<u8>> {
    validate_block_size(block_size)?;
    let data = guest.read_raw_block(index, block_size)?;
    if data.is_empty() {
        return Err(Error::not_found(format!(
            "Block {} is past the end of the image",
            index
        )));
    }
    Ok(data)
}
