//! Memory-mapped disk image for raw block access

use memmap2::Mmap;
use std::fs::File;
use std::io;
use vmdiff_core::MAX_MMAP_SIZE;

/// A read-only memory mapping of a whole disk image.
///
/// Block reads become slice copies with no system call per block, which
/// matters when a diff walks every block of two large images.
///
/// # Example
///
/// ```rust,no_run
/// use vmdiff_pipeline::MappedImage;
/// use std::fs::File;
///
/// let file = File::open("disk.img").unwrap();
/// let image = MappedImage::from_file(&file).unwrap();
/// println!("{} bytes", image.len());
/// ```
pub struct MappedImage {
    mmap: Mmap,
}

impl MappedImage {
    /// Map an opened image file read-only
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not a regular file, is empty, or
    /// exceeds [`MAX_MMAP_SIZE`]
    ///
    /// # Safety
    ///
    /// Uses `unsafe` for memory mapping because:
    /// - The file is validated to be a regular, non-empty file within limits
    /// - The mapping is read-only
    /// - The image must not be truncated while mapped (caller responsibility;
    ///   images are opened read-only for inspection)
    pub fn from_file(file: &File) -> io::Result<Self> {
        let metadata = file.metadata()?;

        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Only regular files can be memory-mapped",
            ));
        }

        if metadata.len() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Empty images cannot be memory-mapped",
            ));
        }

        if metadata.len() > MAX_MMAP_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Image size {} exceeds memory mapping limit {}",
                    metadata.len(),
                    MAX_MMAP_SIZE
                ),
            ));
        }

        // SAFETY: see the doc comment above
        let mmap = unsafe { Mmap::map(file)? };
        Ok(Self { mmap })
    }

    /// Length of the mapped image in bytes
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Bytes in `[offset, offset + len)`, clamped to the end of the image
    ///
    /// An offset at or past the end yields an empty slice.
    pub fn slice_at(&self, offset: u64, len: usize) -> &[u8] {
        let total = self.mmap.len();
        let start = match usize::try_from(offset) {
            Ok(start) if start < total => start,
            _ => return &[],
        };
        let end = start.saturating_add(len).min(total);
        &self.mmap[start..end]
    }

    /// The entire mapped image
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}
