//! # vmdiff Pipeline
//!
//! Read-only access to the raw bytes of a disk image.
//!
//! - **MappedImage**: memory-mapped image file with clamped range slicing
//! - **ByteWindow**: bounded window over any `Read + Seek` stream, used when
//!   memory mapping is disabled or unavailable
//!
//! ## Example
//!
//! ```rust,no_run
//! use vmdiff_pipeline::{ByteWindow, MappedImage};
//! use std::fs::File;
//!
//! // Slice a block straight out of the mapping
//! let image = MappedImage::from_file(&File::open("disk.img").unwrap()).unwrap();
//! let block = image.slice_at(4096, 4096);
//!
//! // Or read the same range through a window over a plain file
//! let file = File::open("disk.img").unwrap();
//! let same = ByteWindow::clamped(file, 4096, 4096).unwrap().read_all().unwrap();
//! assert_eq!(block, &same[..]);
//! ```

pub mod mmap;
pub mod window;

pub use mmap::MappedImage;
pub use window::ByteWindow;
