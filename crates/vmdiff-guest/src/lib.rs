//! # vmdiff Guest
//!
//! Guest Access Provider implementations.
//!
//! - **MemoryProvider**: in-memory guest images with devices, OS roots,
//!   mount tables, ownership, and raw bytes; used for fixtures and tests
//! - **RawImageProvider**: raw disk image files; serves raw block reads only
//! - **TreeProvider**: a host directory holding an extracted or mounted guest
//!   filesystem; serves filesystem operations only
//! - **HostProvider**: picks between the two host-backed providers by
//!   looking at the image path
//!
//! ## Example
//!
//! ```rust,no_run
//! use vmdiff_core::GuestProvider;
//! use vmdiff_guest::HostProvider;
//! use std::path::Path;
//!
//! let provider = HostProvider::default();
//! let mut session = provider.open(Path::new("disk.img"), true).unwrap();
//! session.launch().unwrap();
//! println!("{} bytes", session.disk_size().unwrap());
//! session.close().unwrap();
//! ```

pub mod factory;
pub mod memory;
pub mod raw;
pub mod tree;

pub use factory::{detect_guest_kind, GuestKind, HostProvider};
pub use memory::{MemoryImage, MemoryNode, MemoryProvider, MemorySession, SessionLog};
pub use raw::{RawImageConfig, RawImageProvider, RawImageSession};
pub use tree::{TreeProvider, TreeSession};
