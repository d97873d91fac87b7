//! # vmdiff Engine
//!
//! Guest disk inspection and comparison on top of a Guest Access Provider.
//!
//! Components, leaves first:
//! - **mount**: Mount Planner; mounts every OS root parents-first and keeps
//!   going past individual mount failures
//! - **walker**: Filesystem Walker; lazy, restartable walk producing
//!   [`FileEntry`](vmdiff_core::FileEntry) values
//! - **identity**: Identity Resolver; uid/gid names from passwd/group
//! - **aggregate**: Stat Aggregator; totals and per-owner breakdowns
//! - **content**: Content Extractor; byte-exact reads, stop/limit trimming,
//!   hex and bit renderings
//! - **blocks**: Block Differ; raw block comparison of two images
//!
//! [`Engine`] ties them together. Each call opens its own
//! [`DiskSession`] and tears it down before returning.

pub mod aggregate;
pub mod blocks;
pub mod config;
pub mod content;
pub mod engine;
pub mod identity;
pub mod inspect;
pub mod listing;
pub mod mount;
pub mod session;
pub mod walker;

pub use aggregate::{AggregateReport, GroupUsage, StatAggregator, UserUsage};
pub use blocks::{BlockDiffReport, BlockRange};
pub use config::EngineConfig;
pub use content::{decode_hex, format_bits, format_hex, Content, ContentFormat, ContentLimits};
pub use engine::Engine;
pub use identity::IdentityMap;
pub use inspect::{DirectoryEntry, DirectoryListing, FileStatus};
pub use listing::{write_listing, NumberedRows};
pub use mount::{MountReport, MountWarning};
pub use session::DiskSession;
pub use walker::Walk;
