//! # fstree Core Library
//!
//! Captures a directory tree into a compact JSON snapshot and rebuilds it
//! elsewhere by fetching each file from an origin URL.
//!
//! ## Key Modules
//!
//! - [`capture`]: walks a tree and folds it into a [`common::Snapshot`].
//! - [`codec`]: the positional JSON record format and the snapshot document.
//! - [`restore`]: flattens a snapshot into work items and runs the fetch pool.
//! - [`config`]: validated run settings from arguments and environment.
//!
//! ## Examples
//!
//! ```no_run
//! use fstree::capture::{capture, CaptureOptions};
//! use fstree::codec;
//!
//! let snapshot = capture(std::path::Path::new("/mnt/image"), &CaptureOptions::default())?;
//! codec::write_snapshot(std::io::stdout(), &snapshot)?;
//! # Ok::<(), fstree::SnapshotError>(())
//! ```

pub mod capture;
pub mod cli;
pub mod cli_runner;
pub mod codec;
pub mod common;
pub mod config;
pub mod error;
pub use error::SnapshotError;

// Unix filesystem primitives with portable fallbacks
pub mod fsx;

pub mod restore;
