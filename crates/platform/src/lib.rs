//! # Sealink Platform
//!
//! The local filesystem shim for the Sealink SFTP stack.
//!
//! Everything here speaks [`std::io::Result`]: errors are surfaced exactly
//! as the OS reports them, and the protocol layer maps them to SFTP status
//! codes at the syscall boundary. Operations a platform cannot express
//! fail with [`std::io::ErrorKind::Unsupported`] so callers can degrade
//! per-operation. This crate is the only code in the workspace that
//! branches on the host platform.
//!
//! # Examples
//!
//! ```
//! use sealink_platform::fs::{FileStat, S_IFDIR};
//!
//! let st = FileStat {
//!     mode: S_IFDIR | 0o755,
//!     ..Default::default()
//! };
//! assert!(st.is_dir());
//! assert_eq!(st.permissions(), 0o755);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod fs;

pub use fs::{DirEntryInfo, FileStat, OpenMode, StatVfs};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
