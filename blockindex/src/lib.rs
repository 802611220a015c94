#![cfg_attr(test, allow(clippy::expect_used))]

//! A single-file, disk-resident B-tree index mapping `i64` keys to `i64` values.
//!
//! Layers, bottom up:
//!  - `storage`: block I/O, the file header, the node codec and the B-tree
//!    engine, wrapped in `storage::Index`
//!  - `session`: the open/closed state machine around one `Index`
//!  - `shell`: the line-oriented command loop driving a `Session`
//!  - `config`: environment configuration for the binary

pub mod config;
pub mod session;
pub mod shell;
pub mod storage;

pub use config::{ConfigError, IndexConfig, OverwritePolicy};
pub use session::{Session, SessionError};
pub use shell::{Command, Shell, ShellError};
