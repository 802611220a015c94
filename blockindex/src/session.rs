//! The session: at most one open index at a time.
//!
//! A `Session` is the explicit owner of the open file. Data operations fail
//! with `NotOpen` while nothing is open, and `create`/`open` fail with
//! `AlreadyOpen` while something is. Every error leaves the session usable.

use std::path::{Path, PathBuf};

use crate::config::{IndexConfig, OverwritePolicy};
use crate::storage::{Index, IndexError, TreeStats};

/// Holds the currently open index, if any.
pub struct Session {
    current: Option<Index>,
    config: IndexConfig,
}

impl Session {
    /// Create a session with nothing open.
    #[must_use]
    pub const fn new(config: IndexConfig) -> Self {
        Self {
            current: None,
            config,
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Path of the open index.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.current.as_ref().map(Index::path)
    }

    /// Create a new index at `path` and make it the open one.
    ///
    /// If `path` exists, the overwrite policy decides; under
    /// `OverwritePolicy::Prompt` `confirm` is asked. Declining leaves the
    /// existing file untouched.
    pub fn create<F>(&mut self, path: &Path, confirm: F) -> Result<(), SessionError>
    where
        F: FnOnce(&Path) -> bool,
    {
        self.ensure_closed()?;

        let index = if path.exists() {
            self.check_overwrite(path, confirm)?;
            Index::create_truncate(path, self.config.durability)?
        } else {
            Index::create(path, self.config.durability)?
        };

        self.current = Some(index);
        Ok(())
    }

    /// Open an existing index at `path`.
    pub fn open(&mut self, path: &Path) -> Result<(), SessionError> {
        self.ensure_closed()?;
        self.current = Some(Index::open(path, self.config.durability)?);
        Ok(())
    }

    /// Close the open index. Closing with nothing open is a no-op.
    ///
    /// Returns the path that was closed.
    pub fn close(&mut self) -> Result<Option<PathBuf>, SessionError> {
        let Some(index) = self.current.take() else {
            return Ok(None);
        };
        let path = index.path().to_path_buf();
        index.close()?;
        Ok(Some(path))
    }

    /// Get the open index.
    pub fn index(&mut self) -> Result<&mut Index, SessionError> {
        self.current.as_mut().ok_or(SessionError::NotOpen)
    }

    pub fn insert(&mut self, key: i64, value: i64) -> Result<(), SessionError> {
        Ok(self.index()?.insert(key, value)?)
    }

    /// Look up a key, failing with `KeyNotFound` if absent.
    pub fn search(&mut self, key: i64) -> Result<i64, SessionError> {
        Ok(self.index()?.lookup(key)?)
    }

    pub fn verify(&mut self) -> Result<TreeStats, SessionError> {
        Ok(self.index()?.verify()?)
    }

    /// Write all entries as `key,value` lines to `path`.
    ///
    /// An existing `path` is handled like in `create`. The open index file
    /// itself is never a valid target.
    pub fn extract<F>(&mut self, path: &Path, confirm: F) -> Result<usize, SessionError>
    where
        F: FnOnce(&Path) -> bool,
    {
        let open_path = self.path().ok_or(SessionError::NotOpen)?;
        if path.exists() {
            if same_file(path, open_path) {
                return Err(SessionError::ExtractOverIndex(path.to_path_buf()));
            }
            self.check_overwrite(path, confirm)?;
        }
        Ok(self.index()?.extract(path)?)
    }

    const fn ensure_closed(&self) -> Result<(), SessionError> {
        if self.current.is_some() {
            return Err(SessionError::AlreadyOpen);
        }
        Ok(())
    }

    fn check_overwrite<F>(&self, path: &Path, confirm: F) -> Result<(), SessionError>
    where
        F: FnOnce(&Path) -> bool,
    {
        let accepted = match self.config.overwrite {
            OverwritePolicy::Always => true,
            OverwritePolicy::Never => false,
            OverwritePolicy::Prompt => confirm(path),
        };

        if accepted {
            return Ok(());
        }
        tracing::warn!(path = %path.display(), "overwrite declined");
        Err(SessionError::OverwriteDeclined(path.to_path_buf()))
    }
}

/// True if both paths resolve to the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to close index on shutdown: {e}");
        }
    }
}

/// Errors reported by session operations.
#[derive(Debug)]
pub enum SessionError {
    /// No index is open.
    NotOpen,
    /// An index is already open.
    AlreadyOpen,
    /// Replacing an existing file was declined.
    OverwriteDeclined(PathBuf),
    /// Extract was pointed at the open index file.
    ExtractOverIndex(PathBuf),
    /// The index operation failed.
    Index(IndexError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen => write!(f, "no index file is open"),
            Self::AlreadyOpen => write!(f, "an index file is already open"),
            Self::OverwriteDeclined(p) => write!(f, "not overwriting {}", p.display()),
            Self::ExtractOverIndex(p) => {
                write!(f, "cannot extract over the open index {}", p.display())
            }
            Self::Index(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Index(e) => Some(e),
            Self::NotOpen
            | Self::AlreadyOpen
            | Self::OverwriteDeclined(_)
            | Self::ExtractOverIndex(_) => None,
        }
    }
}

impl From<IndexError> for SessionError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}
