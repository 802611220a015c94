//! Index configuration module.
//!
//! This module provides configuration loading for the blockindex shell from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `BLOCKINDEX_SYNC_WRITES`: `true` to wait for every write to reach the
//!   device, `false` to hand writes to the OS only (default: `true`)
//! - `BLOCKINDEX_OVERWRITE`: what `create` and `extract` do when the target
//!   already exists: `prompt`, `always` or `never` (default: `prompt`)
//!
//! The log filter is read separately from `RUST_LOG`.

use crate::storage::Durability;

/// What to do when a command would replace an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Ask on the shell.
    #[default]
    Prompt,
    /// Replace without asking.
    Always,
    /// Refuse without asking.
    Never,
}

impl std::str::FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(Self::Prompt),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            _ => Err(format!("'{s}' is not one of prompt, always, never")),
        }
    }
}

/// Index configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexConfig {
    /// How far each block write is pushed before returning.
    pub durability: Durability,
    /// How existing files are treated by `create` and `extract`.
    pub overwrite: OverwritePolicy,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl IndexConfig {
    pub const SYNC_WRITES_VAR: &'static str = "BLOCKINDEX_SYNC_WRITES";
    pub const OVERWRITE_VAR: &'static str = "BLOCKINDEX_OVERWRITE";

    /// Load configuration from environment variables.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            durability: Self::load_durability(&lookup)?,
            overwrite: Self::load_overwrite(&lookup)?,
        })
    }

    fn load_durability<F>(lookup: &F) -> Result<Durability, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(value) = lookup(Self::SYNC_WRITES_VAR) else {
            return Ok(Durability::default());
        };

        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Durability::Sync),
            "false" | "0" | "no" => Ok(Durability::Flush),
            _ => Err(ConfigError::InvalidValue {
                name: Self::SYNC_WRITES_VAR.to_string(),
                message: format!("'{value}' is not a boolean"),
            }),
        }
    }

    fn load_overwrite<F>(lookup: &F) -> Result<OverwritePolicy, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(Self::OVERWRITE_VAR).map_or(Ok(OverwritePolicy::default()), |value| {
            value.parse().map_err(|message| ConfigError::InvalidValue {
                name: Self::OVERWRITE_VAR.to_string(),
                message,
            })
        })
    }
}
