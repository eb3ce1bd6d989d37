//! Error type for scheduler construction and configuration loading
//!
//! Runtime rejections (capacity reached, scheduler stopped) are not errors:
//! they surface as `false` from `register`/`exec`/`cancel`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building a scheduler or loading its configuration
#[derive(Debug, Error)]
pub enum DelayError {
    /// No tokio runtime was current at construction time
    #[error("no tokio runtime available to spawn scheduler tasks")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Window bounds leave no room for a sweep interval
    #[error("max delay ({max:?}) must be greater than min delay ({min:?})")]
    InvalidWindow { min: Duration, max: Duration },

    /// A capacity of zero would reject every submission
    #[error("capacity must be at least 1")]
    ZeroCapacity,

    /// Config file could not be read
    #[error("failed to read config file {path}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::DelayConfig`]
    #[error("failed to parse config")]
    ParseConfig(#[from] toml::de::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DelayError>;
