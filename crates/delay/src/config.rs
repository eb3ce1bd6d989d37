//! Scheduler configuration
//!
//! Loaded from TOML:
//! ```toml
//! [debounce]
//! delay_ms = 300
//! capacity = 1024
//!
//! [window]
//! buffer_capacity = 1024
//! min_delay_ms = 50
//! max_delay_ms = 250
//! ```
//!
//! Every field is optional. Values are validated when a scheduler is built
//! from them, not when the file is parsed.

use crate::error::{DelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Keyed debounce settings
    #[serde(default)]
    pub debounce: DebounceConfig,

    /// Batch window settings
    #[serde(default)]
    pub window: WindowConfig,
}

impl DelayConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| DelayError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Settings for [`crate::KeyedDebouncer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Delay after the last registration before the callback fires (default: 300ms)
    #[serde(default = "default_debounce_delay_ms")]
    pub delay_ms: u64,

    /// Maximum number of keys pending at once (default: 1024)
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl DebounceConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_debounce_delay_ms(),
            capacity: default_capacity(),
        }
    }
}

/// Settings for [`crate::BatchWindower`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Maximum number of items buffered between sweeps (default: 1024)
    #[serde(default = "default_capacity")]
    pub buffer_capacity: usize,

    /// Settle delay applied to each batch (default: 50ms)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound on an item's total delay (default: 250ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl WindowConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_capacity(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_debounce_delay_ms() -> u64 {
    300
}

fn default_capacity() -> usize {
    1024
}

fn default_min_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    250
}
