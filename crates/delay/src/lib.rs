//! Deferred execution for bursty event streams
//!
//! This crate provides two independent schedulers that invoke a single
//! callback after a controlled delay:
//! - [`KeyedDebouncer`]: one resettable timer per key, latest payload wins
//! - [`BatchWindower`]: unkeyed items collected into periodic batches,
//!   each delivered after a settle delay
//!
//! Both reject work silently when stopped or at capacity, support forced
//! flushing, and drain every in-flight callback on `stop`.

pub mod config;
pub mod error;
pub mod keyed;
pub mod window;

pub use config::{DebounceConfig, DelayConfig, WindowConfig};
pub use error::{DelayError, Result};
pub use keyed::KeyedDebouncer;
pub use window::BatchWindower;

use std::sync::Arc;

/// Callback shared between a scheduler and its tasks
pub(crate) type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;
