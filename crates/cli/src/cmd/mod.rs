//! Subcommand implementations

pub mod debounce;
pub mod window;
