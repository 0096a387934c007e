//! CLI command implementations
//!
//! - `core` - `init` and the shared `open_db` helper
//! - `serve` - API server
//! - `sweep` - one-off insight sweep
//! - `stats` - usage statistics

pub mod core;
pub mod serve;
pub mod stats;
pub mod sweep;

// Re-export command functions for main.rs
pub use core::*;
pub use serve::*;
pub use stats::*;
pub use sweep::*;
