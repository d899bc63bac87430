//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Core commands (init) and shared utilities (open_db, http_provider)
//! - `rules` - Categorization rule commands (list, add, delete)
//! - `serve` - Web server command
//! - `sync` - Sync and enrollment listing commands

pub mod core;
pub mod rules;
pub mod serve;
pub mod sync;

// Re-export command functions for main.rs
pub use core::*;
pub use rules::*;
pub use serve::*;
pub use sync::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
