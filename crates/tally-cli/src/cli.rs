//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Sync bank data and keep it categorized
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Self-hosted banking-data sync and categorization", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Start the web server (webhooks, sync triggers, API)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the API requires a key from TALLY_API_KEYS.
        #[arg(long)]
        no_auth: bool,
    },

    /// Sync enrollments with the provider now
    Sync {
        /// Only sync this enrollment (local id)
        #[arg(short, long)]
        enrollment: Option<i64>,

        /// Enrollments synced concurrently
        #[arg(short, long)]
        window: Option<usize>,
    },

    /// List enrollments and their sync status
    Enrollments {
        /// Only show this user's enrollments
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Manage categorization rules
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List all rules
    List,

    /// Add a categorization rule
    Add {
        /// Category assigned when the pattern matches
        category: String,

        /// Pattern to match against merchant and description
        pattern: String,

        /// Subcategory assigned alongside the category
        #[arg(short, long)]
        subcategory: Option<String>,

        /// Pattern type: contains, regex, exact
        #[arg(short = 't', long = "type", default_value = "contains")]
        pattern_type: String,

        /// Confidence reported for matches (0.0 - 1.0)
        #[arg(short, long, default_value = "0.9")]
        confidence: f64,

        /// Priority (higher wins)
        #[arg(short, long, default_value = "0")]
        priority: i32,
    },

    /// Delete a rule
    Delete {
        /// Rule ID
        id: i64,
    },
}
