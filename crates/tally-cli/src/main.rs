//! Tally CLI - Banking-data sync and categorization
//!
//! Usage:
//!   tally init                 Initialize database
//!   tally serve --port 3000    Start web server
//!   tally sync                 Sync all active enrollments
//!   tally rules add ...        Add a categorization rule

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(tally_core::db::default_db_path);

    match cli.command {
        Commands::Init => commands::cmd_init(&db_path, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            no_auth,
        } => commands::cmd_serve(&db_path, &host, port, no_auth, cli.no_encrypt).await,
        Commands::Sync { enrollment, window } => {
            let db = commands::open_db(&db_path, cli.no_encrypt)?;
            commands::cmd_sync(&db, commands::http_provider()?, enrollment, window).await
        }
        Commands::Enrollments { user } => {
            let db = commands::open_db(&db_path, cli.no_encrypt)?;
            commands::cmd_enrollments(&db, user.as_deref())
        }
        Commands::Rules { action } => {
            let db = commands::open_db(&db_path, cli.no_encrypt)?;
            match action {
                None | Some(RulesAction::List) => commands::cmd_rules_list(&db),
                Some(RulesAction::Add {
                    category,
                    pattern,
                    subcategory,
                    pattern_type,
                    confidence,
                    priority,
                }) => commands::cmd_rules_add(
                    &db,
                    &category,
                    &pattern,
                    subcategory.as_deref(),
                    &pattern_type,
                    confidence,
                    priority,
                ),
                Some(RulesAction::Delete { id }) => commands::cmd_rules_delete(&db, id),
            }
        }
    }
}
