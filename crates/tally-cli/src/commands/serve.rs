//! Server command implementation

use std::path::Path;

use anyhow::Result;
use tally_core::AIClient;

use super::{http_provider, open_db};

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    let config = tally_server::ServerConfig {
        require_auth: !no_auth,
        ..tally_server::ServerConfig::from_env()
    };

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if config.api_keys.is_empty() {
        println!("   🔒 Authentication: no API keys configured, set TALLY_API_KEYS (user:key,...)");
    } else {
        println!(
            "   🔑 API keys: {} configured (TALLY_API_KEYS)",
            config.api_keys.len()
        );
    }
    println!(
        "   🪝 Webhook secrets: {} configured (TALLY_WEBHOOK_SECRET)",
        config.webhook_secrets.len()
    );
    if config.cron_secret.is_some() {
        println!("   ⏰ Cron sync: enabled (TALLY_CRON_SECRET)");
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }

    let ai = AIClient::from_env();
    if ai.is_some() {
        println!("   🤖 AI categorization enabled");
    } else {
        println!("   💡 Tip: Set OLLAMA_HOST for AI categorization");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;
    let provider = http_provider()?;

    tally_server::serve_with_config(db, provider, ai, host, port, config).await?;

    Ok(())
}
