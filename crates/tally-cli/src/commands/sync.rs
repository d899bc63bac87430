//! Sync and enrollment commands

use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::{
    AIClient, BatchSyncCoordinator, CategorizationPipeline, Database, EnrollmentSyncOrchestrator,
    Provider, TransactionIngestor, DEFAULT_SYNC_WINDOW,
};

use super::truncate;

/// Sync one enrollment, or every active enrollment in windows
pub async fn cmd_sync(
    db: &Database,
    provider: Arc<dyn Provider>,
    enrollment: Option<i64>,
    window: Option<usize>,
) -> Result<()> {
    let ai = AIClient::from_env();
    let pipeline = CategorizationPipeline::standard(db.clone(), ai);
    let ingestor = TransactionIngestor::new(db.clone(), pipeline);
    let orchestrator = EnrollmentSyncOrchestrator::new(db.clone(), provider, ingestor);

    if let Some(id) = enrollment {
        println!("🔄 Syncing enrollment #{}...", id);
        let result = orchestrator
            .sync_transactions(id)
            .await
            .with_context(|| format!("Sync of enrollment #{} failed", id))?;
        println!(
            "✅ {} account(s) updated, {} transaction(s) ingested",
            result.accounts_updated, result.transactions_ingested
        );
        return Ok(());
    }

    let coordinator = BatchSyncCoordinator::new(db.clone(), Arc::new(orchestrator))
        .with_window(window.unwrap_or(DEFAULT_SYNC_WINDOW));

    println!(
        "🔄 Syncing all active enrollments ({} at a time)...",
        coordinator.window()
    );
    let summary = coordinator.sync_all_active().await?;

    println!();
    println!("📊 Sync Results");
    println!("   ─────────────────────────────");
    println!("   Enrollments: {}", summary.total);
    println!("   ✅ Synced: {}", summary.synced);
    println!("   ❌ Failed: {}", summary.failed);

    if summary.failed > 0 {
        println!();
        println!("⚠️  Some enrollments failed. Run 'tally enrollments' to see their status.");
    }

    Ok(())
}

pub fn cmd_enrollments(db: &Database, user: Option<&str>) -> Result<()> {
    let enrollments = db.list_enrollments(user)?;

    if enrollments.is_empty() {
        println!("No enrollments found. Connect one through the API:");
        println!("  POST /api/enrollments/connect");
        return Ok(());
    }

    println!();
    println!("🏦 Enrollments");
    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   {:>4} │ {:24} │ {:20} │ {:12} │ {}",
        "ID", "User", "Institution", "Status", "Last synced"
    );
    println!("   ─────┼──────────────────────────┼──────────────────────┼──────────────┼─────────────────");

    for enrollment in enrollments {
        let last_synced = enrollment
            .last_synced_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "   {:>4} │ {:24} │ {:20} │ {:12} │ {}",
            enrollment.id,
            truncate(&enrollment.user_id, 24),
            truncate(enrollment.institution_name.as_deref().unwrap_or("-"), 20),
            enrollment.status.as_str(),
            last_synced
        );
    }

    Ok(())
}
