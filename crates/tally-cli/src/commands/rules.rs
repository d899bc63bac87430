//! Categorization rule commands

use anyhow::Result;
use tally_core::models::{ConfidenceScore, PatternType};
use tally_core::Database;

use super::truncate;

pub fn cmd_rules_list(db: &Database) -> Result<()> {
    let rules = db.list_category_rules()?;

    if rules.is_empty() {
        println!("No rules defined. Add one with:");
        println!("  tally rules add <category> <pattern> [--type contains|regex|exact]");
        return Ok(());
    }

    println!();
    println!("📋 Category Rules");
    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   {:>4} │ {:>4} │ {:24} │ {:10} │ {}",
        "ID", "Pri", "Category", "Type", "Pattern"
    );
    println!("   ─────┼──────┼──────────────────────────┼────────────┼─────────────────");

    for rule in rules {
        let category = match &rule.subcategory {
            Some(sub) => format!("{} / {}", rule.category, sub),
            None => rule.category.clone(),
        };
        println!(
            "   {:>4} │ {:>4} │ {:24} │ {:10} │ {}",
            rule.id,
            rule.priority,
            truncate(&category, 24),
            rule.pattern_type.as_str(),
            truncate(&rule.pattern, 30)
        );
    }

    Ok(())
}

pub fn cmd_rules_add(
    db: &Database,
    category: &str,
    pattern: &str,
    subcategory: Option<&str>,
    pattern_type_str: &str,
    confidence: f64,
    priority: i32,
) -> Result<()> {
    let pattern_type: PatternType = pattern_type_str
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{} (valid types: contains, regex, exact)", e))?;

    let rule_id = db.add_category_rule(
        pattern,
        pattern_type,
        category,
        subcategory,
        ConfidenceScore::new(confidence),
        priority,
    )?;
    println!(
        "✅ Created rule #{} for '{}': {} ({})",
        rule_id,
        category,
        pattern,
        pattern_type.as_str()
    );

    Ok(())
}

pub fn cmd_rules_delete(db: &Database, id: i64) -> Result<()> {
    if !db.delete_category_rule(id)? {
        anyhow::bail!("Rule #{} not found", id);
    }
    println!("✅ Deleted rule #{}", id);

    Ok(())
}
