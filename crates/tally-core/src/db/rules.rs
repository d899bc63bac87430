//! Category rule operations

use rusqlite::params;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{CategoryRule, ConfidenceScore, PatternType};

impl Database {
    /// Add a categorization rule; regex patterns are validated up front
    pub fn add_category_rule(
        &self,
        pattern: &str,
        pattern_type: PatternType,
        category: &str,
        subcategory: Option<&str>,
        confidence: ConfidenceScore,
        priority: i32,
    ) -> Result<i64> {
        if pattern.trim().is_empty() {
            return Err(Error::validation("pattern", "must not be empty"));
        }
        if category.trim().is_empty() {
            return Err(Error::validation("category", "must not be empty"));
        }
        if pattern_type == PatternType::Regex {
            regex::Regex::new(pattern)?;
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO category_rules (pattern, pattern_type, category, subcategory, confidence, priority)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                pattern,
                pattern_type.as_str(),
                category,
                subcategory,
                confidence.value(),
                priority,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List rules, highest priority first (ties: oldest first)
    pub fn list_category_rules(&self) -> Result<Vec<CategoryRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, pattern, pattern_type, category, subcategory, confidence, priority
             FROM category_rules ORDER BY priority DESC, id",
        )?;

        let rules = stmt
            .query_map([], |row| {
                let pattern_type: String = row.get(2)?;
                let confidence: f64 = row.get(5)?;
                Ok(CategoryRule {
                    id: row.get(0)?,
                    pattern: row.get(1)?,
                    pattern_type: pattern_type.parse().unwrap_or(PatternType::Contains),
                    category: row.get(3)?,
                    subcategory: row.get(4)?,
                    confidence: ConfidenceScore::new(confidence),
                    priority: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    /// Delete a rule; returns false if it didn't exist
    pub fn delete_category_rule(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM category_rules WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }
}
