//! Stored insight operations

use rusqlite::{params, Row};

use super::{collect_scanned, parse_datetime, Database};
use crate::error::Result;
use crate::models::{Insight, Priority, Scanned, UserInsight};

/// Number of insights returned to devices
pub const RECENT_INSIGHTS_LIMIT: i64 = 10;

pub(crate) const INSIGHT_COLUMNS: &str =
    "i.id, i.user_id, i.title, i.message, i.category, i.priority, i.generated_at";

pub(crate) fn row_to_insight(row: &Row) -> rusqlite::Result<UserInsight> {
    let priority: String = row.get(5)?;
    let generated_at: String = row.get(6)?;
    Ok(UserInsight {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        category: row.get(4)?,
        priority: Priority::parse_lossy(&priority),
        generated_at: parse_datetime(&generated_at),
    })
}

impl Database {
    /// Append generated insights for a user; returns the new row ids
    pub fn save_insights(&self, user_id: i64, insights: &[Insight]) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(insights.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO user_insights (user_id, title, message, category, priority)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )?;
            for insight in insights {
                stmt.execute(params![
                    user_id,
                    insight.title,
                    insight.message,
                    insight.category,
                    insight.priority.as_str()
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Most recent insights for a user, newest first
    pub fn recent_insights(&self, user_id: i64, limit: i64) -> Result<Scanned<UserInsight>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM user_insights i
            WHERE i.user_id = ?
            ORDER BY i.generated_at DESC, i.id DESC
            LIMIT ?
            "#,
            INSIGHT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, limit], row_to_insight)?;
        Ok(collect_scanned(rows, "insight"))
    }
}
