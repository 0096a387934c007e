//! Push notification log

use rusqlite::params;

use super::Database;
use crate::error::Result;
use crate::models::NotificationKind;

/// One push attempt, possibly to many devices
#[derive(Debug, Clone)]
pub struct NotificationRecord<'a> {
    pub user_id: Option<i64>,
    pub kind: NotificationKind,
    pub recipients: usize,
    pub delivered: usize,
    pub error: Option<&'a str>,
}

impl Database {
    pub fn record_notification(&self, record: &NotificationRecord<'_>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO notification_log (user_id, kind, recipients, delivered, error)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                record.user_id,
                record.kind.as_str(),
                record.recipients as i64,
                record.delivered as i64,
                record.error
            ],
        )?;
        Ok(())
    }
}
