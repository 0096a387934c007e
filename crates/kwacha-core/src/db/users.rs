//! Device/user operations

use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{BroadcastTarget, Registration, SweepCandidate, User};

const USER_COLUMNS: &str = "id, device_id, fcm_token, operator, is_premium, consent_given, \
                            consent_date, created_at, updated_at";

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    let consent_date: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(User {
        id: row.get(0)?,
        device_id: row.get(1)?,
        fcm_token: row.get(2)?,
        operator: row.get(3)?,
        is_premium: row.get(4)?,
        consent_given: row.get(5)?,
        consent_date: consent_date.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn token_row(row: &Row) -> rusqlite::Result<(i64, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

impl Database {
    /// Register a device, or refresh the push token of a known one
    ///
    /// Empty tokens and operators are treated as absent.
    pub fn register_device(
        &self,
        device_id: &str,
        fcm_token: Option<&str>,
        operator: Option<&str>,
    ) -> Result<Registration> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(Error::InvalidData("device_id is required".into()));
        }
        let fcm_token = fcm_token.map(str::trim).filter(|t| !t.is_empty());
        let operator = operator.map(str::trim).filter(|o| !o.is_empty());

        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE device_id = ?",
                params![device_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(user_id) = existing {
            if fcm_token.is_some() || operator.is_some() {
                conn.execute(
                    r#"
                    UPDATE users
                    SET fcm_token = COALESCE(?, fcm_token),
                        operator = COALESCE(?, operator),
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                    params![fcm_token, operator, user_id],
                )?;
            }
            return Ok(Registration {
                user_id,
                is_new_user: false,
            });
        }

        conn.execute(
            "INSERT INTO users (device_id, fcm_token, operator) VALUES (?, ?, ?)",
            params![device_id, fcm_token, operator.unwrap_or("UNKNOWN")],
        )?;
        let user_id = conn.last_insert_rowid();
        info!(user_id, "Registered new device");

        Ok(Registration {
            user_id,
            is_new_user: true,
        })
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                params![user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_device(&self, device_id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE device_id = ?", USER_COLUMNS),
                params![device_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Grant or withdraw consent; the consent date follows the flag
    pub fn set_consent(&self, user_id: i64, given: bool) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE users
            SET consent_given = ?,
                consent_date = CASE WHEN ? THEN CURRENT_TIMESTAMP ELSE NULL END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![given, given, user_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("user {}", user_id)));
        }
        info!(user_id, consent = given, "Consent updated");
        Ok(())
    }

    /// Fail unless the user exists and has consented to processing
    pub fn require_consent(&self, user_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let consent: Option<bool> = conn
            .query_row(
                "SELECT consent_given FROM users WHERE id = ?",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match consent {
            None => Err(Error::NotFound(format!("user {}", user_id))),
            Some(false) => Err(Error::ConsentRequired),
            Some(true) => Ok(()),
        }
    }

    /// Delete a user and everything they own, in one datastore transaction
    pub fn delete_user_data(&self, user_id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM user_insights WHERE user_id = ?", params![user_id])?;
        let transactions =
            tx.execute("DELETE FROM transactions WHERE user_id = ?", params![user_id])?;
        let users = tx.execute("DELETE FROM users WHERE id = ?", params![user_id])?;
        if users == 0 {
            return Err(Error::NotFound(format!("user {}", user_id)));
        }
        tx.commit()?;

        info!(user_id, transactions, "Deleted user data");
        Ok(())
    }

    /// Consenting users with a push token, in id order
    pub fn sweep_candidates(&self) -> Result<Vec<SweepCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, fcm_token FROM users
            WHERE consent_given = 1 AND fcm_token IS NOT NULL AND fcm_token != ''
            ORDER BY id
            "#,
        )?;
        let candidates = stmt
            .query_map([], |row| {
                Ok(SweepCandidate {
                    user_id: row.get(0)?,
                    push_token: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }

    /// Push tokens for a broadcast target, as (user_id, token)
    pub fn push_tokens(&self, target: &BroadcastTarget) -> Result<Vec<(i64, String)>> {
        let conn = self.conn()?;
        let base = "SELECT id, fcm_token FROM users WHERE fcm_token IS NOT NULL AND fcm_token != ''";

        let tokens = match target {
            BroadcastTarget::All => {
                let mut stmt = conn.prepare(&format!("{} ORDER BY id", base))?;
                let rows = stmt.query_map([], token_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            BroadcastTarget::Active => {
                let mut stmt = conn.prepare(&format!(
                    r#"{} AND consent_given = 1
                       AND EXISTS (
                           SELECT 1 FROM transactions t
                           WHERE t.user_id = users.id
                             AND t.created_at >= datetime('now', '-7 days')
                       )
                       ORDER BY id"#,
                    base
                ))?;
                let rows = stmt.query_map([], token_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            BroadcastTarget::Specific(ids) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "{} AND id IN ({}) ORDER BY id",
                    base, placeholders
                ))?;
                let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), token_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(tokens)
    }
}
