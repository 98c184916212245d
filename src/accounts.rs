//! Local account records keyed by the externally-derived identity.

use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Database;
use crate::oauth::exchange::TokenBundle;
use crate::oauth::profile::Profile;

/// Audit action recorded once per first-time account creation.
const SIGNUP_ACTION: &str = "user_signup";

/// Stored account record.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    /// Case-normalized email, immutable once created.
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub vehicle_refresh_token: String,
    pub vehicle_token_expires_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The persisted provider credentials the refresh path operates on.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredentials {
    pub refresh_token: String,
    pub expires_at: i64,
}

/// Append-only audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub details: String,
    pub timestamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Account store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Account not found: {0}")]
    NotFound(String),
}

pub trait AccountStore: Send + Sync {
    /// Whether an account exists for the given identity.
    fn exists(&self, id: &str) -> Result<bool, AccountError>;

    /// Insert a new account (plus its signup audit event) or update the
    /// provider credentials of an existing one.
    ///
    /// On update, only the refresh token, its expiry, and `updated_at`
    /// change. Identity, display name, and `created_at` are never
    /// overwritten.
    fn upsert(
        &self,
        id: &str,
        profile: &Profile,
        bundle: &TokenBundle,
        now: i64,
    ) -> Result<(), AccountError>;

    /// Point lookup of the stored refresh token and expiry.
    fn credentials(&self, id: &str) -> Result<Option<StoredCredentials>, AccountError>;

    /// Partial update used by the refresh path.
    fn update_credentials(
        &self,
        id: &str,
        refresh_token: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<(), AccountError>;
}

#[derive(Clone)]
pub struct SqliteAccountStore {
    db: Database,
}

impl SqliteAccountStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch a full account record. Test and diagnostics helper.
    pub fn get(&self, id: &str) -> Result<Account, AccountError> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT id, email, full_name, vehicle_refresh_token, \
                     vehicle_token_expires_at, created_at, updated_at \
                     FROM users WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(Account {
                            id: row.get(0)?,
                            email: row.get(1)?,
                            full_name: row.get(2)?,
                            vehicle_refresh_token: row.get(3)?,
                            vehicle_token_expires_at: row.get(4)?,
                            created_at: row.get(5)?,
                            updated_at: row.get(6)?,
                        })
                    },
                )
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AccountError::NotFound(id.to_string()),
                other => AccountError::Store(other),
            })
    }

    /// Audit events for an account, oldest first.
    pub fn audit_events(&self, user_id: &str) -> Result<Vec<AuditEvent>, AccountError> {
        let events = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, action, details, timestamp \
                 FROM audit_logs WHERE user_id = ?1 ORDER BY timestamp",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(AuditEvent {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    action: row.get(2)?,
                    details: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(events)
    }
}

impl AccountStore for SqliteAccountStore {
    fn exists(&self, id: &str) -> Result<bool, AccountError> {
        let found: Option<i64> = self
            .db
            .with_conn(|conn| {
                conn.query_row("SELECT 1 FROM users WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
            })?;
        Ok(found.is_some())
    }

    fn upsert(
        &self,
        id: &str,
        profile: &Profile,
        bundle: &TokenBundle,
        now: i64,
    ) -> Result<(), AccountError> {
        let inserted = self.db.with_conn(|conn| {
            // Insert and signup audit land together or not at all.
            let tx = conn.unchecked_transaction()?;

            let updated = tx.execute(
                "UPDATE users SET vehicle_refresh_token = ?1, \
                 vehicle_token_expires_at = ?2, updated_at = ?3 WHERE id = ?4",
                params![bundle.refresh_token, bundle.expires_at, now, id],
            )?;

            let inserted = if updated == 0 {
                tx.execute(
                    "INSERT INTO users (id, email, full_name, vehicle_refresh_token, \
                     vehicle_token_expires_at, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        profile.email,
                        profile.display_name(),
                        bundle.refresh_token,
                        bundle.expires_at,
                        now,
                        now
                    ],
                )?;
                tx.execute(
                    "INSERT INTO audit_logs (id, user_id, action, details, timestamp) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        Uuid::new_v4().to_string(),
                        id,
                        SIGNUP_ACTION,
                        "vehicle account OAuth signup",
                        now
                    ],
                )?;
                true
            } else {
                false
            };

            tx.commit()?;
            Ok(inserted)
        })?;

        if inserted {
            tracing::info!(account = %id, "Account created");
        } else {
            tracing::debug!(account = %id, "Account credentials updated");
        }
        Ok(())
    }

    fn credentials(&self, id: &str) -> Result<Option<StoredCredentials>, AccountError> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT vehicle_refresh_token, vehicle_token_expires_at \
                     FROM users WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(StoredCredentials {
                            refresh_token: row.get(0)?,
                            expires_at: row.get(1)?,
                        })
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
            })
            .map_err(AccountError::Store)
    }

    fn update_credentials(
        &self,
        id: &str,
        refresh_token: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<(), AccountError> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET vehicle_refresh_token = ?1, \
                 vehicle_token_expires_at = ?2, updated_at = ?3 WHERE id = ?4",
                params![refresh_token, expires_at, now, id],
            )
        })?;

        if updated == 0 {
            return Err(AccountError::NotFound(id.to_string()));
        }

        tracing::debug!(account = %id, expires_at, "Provider credentials refreshed");
        Ok(())
    }
}
