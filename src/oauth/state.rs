//! CSRF state nonces binding an authorization request to its callback.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use rusqlite::params;

use crate::db::Database;

/// Nonce lifetime in seconds.
const NONCE_TTL_SECS: i64 = 3600;

/// Prefix for rows in the `oauth_state` table.
const KEY_PREFIX: &str = "oauth_state:";

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("State store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Short-lived single-use nonce register.
///
/// A nonce is valid for at most one callback: `consume` is an atomic
/// check-and-delete, so two racing callbacks presenting the same value can
/// never both observe `true`.
pub trait NonceStore: Send + Sync {
    /// Generate a random nonce and record it with the fixed TTL.
    fn issue(&self) -> Result<String, NonceError>;

    /// Returns whether the nonce was present and unexpired, removing it if so.
    fn consume(&self, nonce: &str) -> Result<bool, NonceError>;

    /// Delete expired rows. Returns the number removed.
    fn purge_expired(&self) -> Result<usize, NonceError>;
}

/// SQLite-backed nonce store over the shared `oauth_state` table.
#[derive(Clone)]
pub struct SqliteNonceStore {
    db: Database,
}

impl SqliteNonceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// 32 random bytes, base64url without padding (43 chars).
fn generate_nonce() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

impl NonceStore for SqliteNonceStore {
    fn issue(&self) -> Result<String, NonceError> {
        let nonce = generate_nonce();
        let now = chrono::Utc::now().timestamp();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO oauth_state (key, created_at, expires_at) VALUES (?1, ?2, ?3)",
                params![format!("{KEY_PREFIX}{nonce}"), now, now + NONCE_TTL_SECS],
            )
        })?;

        Ok(nonce)
    }

    fn consume(&self, nonce: &str) -> Result<bool, NonceError> {
        let now = chrono::Utc::now().timestamp();

        // Single DELETE with the expiry predicate: the affected-row count is
        // the presence answer, and SQLite serializes writers, so exactly one
        // of two concurrent consumers can succeed.
        let deleted = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM oauth_state WHERE key = ?1 AND expires_at > ?2",
                params![format!("{KEY_PREFIX}{nonce}"), now],
            )
        })?;

        Ok(deleted == 1)
    }

    fn purge_expired(&self) -> Result<usize, NonceError> {
        let now = chrono::Utc::now().timestamp();
        let purged = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM oauth_state WHERE expires_at <= ?1",
                params![now],
            )
        })?;

        if purged > 0 {
            tracing::debug!(purged, "Expired OAuth state purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteNonceStore {
        SqliteNonceStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_nonce_is_url_safe_and_unique() {
        let n1 = generate_nonce();
        let n2 = generate_nonce();
        assert_ne!(n1, n2);
        assert_eq!(n1.len(), 43);
        assert!(n1
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_consume_succeeds_exactly_once() {
        let store = test_store();
        let nonce = store.issue().unwrap();

        assert!(store.consume(&nonce).unwrap());
        assert!(!store.consume(&nonce).unwrap());
    }

    #[test]
    fn test_consume_unknown_nonce() {
        let store = test_store();
        assert!(!store.consume("never-issued").unwrap());
    }

    #[test]
    fn test_consume_has_no_side_effect_when_absent() {
        let store = test_store();
        let nonce = store.issue().unwrap();

        assert!(!store.consume("other").unwrap());
        // The real nonce is still there.
        assert!(store.consume(&nonce).unwrap());
    }

    #[test]
    fn test_concurrent_consume_has_exactly_one_winner() {
        let store = test_store();
        let nonce = store.issue().unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let nonce = nonce.clone();
                std::thread::spawn(move || store.consume(&nonce).unwrap())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_expired_nonce_is_not_consumable() {
        let store = test_store();
        let nonce = store.issue().unwrap();

        // Force the row into the past.
        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE oauth_state SET expires_at = 0 WHERE key = ?1",
                    params![format!("{KEY_PREFIX}{nonce}")],
                )
            })
            .unwrap();

        assert!(!store.consume(&nonce).unwrap());
    }

    #[test]
    fn test_issue_sets_ttl() {
        let store = test_store();
        let before = chrono::Utc::now().timestamp();
        let nonce = store.issue().unwrap();

        let expires_at: i64 = store
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT expires_at FROM oauth_state WHERE key = ?1",
                    params![format!("{KEY_PREFIX}{nonce}")],
                    |row| row.get(0),
                )
            })
            .unwrap();

        assert!(expires_at >= before + NONCE_TTL_SECS);
        assert!(expires_at <= before + NONCE_TTL_SECS + 2);
    }

    #[test]
    fn test_purge_expired_removes_only_stale_rows() {
        let store = test_store();
        let stale = store.issue().unwrap();
        let fresh = store.issue().unwrap();

        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE oauth_state SET expires_at = 0 WHERE key = ?1",
                    params![format!("{KEY_PREFIX}{stale}")],
                )
            })
            .unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(store.consume(&fresh).unwrap());
    }
}
