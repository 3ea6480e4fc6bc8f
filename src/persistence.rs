//! # Durable Local State
//!
//! Small key/value records that must survive an app restart:
//! - `active_tracking_session`: the live-location session being broadcast
//! - `user`: the logged-in identity (read-only from the navigation core)
//!
//! Values are JSON strings. [`SqliteStore`] backs them on device;
//! [`MemoryStore`] is the in-process equivalent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[cfg(feature = "persistence")]
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::CreatedSession;
use crate::error::Result;

/// Key of the persisted live-location session
pub const ACTIVE_SESSION_KEY: &str = "active_tracking_session";

/// Key of the persisted user identity
pub const USER_KEY: &str = "user";

// ============================================================================
// Store
// ============================================================================

/// String key/value storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

/// In-memory store. Clones share contents, like handles onto one device store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// SQLite-backed store.
#[cfg(feature = "persistence")]
pub struct SqliteStore {
    db: Connection,
}

#[cfg(feature = "persistence")]
impl SqliteStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )?;
        Ok(())
    }
}

#[cfg(feature = "persistence")]
impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
             VALUES (?, ?, strftime('%s', 'now'))",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.db
            .execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        Ok(())
    }
}

// ============================================================================
// Records
// ============================================================================

/// The persisted `active_tracking_session` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub tracking_url: String,
    pub started_at: DateTime<Utc>,
    /// `None` for unlimited sessions
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: u32,
}

impl StoredSession {
    /// Record for a session created at `started_at`. Duration 0 never expires.
    pub fn new(created: CreatedSession, started_at: DateTime<Utc>, duration_minutes: u32) -> Self {
        let expires_at = (duration_minutes > 0)
            .then(|| started_at + ChronoDuration::minutes(i64::from(duration_minutes)));
        Self {
            session_id: created.session_id,
            tracking_url: created.tracking_url,
            started_at,
            expires_at,
            duration_minutes,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Time left, or `None` for unlimited sessions.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<ChronoDuration> {
        self.expires_at
            .map(|expires| (expires - now).max(ChronoDuration::zero()))
    }
}

/// The persisted `user` record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(default, alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserIdentity {
    /// Name shown to trusted contacts: name, else the e-mail local part, else "User".
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| "User".to_string())
    }
}

pub fn load_session<S: KeyValueStore>(store: &S) -> Result<Option<StoredSession>> {
    store.get_json(ACTIVE_SESSION_KEY)
}

pub fn save_session<S: KeyValueStore>(store: &mut S, session: &StoredSession) -> Result<()> {
    store.set_json(ACTIVE_SESSION_KEY, session)
}

pub fn clear_session<S: KeyValueStore>(store: &mut S) -> Result<()> {
    store.remove(ACTIVE_SESSION_KEY)
}

/// The logged-in user, or an anonymous identity when none is stored.
pub fn load_user<S: KeyValueStore>(store: &S) -> Result<UserIdentity> {
    Ok(store.get_json(USER_KEY)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created() -> CreatedSession {
        CreatedSession {
            session_id: "abc123".to_string(),
            tracking_url: "http://10.0.0.2:5000/track/abc123".to_string(),
        }
    }

    #[test]
    fn test_memory_store_shared_between_clones() {
        let mut store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(other.get("k").unwrap(), Some("v".to_string()));
        store.remove("k").unwrap();
        assert!(!other.contains("k"));
    }

    #[test]
    fn test_unlimited_session_never_expires() {
        let started = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let session = StoredSession::new(created(), started, 0);
        assert!(session.expires_at.is_none());
        assert!(!session.is_expired(started + ChronoDuration::days(365)));
        assert!(session.remaining(started).is_none());

        let json = serde_json::to_value(&session).unwrap();
        assert!(json["expires_at"].is_null());
    }

    #[test]
    fn test_timed_session_expiry() {
        let started = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let session = StoredSession::new(created(), started, 15);
        assert_eq!(session.expires_at, Some(started + ChronoDuration::minutes(15)));
        assert!(!session.is_expired(started + ChronoDuration::minutes(14)));
        assert!(session.is_expired(started + ChronoDuration::minutes(15)));
        assert_eq!(
            session.remaining(started + ChronoDuration::minutes(20)),
            Some(ChronoDuration::zero())
        );
    }

    #[test]
    fn test_session_record_roundtrip_through_store() {
        let mut store = MemoryStore::new();
        assert!(load_session(&store).unwrap().is_none());

        let session = StoredSession::new(created(), Utc::now(), 30);
        save_session(&mut store, &session).unwrap();
        assert_eq!(load_session(&store).unwrap(), Some(session));

        clear_session(&mut store).unwrap();
        assert!(load_session(&store).unwrap().is_none());
    }

    #[test]
    fn test_user_display_name_fallbacks() {
        let named = UserIdentity {
            id: "1".to_string(),
            name: Some("Asha".to_string()),
            email: Some("asha@example.org".to_string()),
        };
        assert_eq!(named.display_name(), "Asha");

        let email_only = UserIdentity {
            name: Some("  ".to_string()),
            ..named.clone()
        };
        assert_eq!(email_only.display_name(), "asha");

        assert_eq!(UserIdentity::default().display_name(), "User");
    }

    #[test]
    fn test_load_user_accepts_mongo_id() {
        let mut store = MemoryStore::new();
        assert_eq!(load_user(&store).unwrap(), UserIdentity::default());

        store
            .set(USER_KEY, r#"{"_id": "u-42", "name": "Asha"}"#)
            .unwrap();
        let user = load_user(&store).unwrap();
        assert_eq!(user.id, "u-42");
        assert_eq!(user.display_name(), "Asha");
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let path = path.to_str().unwrap();

        {
            let mut store = SqliteStore::new(path).unwrap();
            store.set("k", "v1").unwrap();
            store.set("k", "v2").unwrap();
        }

        let mut store = SqliteStore::new(path).unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_json_records() {
        let mut store = SqliteStore::in_memory().unwrap();
        let session = StoredSession::new(created(), Utc::now(), 0);
        save_session(&mut store, &session).unwrap();
        assert_eq!(load_session(&store).unwrap(), Some(session));
    }
}
