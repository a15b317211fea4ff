pub mod clock;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod reactions;
pub mod typing;
pub mod unread;
pub mod users;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ChatError, ChatResult};

/// Placeholder stored as a conversation's last-message preview. Message
/// bodies are encrypted client-side, so the server never derives a preview.
pub const MESSAGE_PREVIEW: &str = "[Message]";

/// Content written over a message when it is soft-deleted.
pub const DELETED_MESSAGE_MARKER: &str = "[Message deleted]";

/// How long a typing indicator stays live without a refresh.
pub const TYPING_TTL_MS: i64 = 2_000;

/// A user whose last heartbeat is older than this is offline.
pub const HEARTBEAT_TIMEOUT_MS: i64 = 30_000;

pub const DEFAULT_MESSAGE_LIMIT: u32 = 50;
pub const MAX_MESSAGE_LIMIT: u32 = 200;

pub struct Database {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Private in-memory database, used by tests and throwaway instances.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source. Every operation reads "now" from it.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Run a read against the connection.
    pub fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::Internal(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a unit of work in one IMMEDIATE transaction. Commits when `f`
    /// returns `Ok`; any error rolls back every write `f` made.
    pub fn with_tx<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> ChatResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::Internal(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use parlor_types::models::User;

    use crate::{Database, ManualClock};

    pub fn db() -> (Database, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        ));
        let db = Database::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        (db, clock)
    }

    pub fn user(db: &Database, name: &str) -> User {
        db.sync_profile(
            &format!("ext-{name}"),
            &format!("{name}@example.com"),
            name,
            None,
        )
        .unwrap()
    }
}
