pub mod connection;
pub mod dispatcher;

use std::sync::Arc;

use parlor_db::{ChatError, ChatResult, Database};

/// Run a database call on the blocking thread pool.
pub async fn with_db<F, T>(db: &Arc<Database>, f: F) -> ChatResult<T>
where
    F: FnOnce(&Database) -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ChatError::Internal(anyhow::anyhow!("blocking task failed: {}", e)))?
}
