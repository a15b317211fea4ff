use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use parlor_db::{ChatResult, Database};
use parlor_gateway::dispatcher::Dispatcher;
use parlor_gateway::with_db;
use parlor_types::events::GatewayEvent;

/// Background task that deletes expired typing indicators and takes users
/// with a stale heartbeat offline. Reads already ignore both, so this only
/// keeps storage tidy and lets clients hear about timeouts.
pub async fn run_reaper_loop(db: Arc<Database>, dispatcher: Dispatcher, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        if let Err(e) = reap(&db, &dispatcher).await {
            warn!("Reaper error: {}", e);
        }
    }
}

async fn reap(db: &Arc<Database>, dispatcher: &Dispatcher) -> ChatResult<()> {
    let purged = with_db(db, |db| db.purge_expired_typing()).await?;
    let stale = with_db(db, |db| db.reconcile_stale_presence()).await?;

    for user_id in &stale {
        dispatcher.broadcast(GatewayEvent::PresenceUpdate {
            user_id: *user_id,
            online: false,
        });
    }

    debug!(
        "Reaper: purged {} typing indicators, {} users timed out",
        purged,
        stale.len()
    );
    Ok(())
}
