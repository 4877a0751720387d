use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use parley_db::Database;

/// Background task that repairs chat summaries.
///
/// The message insert and the summary update are separate writes, so a crash
/// between them can leave `last_message_id` behind the newest message. Each
/// pass recomputes stale summaries from the messages table.
pub async fn run_reconcile_loop(db: Arc<Database>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match reconcile_once(db.clone()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Reconcile: repaired {} chat summaries", count);
                }
            }
            Err(e) => {
                warn!("Reconcile error: {:#}", e);
            }
        }
    }
}

pub async fn reconcile_once(db: Arc<Database>) -> anyhow::Result<usize> {
    tokio::task::spawn_blocking(move || db.reconcile_chat_summaries()).await?
}
