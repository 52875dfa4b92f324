use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::store::MemoryRoomStore;

/// Periodically delete rooms whose lifetime has run out
pub async fn start_expiry_sweeper(store: Arc<MemoryRoomStore>, every: Duration) {
    let mut timer = interval(every);

    loop {
        // First tick fires immediately, so stale rooms go on startup too
        timer.tick().await;

        let deleted = store.delete_expired(Utc::now()).await;
        for room_id in &deleted {
            tracing::info!("Room {} expired and was removed", room_id);
        }
        if !deleted.is_empty() {
            tracing::info!("Expiry sweep removed {} room(s)", deleted.len());
        }
    }
}
