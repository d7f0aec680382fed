//! Long-running background task that retries undelivered attribution
//! events for paid orders.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::Result;
use crate::{db, dispatch, AppState};

/// Run the sweep loop until shutdown is signalled.
pub async fn run(state: Arc<AppState>, shutdown: CancellationToken) {
    let interval = Duration::from_secs(state.config.sweep_interval_secs);
    info!(
        "Sweeper starting — interval {}s, batch {}",
        state.config.sweep_interval_secs, state.config.sweep_batch_size
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Sweeper stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match sweep_once(&state).await {
            Ok(0) => {}
            Ok(delivered) => info!("Sweep delivered {delivered} attribution events"),
            Err(e) => error!("Sweep error: {e}"),
        }
    }
}

/// One pass over the backlog. Returns how many attribution events were
/// delivered this round.
pub async fn sweep_once(state: &AppState) -> Result<usize> {
    let due = db::sweepable_orders(
        &state.pool,
        state.config.dispatch_max_tries,
        state.config.sweep_batch_size,
    )
    .await?;
    if due.is_empty() {
        return Ok(0);
    }
    debug!("Sweeping {} orders with undelivered attribution", due.len());

    let mut delivered = 0usize;
    for order in &due {
        if dispatch::deliver_order(state, order).await {
            delivered += 1;
        }
    }
    Ok(delivered)
}
