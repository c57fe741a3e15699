use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::round_store::{RoundStore, StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the round store, then keep probing it.
///
/// While the store cannot be reached the shared state stays degraded and every round
/// operation answers with [`crate::error::ServiceError::Degraded`].
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoundStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
        };

        state.set_round_store(store.clone()).await;
        info!("storage connection established; leaving degraded mode");
        delay = INITIAL_DELAY;

        while watch_store(&state, store.as_ref()).await {}

        state.clear_round_store().await;
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// One health probe followed by the reconnection dance on failure.
///
/// Returns `false` once the store is considered lost.
async fn watch_store(state: &SharedState, store: &dyn RoundStore) -> bool {
    if store.health_check().await.is_ok() {
        if state.is_degraded() {
            info!("storage healthy again; leaving degraded mode");
            state.update_degraded(false);
        }
        sleep(HEALTH_POLL_INTERVAL).await;
        return true;
    }

    let mut reconnect_delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                state.update_degraded(false);
                sleep(HEALTH_POLL_INTERVAL).await;
                return true;
            }
            Err(err) if attempt == 0 => {
                warn!(attempt, error = %err, "storage reconnect failed; entering degraded mode");
                state.update_degraded(true);
            }
            Err(err) => warn!(attempt, error = %err, "storage reconnect attempt failed"),
        }
        sleep(reconnect_delay).await;
        reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
    }

    warn!("exhausted storage reconnect attempts; staying in degraded mode");
    false
}
