use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the installed store and report whether round operations can be served.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let Some(store) = state.round_store().await else {
        warn!("storage unavailable (degraded mode)");
        return HealthResponse::degraded();
    };

    match store.health_check().await {
        Ok(()) if !state.is_degraded() => HealthResponse::ok(),
        Ok(()) => HealthResponse::degraded(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        clock::SystemClock, config::AppConfig, dao::round_store::memory::MemoryRoundStore,
        state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_without_store() {
        let state = AppState::new(AppConfig::default(), Arc::new(SystemClock));
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .set_round_store(Arc::new(MemoryRoundStore::new(state.clock())))
            .await;
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert!(health.storage_ready);
    }
}
