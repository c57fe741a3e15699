pub mod round;
pub mod scoring;

use std::{sync::Arc, time::SystemTime};

use tokio::sync::{RwLock, watch};

use crate::{
    clock::Clock, config::AppConfig, dao::round_store::RoundStore, error::ServiceError,
};

pub type SharedState = Arc<AppState>;

/// Central application state: the storage handle, the clock and the runtime configuration.
pub struct AppState {
    round_store: RwLock<Option<Arc<dyn RoundStore>>>,
    degraded: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            round_store: RwLock::new(None),
            degraded: degraded_tx,
            clock,
            config,
        })
    }

    /// Construct a state with `store` already installed.
    pub fn with_store(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn RoundStore>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            round_store: RwLock::new(Some(store)),
            degraded: degraded_tx,
            clock,
            config,
        })
    }

    /// Obtain a handle to the current round store, if one is installed.
    pub async fn round_store(&self) -> Option<Arc<dyn RoundStore>> {
        let guard = self.round_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the current round store or fail with [`ServiceError::Degraded`].
    pub async fn require_round_store(&self) -> Result<Arc<dyn RoundStore>, ServiceError> {
        self.round_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new round store implementation and leave degraded mode.
    pub async fn set_round_store(&self, store: Arc<dyn RoundStore>) {
        {
            let mut guard = self.round_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current round store and enter degraded mode.
    pub async fn clear_round_store(&self) {
        {
            let mut guard = self.round_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Clock every lifecycle decision is made against.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Shorthand for `self.clock().now()`.
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, dao::round_store::memory::MemoryRoundStore};

    #[tokio::test]
    async fn installing_and_clearing_the_store_toggles_degraded_mode() {
        let state = AppState::new(AppConfig::default(), Arc::new(SystemClock));
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());
        assert!(matches!(
            state.require_round_store().await,
            Err(ServiceError::Degraded)
        ));

        state
            .set_round_store(Arc::new(MemoryRoundStore::new(state.clock())))
            .await;
        assert!(!state.is_degraded());
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
        assert!(state.require_round_store().await.is_ok());

        state.clear_round_store().await;
        assert!(state.is_degraded());
        assert!(state.round_store().await.is_none());
    }
}
