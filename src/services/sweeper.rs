//! Periodic reconciliation of persisted round status and winners.

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{models::Finalization, round_store::RoundStore},
    error::ServiceError,
    state::SharedState,
};

/// What a single sweep changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Rounds moved from COOLDOWN to ACTIVE.
    pub activated: u64,
    /// Rounds finalized by this pass.
    pub finalized: Vec<Uuid>,
}

impl SweepReport {
    fn is_empty(&self) -> bool {
        self.activated == 0 && self.finalized.is_empty()
    }
}

/// Run [`sweep_once`] forever at the configured interval.
pub async fn run(state: SharedState) {
    let period = state.config().sweep_interval;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = period.as_millis() as u64, "round sweeper started");

    loop {
        ticker.tick().await;

        match sweep_once(&state).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => debug!(
                activated = report.activated,
                finalized = report.finalized.len(),
                "round sweep applied changes"
            ),
            Err(ServiceError::Degraded) => debug!("skipping round sweep (degraded mode)"),
            Err(err) => warn!(error = %err, "round sweep failed"),
        }
    }
}

/// Finalize every round past its end, then activate every round past its start.
pub async fn sweep_once(state: &SharedState) -> Result<SweepReport, ServiceError> {
    let store = state.require_round_store().await?;
    let now = state.now();
    let mut report = SweepReport::default();

    for round in store.rounds_due_for_finalization(now).await? {
        if finalize_round(store.as_ref(), round.id).await? {
            report.finalized.push(round.id);
        }
    }

    report.activated = store.activate_due_rounds(now).await?;
    if report.activated > 0 {
        info!(count = report.activated, "rounds activated");
    }

    Ok(report)
}

/// Record the winner of a finished round. A round already finalized is left untouched.
async fn finalize_round(store: &dyn RoundStore, round_id: Uuid) -> Result<bool, ServiceError> {
    match store.finalize_round(round_id).await? {
        Finalization::Finalized(Some(winner)) => {
            info!(
                %round_id,
                winner_id = %winner.user_id,
                winner_name = %winner.user_name,
                winner_score = winner.score,
                "round finalized"
            );
            Ok(true)
        }
        Finalization::Finalized(None) => {
            info!(%round_id, "round finalized without taps");
            Ok(true)
        }
        Finalization::Unchanged => {
            debug!(%round_id, "round already finalized");
            Ok(false)
        }
    }
}
