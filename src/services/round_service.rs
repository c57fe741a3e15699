//! Round engine: lifecycle operations and the tap protocol.
//!
//! Status is always derived from the stored boundaries and the state clock here; the
//! persisted status maintained by the sweeper is never consulted on these paths.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::models::{RoundEntity, TapCommand, TapRecord},
    dto::{
        identity::Participant,
        round::{RoundView, TapResponse},
    },
    error::ServiceError,
    state::SharedState,
};

/// Schedule a new round: cooldown starts now, the active window follows it.
pub async fn create_round(state: &SharedState) -> Result<Uuid, ServiceError> {
    let store = state.require_round_store().await?;
    let config = state.config();

    let now = state.now();
    let start_time = now + config.cooldown_duration;
    let end_time = start_time + config.round_duration;
    let round = RoundEntity::scheduled(now, start_time, end_time);
    let round_id = round.id;

    store.insert_round(round).await?;
    info!(
        %round_id,
        cooldown_secs = config.cooldown_duration.as_secs(),
        duration_secs = config.round_duration.as_secs(),
        "round scheduled"
    );
    Ok(round_id)
}

/// Every round, newest first, annotated with `viewer`'s totals where they tapped.
pub async fn list_rounds(
    state: &SharedState,
    viewer: Option<&str>,
) -> Result<Vec<RoundView>, ServiceError> {
    let store = state.require_round_store().await?;
    let rounds = store.list_rounds().await?;

    let viewer_results: HashMap<Uuid, _> = match viewer {
        Some(user_id) => store
            .list_results_for_user(user_id.to_owned())
            .await?
            .into_iter()
            .map(|entry| (entry.round_id, entry))
            .collect(),
        None => HashMap::new(),
    };

    let now = state.now();
    Ok(rounds
        .into_iter()
        .map(|round| {
            let entry = viewer_results.get(&round.id);
            RoundView::build(round, now, entry)
        })
        .collect())
}

/// A single round annotated with `viewer`'s totals.
pub async fn get_round(
    state: &SharedState,
    round_id: Uuid,
    viewer: Option<&str>,
) -> Result<RoundView, ServiceError> {
    let store = state.require_round_store().await?;
    let Some(round) = store.find_round(round_id).await? else {
        return Err(ServiceError::NotFound(format!("round `{round_id}` not found")));
    };

    let entry = match viewer {
        Some(user_id) => store.find_result(round_id, user_id.to_owned()).await?,
        None => None,
    };

    Ok(RoundView::build(round, state.now(), entry.as_ref()))
}

/// Resolve a client-supplied round identifier. Ids are opaque to clients, so anything that
/// does not parse simply names no round.
pub fn parse_round_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ServiceError::NotFound(format!("round `{raw}` not found")))
}

/// Register one tap by `participant` on `round_id`.
///
/// The store applies the whole step atomically against its own clock. Retrying after a
/// successful call counts the tap again: submissions carry no deduplication key.
pub async fn tap(
    state: &SharedState,
    round_id: Uuid,
    participant: &Participant,
) -> Result<TapResponse, ServiceError> {
    let store = state.require_round_store().await?;
    let command = TapCommand {
        round_id,
        user_id: participant.id.clone(),
        user_name: participant.name.clone(),
        role: participant.role,
    };

    match store.record_tap(command).await? {
        TapRecord::Recorded(entry) => {
            debug!(
                %round_id,
                user_id = %entry.user_id,
                taps = entry.taps,
                score = entry.score,
                "tap recorded"
            );
            Ok(TapResponse::from(&entry))
        }
        TapRecord::RoundNotFound => Err(ServiceError::NotFound(format!(
            "round `{round_id}` not found"
        ))),
        TapRecord::NotActive(status) => {
            debug!(%round_id, user_id = %participant.id, ?status, "tap rejected");
            Err(ServiceError::Rejected { round_id, status })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use futures::future::join_all;

    use super::*;
    use crate::{
        clock::{Clock, ManualClock},
        config::AppConfig,
        dao::round_store::{RoundStore, memory::MemoryRoundStore},
        state::{AppState, round::RoundStatus, scoring::UserRole},
    };

    const COOLDOWN: Duration = Duration::from_secs(30);
    const ROUND: Duration = Duration::from_secs(60);

    struct Harness {
        state: SharedState,
        clock: Arc<ManualClock>,
        store: Arc<dyn RoundStore>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        ));
        let store: Arc<dyn RoundStore> = Arc::new(MemoryRoundStore::new(clock.clone()));
        let config = AppConfig {
            cooldown_duration: COOLDOWN,
            round_duration: ROUND,
            ..AppConfig::default()
        };
        let state = AppState::with_store(config, clock.clone(), store.clone());
        Harness {
            state,
            clock,
            store,
        }
    }

    fn player(id: &str, role: UserRole) -> Participant {
        Participant {
            id: id.into(),
            name: format!("{id}-name"),
            role,
        }
    }

    async fn active_round(h: &Harness) -> Uuid {
        let round_id = create_round(&h.state).await.unwrap();
        h.clock.advance(COOLDOWN);
        round_id
    }

    #[tokio::test]
    async fn created_round_is_scheduled_after_cooldown() {
        let h = harness();
        let created_at = h.clock.now();
        let round_id = create_round(&h.state).await.unwrap();

        let stored = h.store.find_round(round_id).await.unwrap().unwrap();
        assert_eq!(stored.start_time, created_at + COOLDOWN);
        assert_eq!(stored.end_time, created_at + COOLDOWN + ROUND);
        assert_eq!(stored.status, RoundStatus::Cooldown);

        let view = get_round(&h.state, round_id, None).await.unwrap();
        assert_eq!(view.status, RoundStatus::Cooldown);
    }

    #[tokio::test]
    async fn views_follow_the_clock_without_a_sweep() {
        let h = harness();
        let round_id = create_round(&h.state).await.unwrap();

        h.clock.advance(COOLDOWN);
        assert_eq!(
            get_round(&h.state, round_id, None).await.unwrap().status,
            RoundStatus::Active
        );

        h.clock.advance(ROUND + Duration::from_secs(1));
        assert_eq!(
            get_round(&h.state, round_id, None).await.unwrap().status,
            RoundStatus::Finished
        );
    }

    #[tokio::test]
    async fn list_is_newest_first_and_annotated_per_viewer() {
        let h = harness();
        let first = create_round(&h.state).await.unwrap();
        h.clock.advance(Duration::from_secs(1));
        let second = create_round(&h.state).await.unwrap();
        h.clock.advance(COOLDOWN);

        tap(&h.state, first, &player("u1", UserRole::Survivor))
            .await
            .unwrap();

        let views = list_rounds(&h.state, Some("u1")).await.unwrap();
        let ids: Vec<Uuid> = views.iter().map(|view| view.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(views[0].my_taps, None);
        assert_eq!(views[1].my_taps, Some(1));
        assert_eq!(views[1].my_score, Some(1));

        let anonymous = list_rounds(&h.state, None).await.unwrap();
        assert!(anonymous.iter().all(|view| view.my_score.is_none()));
    }

    #[tokio::test]
    async fn unknown_round_is_not_found() {
        let h = harness();
        let missing = Uuid::new_v4();
        assert!(matches!(
            get_round(&h.state, missing, Some("u1")).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            tap(&h.state, missing, &player("u1", UserRole::Survivor)).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn unparsable_round_ids_name_no_round() {
        assert!(matches!(
            parse_round_id("not-a-uuid"),
            Err(ServiceError::NotFound(_))
        ));
        let id = Uuid::new_v4();
        assert_eq!(parse_round_id(&id.to_string()).unwrap(), id);
    }

    #[tokio::test]
    async fn eleven_taps_score_twenty() {
        let h = harness();
        let round_id = active_round(&h).await;
        let user = player("u1", UserRole::Survivor);

        let mut last = None;
        for _ in 0..22 {
            let response = tap(&h.state, round_id, &user).await.unwrap();
            if response.my_taps == 11 {
                assert_eq!(response.my_score, 20);
            }
            last = Some(response);
        }
        assert_eq!(
            last,
            Some(TapResponse {
                my_score: 40,
                my_taps: 22
            })
        );

        let view = get_round(&h.state, round_id, Some("u1")).await.unwrap();
        assert_eq!(view.total_score, 40);
        assert_eq!(view.my_score, Some(40));
    }

    #[tokio::test]
    async fn exempt_role_never_moves_the_aggregate() {
        let h = harness();
        let round_id = active_round(&h).await;
        let nikita = player("n1", UserRole::Nikita);

        for n in 1..=15 {
            let response = tap(&h.state, round_id, &nikita).await.unwrap();
            assert_eq!(response.my_taps, n);
            assert_eq!(response.my_score, 0);
        }

        let view = get_round(&h.state, round_id, Some("n1")).await.unwrap();
        assert_eq!(view.total_score, 0);
        assert_eq!(view.my_taps, Some(15));
    }

    #[tokio::test]
    async fn taps_outside_the_window_are_rejected_without_side_effects() {
        let h = harness();
        let round_id = create_round(&h.state).await.unwrap();
        let user = player("u1", UserRole::Survivor);

        assert!(matches!(
            tap(&h.state, round_id, &user).await,
            Err(ServiceError::Rejected {
                status: RoundStatus::Cooldown,
                ..
            })
        ));

        h.clock.advance(COOLDOWN);
        tap(&h.state, round_id, &user).await.unwrap();
        let before = get_round(&h.state, round_id, Some("u1")).await.unwrap();

        h.clock.advance(ROUND + Duration::from_millis(1));
        assert!(matches!(
            tap(&h.state, round_id, &user).await,
            Err(ServiceError::Rejected {
                status: RoundStatus::Finished,
                ..
            })
        ));

        let after = get_round(&h.state, round_id, Some("u1")).await.unwrap();
        assert_eq!(after.total_score, before.total_score);
        assert_eq!(after.my_taps, before.my_taps);
        assert_eq!(after.my_score, before.my_score);
    }

    #[tokio::test]
    async fn tap_on_the_last_instant_counts() {
        let h = harness();
        let round_id = active_round(&h).await;
        h.clock.advance(ROUND);

        let response = tap(&h.state, round_id, &player("u1", UserRole::Survivor))
            .await
            .unwrap();
        assert_eq!(response.my_taps, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_taps_by_one_user_are_never_lost() {
        let h = harness();
        let round_id = active_round(&h).await;
        const K: u64 = 200;

        let handles = (0..K).map(|_| {
            let state = h.state.clone();
            tokio::spawn(async move {
                tap(&state, round_id, &player("u1", UserRole::Survivor)).await
            })
        });
        for outcome in join_all(handles).await {
            outcome.unwrap().unwrap();
        }

        let view = get_round(&h.state, round_id, Some("u1")).await.unwrap();
        assert_eq!(view.my_taps, Some(K));
        assert_eq!(view.my_score, Some(K + 9 * (K / 11)));
        assert_eq!(view.total_score, K + 9 * (K / 11));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn aggregate_matches_sum_of_scoring_ledgers_under_concurrency() {
        let h = harness();
        let round_id = active_round(&h).await;
        let players = [
            player("a", UserRole::Survivor),
            player("b", UserRole::Admin),
            player("c", UserRole::Survivor),
            player("n", UserRole::Nikita),
        ];

        let mut handles = Vec::new();
        for participant in &players {
            for _ in 0..37 {
                let state = h.state.clone();
                let participant = participant.clone();
                handles.push(tokio::spawn(async move {
                    tap(&state, round_id, &participant).await
                }));
            }
        }
        for outcome in join_all(handles).await {
            outcome.unwrap().unwrap();
        }

        let mut scoring_sum = 0;
        for participant in &players {
            let entry = h
                .store
                .find_result(round_id, participant.id.clone())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.taps, 37);
            if !participant.role.is_scoring_exempt() {
                scoring_sum += entry.score;
            }
        }

        let view = get_round(&h.state, round_id, None).await.unwrap();
        assert_eq!(view.total_score, scoring_sum);
        assert_eq!(scoring_sum, 3 * (37 + 9 * 3));
    }

    #[tokio::test]
    async fn degraded_state_refuses_operations() {
        let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
        let state = AppState::new(AppConfig::default(), clock);
        assert!(matches!(
            create_round(&state).await,
            Err(ServiceError::Degraded)
        ));
        assert!(matches!(
            list_rounds(&state, None).await,
            Err(ServiceError::Degraded)
        ));
    }
}
