//! Process-local round store.
//!
//! Each round owns a single lock guarding both the round record and its ledger, so a tap is
//! one critical section: clock read, status check, ledger step and aggregate increment.
//! Finalization takes the same lock, so no tap lands between picking the winner and
//! closing the round.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    clock::Clock,
    dao::{
        models::{
            Finalization, RoundEntity, RoundResultEntity, TapCommand, TapRecord, WinnerEntity,
        },
        round_store::{RoundStore, StorageResult},
    },
    state::{round::RoundStatus, scoring},
};

#[derive(Clone)]
pub struct MemoryRoundStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    rounds: DashMap<Uuid, Arc<Mutex<RoundSlot>>>,
    sequence: AtomicU64,
    clock: Arc<dyn Clock>,
}

struct RoundSlot {
    /// Insertion order, breaking ties between rounds created at the same instant.
    sequence: u64,
    round: RoundEntity,
    /// Ledger keyed by user id, in creation order.
    results: IndexMap<String, RoundResultEntity>,
}

impl MemoryRoundStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                rounds: DashMap::new(),
                sequence: AtomicU64::new(0),
                clock,
            }),
        }
    }

    fn slot(&self, id: Uuid) -> Option<Arc<Mutex<RoundSlot>>> {
        self.inner.rounds.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot the slot handles so no map shard stays locked across an await.
    fn slots(&self) -> Vec<Arc<Mutex<RoundSlot>>> {
        self.inner
            .rounds
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn insert_round(&self, round: RoundEntity) {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let slot = RoundSlot {
            sequence,
            round: round.clone(),
            results: IndexMap::new(),
        };
        self.inner.rounds.insert(round.id, Arc::new(Mutex::new(slot)));
    }

    async fn find_round(&self, id: Uuid) -> Option<RoundEntity> {
        let slot = self.slot(id)?;
        let guard = slot.lock().await;
        Some(guard.round.clone())
    }

    async fn list_rounds(&self) -> Vec<RoundEntity> {
        let mut rounds = Vec::new();
        for slot in self.slots() {
            let guard = slot.lock().await;
            rounds.push((guard.round.created_at, guard.sequence, guard.round.clone()));
        }
        rounds.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        rounds.into_iter().map(|(_, _, round)| round).collect()
    }

    async fn find_result(&self, round_id: Uuid, user_id: &str) -> Option<RoundResultEntity> {
        let slot = self.slot(round_id)?;
        let guard = slot.lock().await;
        guard.results.get(user_id).cloned()
    }

    async fn list_results_for_user(&self, user_id: &str) -> Vec<RoundResultEntity> {
        let mut results = Vec::new();
        for slot in self.slots() {
            let guard = slot.lock().await;
            if let Some(result) = guard.results.get(user_id) {
                results.push(result.clone());
            }
        }
        results
    }

    async fn record_tap(&self, command: TapCommand) -> TapRecord {
        let Some(slot) = self.slot(command.round_id) else {
            return TapRecord::RoundNotFound;
        };
        let mut guard = slot.lock().await;
        let RoundSlot { round, results, .. } = &mut *guard;

        if round.status == RoundStatus::Finished {
            return TapRecord::NotActive(RoundStatus::Finished);
        }
        let now = self.inner.clock.now();
        let status = round.status_at(now);
        if status != RoundStatus::Active {
            return TapRecord::NotActive(status);
        }

        let entry = results.entry(command.user_id.clone()).or_insert_with(|| {
            RoundResultEntity::empty(command.round_id, command.user_id, command.user_name, now)
        });
        let increase = scoring::apply_tap(entry, command.role);
        round.total_score += increase;

        TapRecord::Recorded(entry.clone())
    }

    async fn activate_due_rounds(&self, now: SystemTime) -> u64 {
        let mut activated = 0;
        for slot in self.slots() {
            let mut guard = slot.lock().await;
            let round = &mut guard.round;
            if round.status == RoundStatus::Cooldown && round.status_at(now) == RoundStatus::Active
            {
                round.status = RoundStatus::Active;
                activated += 1;
            }
        }
        activated
    }

    async fn rounds_due_for_finalization(&self, now: SystemTime) -> Vec<RoundEntity> {
        let mut due = Vec::new();
        for slot in self.slots() {
            let guard = slot.lock().await;
            if guard.round.end_time < now && guard.round.status != RoundStatus::Finished {
                due.push(guard.round.clone());
            }
        }
        due
    }

    async fn finalize_round(&self, round_id: Uuid) -> Finalization {
        let Some(slot) = self.slot(round_id) else {
            return Finalization::Unchanged;
        };
        let mut guard = slot.lock().await;
        if guard.round.status_at(self.inner.clock.now()) != RoundStatus::Finished {
            return Finalization::Unchanged;
        }
        let Ok(next) = guard.round.status.advance(RoundStatus::Finished) else {
            return Finalization::Unchanged;
        };

        let winner = scoring::pick_winner(guard.results.values())
            .cloned()
            .map(WinnerEntity::from);
        guard.round.status = next;
        guard.round.winner = winner.clone();
        Finalization::Finalized(winner)
    }
}

impl RoundStore for MemoryRoundStore {
    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.insert_round(round).await;
            Ok(())
        })
    }

    fn find_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_round(id).await) })
    }

    fn list_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.list_rounds().await) })
    }

    fn find_result(
        &self,
        round_id: Uuid,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoundResultEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_result(round_id, &user_id).await) })
    }

    fn list_results_for_user(
        &self,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundResultEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.list_results_for_user(&user_id).await) })
    }

    fn record_tap(&self, command: TapCommand) -> BoxFuture<'static, StorageResult<TapRecord>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.record_tap(command).await) })
    }

    fn activate_due_rounds(&self, now: SystemTime) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.activate_due_rounds(now).await) })
    }

    fn rounds_due_for_finalization(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.rounds_due_for_finalization(now).await) })
    }

    fn finalize_round(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Finalization>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.finalize_round(round_id).await) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{clock::ManualClock, state::scoring::UserRole};

    fn instant(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn round(created: u64, start: u64, end: u64) -> RoundEntity {
        RoundEntity::scheduled(instant(created), instant(start), instant(end))
    }

    fn store_at(secs: u64) -> (MemoryRoundStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(instant(secs)));
        (MemoryRoundStore::new(clock.clone()), clock)
    }

    fn tap(round_id: Uuid, user: &str, role: UserRole) -> TapCommand {
        TapCommand {
            round_id,
            user_id: user.into(),
            user_name: format!("{user}-name"),
            role,
        }
    }

    #[tokio::test]
    async fn lists_rounds_newest_first() {
        let (store, _) = store_at(0);
        let older = round(10, 20, 30);
        let newer = round(11, 21, 31);
        let same_instant = round(11, 21, 31);
        store.insert_round(older.clone()).await;
        store.insert_round(newer.clone()).await;
        store.insert_round(same_instant.clone()).await;

        let ids: Vec<Uuid> = store.list_rounds().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![same_instant.id, newer.id, older.id]);
    }

    #[tokio::test]
    async fn tap_outside_window_writes_nothing() {
        let (store, clock) = store_at(5);
        let r = round(0, 10, 20);
        store.insert_round(r.clone()).await;

        let early = store.record_tap(tap(r.id, "u1", UserRole::Survivor)).await;
        assert_eq!(early, TapRecord::NotActive(RoundStatus::Cooldown));
        clock.set(instant(21));
        let late = store.record_tap(tap(r.id, "u1", UserRole::Survivor)).await;
        assert_eq!(late, TapRecord::NotActive(RoundStatus::Finished));

        assert!(store.find_result(r.id, "u1").await.is_none());
        assert_eq!(store.find_round(r.id).await.unwrap().total_score, 0);
    }

    #[tokio::test]
    async fn tap_on_unknown_round_is_reported() {
        let (store, _) = store_at(5);
        let record = store
            .record_tap(tap(Uuid::new_v4(), "u1", UserRole::Survivor))
            .await;
        assert_eq!(record, TapRecord::RoundNotFound);
    }

    #[tokio::test]
    async fn tap_updates_ledger_and_aggregate_together() {
        let (store, _) = store_at(15);
        let r = round(0, 10, 20);
        store.insert_round(r.clone()).await;

        for _ in 0..11 {
            store.record_tap(tap(r.id, "u1", UserRole::Survivor)).await;
        }
        for _ in 0..4 {
            store.record_tap(tap(r.id, "n1", UserRole::Nikita)).await;
        }

        let survivor = store.find_result(r.id, "u1").await.unwrap();
        assert_eq!((survivor.taps, survivor.score), (11, 20));
        assert_eq!(survivor.user_name, "u1-name");
        assert_eq!(survivor.created_at, instant(15));
        let nikita = store.find_result(r.id, "n1").await.unwrap();
        assert_eq!((nikita.taps, nikita.score), (4, 0));
        assert_eq!(store.find_round(r.id).await.unwrap().total_score, 20);
    }

    #[tokio::test]
    async fn ledger_entries_are_stamped_when_created() {
        let (store, clock) = store_at(12);
        let r = round(0, 10, 20);
        store.insert_round(r.clone()).await;

        store.record_tap(tap(r.id, "a", UserRole::Survivor)).await;
        clock.set(instant(14));
        store.record_tap(tap(r.id, "a", UserRole::Survivor)).await;
        store.record_tap(tap(r.id, "b", UserRole::Survivor)).await;

        assert_eq!(store.find_result(r.id, "a").await.unwrap().created_at, instant(12));
        assert_eq!(store.find_result(r.id, "b").await.unwrap().created_at, instant(14));
    }

    #[tokio::test]
    async fn finalize_picks_the_winner_once() {
        let (store, clock) = store_at(15);
        let r = round(0, 10, 20);
        store.insert_round(r.clone()).await;
        store.record_tap(tap(r.id, "a", UserRole::Survivor)).await;
        store.record_tap(tap(r.id, "b", UserRole::Survivor)).await;
        store.record_tap(tap(r.id, "b", UserRole::Survivor)).await;

        assert_eq!(store.finalize_round(r.id).await, Finalization::Unchanged);

        clock.set(instant(21));
        let expected = WinnerEntity {
            user_id: "b".into(),
            user_name: "b-name".into(),
            score: 2,
        };
        assert_eq!(
            store.finalize_round(r.id).await,
            Finalization::Finalized(Some(expected.clone()))
        );
        assert_eq!(store.finalize_round(r.id).await, Finalization::Unchanged);

        let stored = store.find_round(r.id).await.unwrap();
        assert_eq!(stored.status, RoundStatus::Finished);
        assert_eq!(stored.winner, Some(expected));
    }

    #[tokio::test]
    async fn finalized_round_ignores_taps_inside_its_window() {
        let (store, clock) = store_at(15);
        let r = round(0, 10, 20);
        store.insert_round(r.clone()).await;
        store.record_tap(tap(r.id, "a", UserRole::Survivor)).await;

        clock.set(instant(21));
        assert!(matches!(
            store.finalize_round(r.id).await,
            Finalization::Finalized(Some(_))
        ));

        // A clock that still reads inside the window must not reopen the round.
        clock.set(instant(20));
        for role in [UserRole::Survivor, UserRole::Survivor, UserRole::Nikita] {
            let record = store.record_tap(tap(r.id, "b", role)).await;
            assert_eq!(record, TapRecord::NotActive(RoundStatus::Finished));
        }

        let stored = store.find_round(r.id).await.unwrap();
        assert_eq!(stored.total_score, 1);
        assert_eq!(stored.winner.map(|w| (w.user_id, w.score)), Some(("a".into(), 1)));
        assert!(store.find_result(r.id, "b").await.is_none());
    }

    #[tokio::test]
    async fn round_without_taps_finalizes_without_winner() {
        let (store, _) = store_at(30);
        let r = round(0, 10, 20);
        store.insert_round(r.clone()).await;
        assert_eq!(
            store.finalize_round(r.id).await,
            Finalization::Finalized(None)
        );
    }

    #[tokio::test]
    async fn activation_only_touches_due_cooldown_rounds() {
        let (store, _) = store_at(0);
        let due = round(0, 10, 20);
        let pending = round(0, 50, 60);
        let over = round(0, 1, 2);
        store.insert_round(due.clone()).await;
        store.insert_round(pending.clone()).await;
        store.insert_round(over.clone()).await;

        assert_eq!(store.activate_due_rounds(instant(15)).await, 1);
        assert_eq!(store.activate_due_rounds(instant(15)).await, 0);
        assert_eq!(
            store.find_round(due.id).await.unwrap().status,
            RoundStatus::Active
        );
        assert_eq!(
            store.find_round(pending.id).await.unwrap().status,
            RoundStatus::Cooldown
        );

        let ids: Vec<Uuid> = store
            .rounds_due_for_finalization(instant(15))
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![over.id]);
    }
}
