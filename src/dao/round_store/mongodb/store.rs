use std::{future::Future, sync::Arc, time::Duration, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{DateTime, doc},
    error::{
        Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT, WriteFailure,
    },
    options::IndexOptions,
};
use tokio::{sync::RwLock, time::sleep};
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoResultDocument, MongoRoundDocument, doc_id, ledger_key, to_i64, winner_bson,
    },
};
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

const ROUND_COLLECTION_NAME: &str = "rounds";
const RESULT_COLLECTION_NAME: &str = "round_results";
/// Upper bound on attempts for a single tap or finalization transaction.
const MAX_TRANSACTION_ATTEMPTS: u32 = 8;
const MAX_COMMIT_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(5);
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed store. Taps and finalizations run inside multi-document transactions, which
/// requires the server to be a replica set member.
///
/// Both transactions write the round document, so a tap and the finalization of its round
/// always conflict and one of them retries against the other's outcome.
#[derive(Clone)]
pub struct MongoRoundStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    clock: Arc<dyn Clock>,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = self.config.open().await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRoundStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig, clock: Arc<dyn Clock>) -> MongoResult<Self> {
        let (client, database) = config.open().await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
            clock,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let rounds = self.rounds().await;
        let created_index = IndexModel::builder()
            .keys(doc! {"created_at": -1})
            .options(
                IndexOptions::builder()
                    .name(Some("round_created_idx".to_owned()))
                    .build(),
            )
            .build();
        rounds
            .create_index(created_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROUND_COLLECTION_NAME,
                index: "created_at",
                source,
            })?;

        // One ledger entry per (round, user).
        let results = self.results().await;
        let ledger_index = IndexModel::builder()
            .keys(doc! {"round_id": 1, "user_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("round_user_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        results
            .create_index(ledger_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: RESULT_COLLECTION_NAME,
                index: "round_id,user_id",
                source,
            })?;

        let standings_index = IndexModel::builder()
            .keys(doc! {"round_id": 1, "score": -1, "created_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("round_standings_idx".to_owned()))
                    .build(),
            )
            .build();
        results
            .create_index(standings_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: RESULT_COLLECTION_NAME,
                index: "round_id,score,created_at",
                source,
            })?;

        let user_index = IndexModel::builder()
            .keys(doc! {"user_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("result_user_idx".to_owned()))
                    .build(),
            )
            .build();
        results
            .create_index(user_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: RESULT_COLLECTION_NAME,
                index: "user_id",
                source,
            })?;

        Ok(())
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn rounds(&self) -> Collection<MongoRoundDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoRoundDocument>(ROUND_COLLECTION_NAME)
    }

    async fn results(&self) -> Collection<MongoResultDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoResultDocument>(RESULT_COLLECTION_NAME)
    }

    async fn insert_round(&self, round: RoundEntity) -> MongoResult<()> {
        let id = round.id;
        let document: MongoRoundDocument = round.into();
        self.rounds()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveRound { id, source })?;
        Ok(())
    }

    async fn find_round(&self, id: Uuid) -> MongoResult<Option<RoundEntity>> {
        let document = self
            .rounds()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadRound { id, source })?;

        document.map(RoundEntity::try_from).transpose()
    }

    async fn list_rounds(&self) -> MongoResult<Vec<RoundEntity>> {
        let documents: Vec<MongoRoundDocument> = self
            .rounds()
            .await
            .find(doc! {})
            .sort(doc! {"created_at": -1, "_id": -1})
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?;

        documents.into_iter().map(RoundEntity::try_from).collect()
    }

    async fn find_result(
        &self,
        round_id: Uuid,
        user_id: &str,
    ) -> MongoResult<Option<RoundResultEntity>> {
        let document = self
            .results()
            .await
            .find_one(ledger_key(round_id, user_id))
            .await
            .map_err(|source| MongoDaoError::LoadResults { round_id, source })?;

        Ok(document.map(|document| document.into_entity(round_id)))
    }

    async fn list_results_for_user(&self, user_id: &str) -> MongoResult<Vec<RoundResultEntity>> {
        let documents: Vec<MongoResultDocument> = self
            .results()
            .await
            .find(doc! {"user_id": user_id})
            .await
            .map_err(|source| MongoDaoError::ListUserResults {
                user_id: user_id.to_owned(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListUserResults {
                user_id: user_id.to_owned(),
                source,
            })?;

        documents
            .into_iter()
            .map(RoundResultEntity::try_from)
            .collect()
    }

    async fn record_tap(&self, command: TapCommand) -> MongoResult<TapRecord> {
        let round_id = command.round_id;
        self.run_transaction("tap", round_id, |mut session| {
            let store = self.clone();
            let command = command.clone();
            async move {
                session.start_transaction().await?;
                let outcome = store.apply_tap(&mut session, &command).await;
                settle(&mut session, outcome).await
            }
        })
        .await
    }

    /// Returns the record and whether the transaction must commit.
    async fn apply_tap(
        &self,
        session: &mut ClientSession,
        command: &TapCommand,
    ) -> Result<(TapRecord, bool), MongoError> {
        let rounds = self.rounds().await;
        let results = self.results().await;
        let round_id = command.round_id;

        let Some(round) = rounds
            .find_one(doc_id(round_id))
            .session(&mut *session)
            .await?
        else {
            return Ok((TapRecord::RoundNotFound, false));
        };
        if round.status == RoundStatus::Finished {
            return Ok((TapRecord::NotActive(RoundStatus::Finished), false));
        }

        let now = self.inner.clock.now();
        let status = RoundStatus::at(
            round.start_time.to_system_time(),
            round.end_time.to_system_time(),
            now,
        );
        if status != RoundStatus::Active {
            return Ok((TapRecord::NotActive(status), false));
        }

        let key = ledger_key(round_id, &command.user_id);
        let mut entry = match results
            .find_one(key.clone())
            .session(&mut *session)
            .await?
        {
            Some(document) => document.into_entity(round_id),
            None => RoundResultEntity::empty(
                round_id,
                command.user_id.clone(),
                command.user_name.clone(),
                now,
            ),
        };

        let increase = scoring::apply_tap(&mut entry, command.role);

        results
            .update_one(
                key,
                doc! {
                    "$set": {"taps": to_i64(entry.taps), "score": to_i64(entry.score)},
                    "$setOnInsert": {
                        "user_name": entry.user_name.as_str(),
                        "created_at": DateTime::from_system_time(entry.created_at),
                    },
                },
            )
            .upsert(true)
            .session(&mut *session)
            .await?;

        // Written even for exempt taps: the round document is the conflict point with finalization.
        let mut filter = doc_id(round_id);
        filter.insert("status", doc! {"$ne": RoundStatus::Finished.as_str()});
        let touched = rounds
            .update_one(
                filter,
                doc! {"$inc": {"total_score": to_i64(increase), "tap_count": 1_i64}},
            )
            .session(&mut *session)
            .await?;
        if touched.matched_count == 0 {
            return Ok((TapRecord::NotActive(RoundStatus::Finished), false));
        }

        Ok((TapRecord::Recorded(entry), true))
    }

    async fn activate_due_rounds(&self, now: SystemTime) -> MongoResult<u64> {
        let now = DateTime::from_system_time(now);
        let result = self
            .rounds()
            .await
            .update_many(
                doc! {
                    "status": RoundStatus::Cooldown.as_str(),
                    "start_time": {"$lte": now},
                    "end_time": {"$gte": now},
                },
                doc! {"$set": {"status": RoundStatus::Active.as_str()}},
            )
            .await
            .map_err(|source| MongoDaoError::UpdateStatuses { source })?;

        Ok(result.modified_count)
    }

    async fn rounds_due_for_finalization(&self, now: SystemTime) -> MongoResult<Vec<RoundEntity>> {
        let documents: Vec<MongoRoundDocument> = self
            .rounds()
            .await
            .find(doc! {
                "end_time": {"$lt": DateTime::from_system_time(now)},
                "status": {"$ne": RoundStatus::Finished.as_str()},
            })
            .await
            .map_err(|source| MongoDaoError::UpdateStatuses { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::UpdateStatuses { source })?;

        documents.into_iter().map(RoundEntity::try_from).collect()
    }

    async fn finalize_round(&self, id: Uuid) -> MongoResult<Finalization> {
        self.run_transaction("finalize", id, |mut session| {
            let store = self.clone();
            async move {
                session.start_transaction().await?;
                let outcome = store.apply_finalization(&mut session, id).await;
                settle(&mut session, outcome).await
            }
        })
        .await
    }

    async fn apply_finalization(
        &self,
        session: &mut ClientSession,
        id: Uuid,
    ) -> Result<(Finalization, bool), MongoError> {
        let rounds = self.rounds().await;
        let Some(round) = rounds.find_one(doc_id(id)).session(&mut *session).await? else {
            return Ok((Finalization::Unchanged, false));
        };
        let live = RoundStatus::at(
            round.start_time.to_system_time(),
            round.end_time.to_system_time(),
            self.inner.clock.now(),
        );
        if round.status == RoundStatus::Finished || live != RoundStatus::Finished {
            return Ok((Finalization::Unchanged, false));
        }

        let winner = self
            .results()
            .await
            .find_one(doc! {"round_id": id.to_string()})
            .sort(doc! {"score": -1, "created_at": 1, "_id": 1})
            .session(&mut *session)
            .await?
            .map(|document| WinnerEntity::from(document.into_entity(id)));

        let mut filter = doc_id(id);
        filter.insert("status", doc! {"$ne": RoundStatus::Finished.as_str()});
        let updated = rounds
            .update_one(
                filter,
                doc! {"$set": {
                    "status": RoundStatus::Finished.as_str(),
                    "winner": winner_bson(winner.clone()),
                }},
            )
            .session(&mut *session)
            .await?;

        if updated.matched_count == 0 {
            return Ok((Finalization::Unchanged, false));
        }
        Ok((Finalization::Finalized(winner), true))
    }

    /// Run `attempt` on fresh sessions until it succeeds or stops colliding.
    async fn run_transaction<T, F, Fut>(
        &self,
        operation: &'static str,
        round_id: Uuid,
        mut attempt: F,
    ) -> MongoResult<T>
    where
        F: FnMut(ClientSession) -> Fut,
        Fut: Future<Output = Result<T, MongoError>>,
    {
        let client = self.client().await;
        let mut delay = RETRY_BASE_DELAY;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let session = client
                .start_session()
                .await
                .map_err(|source| MongoDaoError::Transaction {
                    operation,
                    round_id,
                    source,
                })?;

            match attempt(session).await {
                Ok(value) => return Ok(value),
                Err(source) if is_retryable(&source) => {
                    if attempts >= MAX_TRANSACTION_ATTEMPTS {
                        return Err(MongoDaoError::Contention {
                            operation,
                            round_id,
                            attempts,
                            source,
                        });
                    }
                    debug!(%round_id, operation, attempts, error = %source, "transaction conflicted; retrying");
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(source) => {
                    return Err(MongoDaoError::Transaction {
                        operation,
                        round_id,
                        source,
                    });
                }
            }
        }
    }
}

/// Commit or abort depending on the outcome of the transaction body.
async fn settle<T>(
    session: &mut ClientSession,
    outcome: Result<(T, bool), MongoError>,
) -> Result<T, MongoError> {
    match outcome {
        Ok((value, true)) => {
            commit(session).await?;
            Ok(value)
        }
        Ok((value, false)) => {
            session.abort_transaction().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = session.abort_transaction().await {
                debug!(error = %abort_err, "failed to abort transaction");
            }
            Err(err)
        }
    }
}

async fn commit(session: &mut ClientSession) -> Result<(), MongoError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(err)
                if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempts < MAX_COMMIT_ATTEMPTS =>
            {
                debug!(attempts, error = %err, "commit outcome unknown; retrying commit");
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_retryable(err: &MongoError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR) || is_duplicate_key(err)
}

/// Two first taps racing on the unique ledger index.
fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

impl RoundStore for MongoRoundStore {
    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_round(round).await.map_err(Into::into) })
    }

    fn find_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_round(id).await.map_err(Into::into) })
    }

    fn list_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_rounds().await.map_err(Into::into) })
    }

    fn find_result(
        &self,
        round_id: Uuid,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoundResultEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_result(round_id, &user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_results_for_user(
        &self,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundResultEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_results_for_user(&user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn record_tap(&self, command: TapCommand) -> BoxFuture<'static, StorageResult<TapRecord>> {
        let store = self.clone();
        Box::pin(async move { store.record_tap(command).await.map_err(Into::into) })
    }

    fn activate_due_rounds(&self, now: SystemTime) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.activate_due_rounds(now).await.map_err(Into::into) })
    }

    fn rounds_due_for_finalization(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rounds_due_for_finalization(now)
                .await
                .map_err(Into::into)
        })
    }

    fn finalize_round(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Finalization>> {
        let store = self.clone();
        Box::pin(async move { store.finalize_round(round_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
