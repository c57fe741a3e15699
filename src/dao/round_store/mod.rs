pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::{error::Error as StdError, time::SystemTime};

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{Finalization, RoundEntity, RoundResultEntity, TapCommand, TapRecord};

/// Result alias for round store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure of a round store, whatever the backend.
///
/// Neither variant leaves a partial write behind; callers may retry.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("round store unavailable while trying to {operation}")]
    Unavailable {
        operation: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// The isolated tap or finalization unit kept colliding with concurrent writers.
    #[error("transaction aborted after {attempts} conflicting attempt(s)")]
    Contention { attempts: u32 },
}

impl StorageError {
    /// Wrap a backend failure raised while performing `operation`.
    pub fn unavailable(
        operation: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        StorageError::Unavailable {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

/// Abstraction over the persistence layer for rounds and their score ledger.
///
/// Stores own the clock. [`RoundStore::record_tap`] and [`RoundStore::finalize_round`] read
/// it inside their isolated unit, so a tap and the finalization of its round are always
/// ordered: either the tap is part of the recorded winner's ledger or it is rejected.
pub trait RoundStore: Send + Sync {
    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    /// All rounds, newest first by creation time.
    fn list_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;
    fn find_result(
        &self,
        round_id: Uuid,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoundResultEntity>>>;
    fn list_results_for_user(
        &self,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundResultEntity>>>;
    /// Apply one tap if the round is live and not yet finalized.
    ///
    /// The status check, the ledger step and the aggregate increment happen together or not
    /// at all, and concurrent taps on the same ledger entry are linearized.
    fn record_tap(&self, command: TapCommand) -> BoxFuture<'static, StorageResult<TapRecord>>;
    /// Move every due round from COOLDOWN to ACTIVE, returning how many moved.
    fn activate_due_rounds(&self, now: SystemTime) -> BoxFuture<'static, StorageResult<u64>>;
    /// Rounds whose end has passed but whose persisted status is not FINISHED yet.
    fn rounds_due_for_finalization(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;
    /// Pick the winner from the ledger and mark the round FINISHED, as one unit.
    ///
    /// The winner is the highest score, the earliest-created entry on ties. Rounds already
    /// finalized or not over yet are left untouched.
    fn finalize_round(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Finalization>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
