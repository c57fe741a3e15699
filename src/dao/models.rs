use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::{round::RoundStatus, scoring::UserRole};

/// Round record persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    /// Stable identifier for the round.
    pub id: Uuid,
    /// Creation timestamp, used to order listings newest-first.
    pub created_at: SystemTime,
    /// First instant at which taps are accepted.
    pub start_time: SystemTime,
    /// Last instant at which taps are accepted.
    pub end_time: SystemTime,
    /// Persisted status kept in sync by the sweeper. Read paths derive status live instead.
    pub status: RoundStatus,
    /// Sum of every scored tap of the round.
    pub total_score: u64,
    /// Winner recorded at finalization, if anybody tapped.
    pub winner: Option<WinnerEntity>,
}

impl RoundEntity {
    /// Build a fresh round in cooldown.
    pub fn scheduled(created_at: SystemTime, start_time: SystemTime, end_time: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            start_time,
            end_time,
            status: RoundStatus::Cooldown,
            total_score: 0,
            winner: None,
        }
    }

    /// Status derived from the round boundaries at `now`.
    pub fn status_at(&self, now: SystemTime) -> RoundStatus {
        RoundStatus::at(self.start_time, self.end_time, now)
    }
}

/// Winner triple written once when a round is finalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WinnerEntity {
    /// Identifier of the winning user.
    pub user_id: String,
    /// Display name of the winning user at the time of their first tap.
    pub user_name: String,
    /// Final score of the winning user.
    pub score: u64,
}

/// Per-user, per-round ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundResultEntity {
    /// Round the entry belongs to.
    pub round_id: Uuid,
    /// User the entry belongs to.
    pub user_id: String,
    /// Display name captured when the entry was created.
    pub user_name: String,
    /// Number of accepted taps.
    pub taps: u64,
    /// Score accumulated over those taps.
    pub score: u64,
    /// Creation timestamp; ties on score go to the earliest entry.
    pub created_at: SystemTime,
}

impl RoundResultEntity {
    /// Empty ledger entry created lazily on a user's first accepted tap.
    pub fn empty(round_id: Uuid, user_id: String, user_name: String, created_at: SystemTime) -> Self {
        Self {
            round_id,
            user_id,
            user_name,
            taps: 0,
            score: 0,
            created_at,
        }
    }
}

impl From<RoundResultEntity> for WinnerEntity {
    fn from(value: RoundResultEntity) -> Self {
        Self {
            user_id: value.user_id,
            user_name: value.user_name,
            score: value.score,
        }
    }
}

/// Everything a store needs to apply one tap atomically.
///
/// Carries no timestamp: the store reads its clock inside the isolated unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapCommand {
    /// Round being tapped.
    pub round_id: Uuid,
    /// Tapping user.
    pub user_id: String,
    /// Display name of the tapping user.
    pub user_name: String,
    /// Role of the tapping user, deciding whether the tap scores.
    pub role: UserRole,
}

/// Outcome of [`crate::dao::round_store::RoundStore::record_tap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapRecord {
    /// The tap was counted; carries the updated ledger entry.
    Recorded(RoundResultEntity),
    /// No round with the requested identifier exists.
    RoundNotFound,
    /// The round exists but is not accepting taps; nothing was written.
    NotActive(RoundStatus),
}

/// Outcome of [`crate::dao::round_store::RoundStore::finalize_round`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// The round moved to FINISHED with this winner (none when nobody scored a tap).
    Finalized(Option<WinnerEntity>),
    /// Nothing changed: the round is unknown, already finalized, or still open.
    Unchanged,
}
