use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle phases of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    /// Scheduled; taps are not accepted yet.
    Cooldown,
    /// Taps are accepted.
    Active,
    /// The round is over; a winner may be recorded.
    Finished,
}

impl RoundStatus {
    /// Derive the status of a round from its boundaries at instant `now`.
    ///
    /// Both boundaries are inclusive for the active window: a tap landing exactly on
    /// `end_time` still counts.
    pub fn at(start_time: SystemTime, end_time: SystemTime, now: SystemTime) -> Self {
        if now < start_time {
            RoundStatus::Cooldown
        } else if now <= end_time {
            RoundStatus::Active
        } else {
            RoundStatus::Finished
        }
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Cooldown => "COOLDOWN",
            RoundStatus::Active => "ACTIVE",
            RoundStatus::Finished => "FINISHED",
        }
    }

    /// Validate a forward move of the persisted status.
    ///
    /// Persisted status only ever moves COOLDOWN → ACTIVE → FINISHED. Skipping ACTIVE is
    /// allowed because a round can end between two sweeps.
    pub fn advance(self, next: RoundStatus) -> Result<RoundStatus, InvalidTransition> {
        if next > self {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

/// Raised when a persisted status change would not move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid round transition: {from:?} cannot move to {to:?}")]
pub struct InvalidTransition {
    /// Status currently persisted.
    pub from: RoundStatus,
    /// Requested status.
    pub to: RoundStatus,
}
