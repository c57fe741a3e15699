use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{RoundEntity, RoundResultEntity},
    dto::format_system_time,
    state::round::RoundStatus,
};

/// Round as returned to clients, with status derived at request time.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub id: Uuid,
    /// RFC 3339 start of the active window.
    pub start_time: String,
    /// RFC 3339 end of the active window.
    pub end_time: String,
    pub status: RoundStatus,
    pub total_score: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_score: Option<u64>,
    /// Score of the requesting user, when they tapped this round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_score: Option<u64>,
    /// Taps of the requesting user, when they tapped this round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_taps: Option<u64>,
}

impl RoundView {
    /// Project a round at instant `now`, annotated with the viewer's ledger entry if any.
    pub fn build(round: RoundEntity, now: SystemTime, viewer: Option<&RoundResultEntity>) -> Self {
        let status = round.status_at(now);
        let (winner_id, winner_name, winner_score) = match round.winner {
            Some(winner) => (
                Some(winner.user_id),
                Some(winner.user_name),
                Some(winner.score),
            ),
            None => (None, None, None),
        };

        Self {
            id: round.id,
            start_time: format_system_time(round.start_time),
            end_time: format_system_time(round.end_time),
            status,
            total_score: round.total_score,
            winner_id,
            winner_name,
            winner_score,
            my_score: viewer.map(|entry| entry.score),
            my_taps: viewer.map(|entry| entry.taps),
        }
    }
}

/// Body of a tap submission.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TapRequest {
    /// Identifier returned by round creation. Unknown or malformed ids name no round.
    pub round_id: String,
}

/// Updated totals of the tapping user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TapResponse {
    pub my_score: u64,
    pub my_taps: u64,
}

impl From<&RoundResultEntity> for TapResponse {
    fn from(entry: &RoundResultEntity) -> Self {
        Self {
            my_score: entry.score,
            my_taps: entry.taps,
        }
    }
}

/// Acknowledgement of a round creation.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoundResponse {
    pub success: bool,
    pub round_id: Uuid,
    pub message: String,
}

impl CreateRoundResponse {
    pub fn created(round_id: Uuid) -> Self {
        Self {
            success: true,
            round_id,
            message: "Round created successfully".into(),
        }
    }
}
