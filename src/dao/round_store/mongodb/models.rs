use mongodb::bson::{Bson, DateTime, Document, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::{
    dao::models::{RoundEntity, RoundResultEntity, WinnerEntity},
    state::round::RoundStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoundDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_at: DateTime,
    pub start_time: DateTime,
    pub end_time: DateTime,
    pub status: RoundStatus,
    pub total_score: i64,
    #[serde(default)]
    pub winner: Option<MongoWinnerDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoWinnerDocument {
    pub user_id: String,
    pub user_name: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoResultDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub round_id: String,
    pub user_id: String,
    pub user_name: String,
    pub taps: i64,
    pub score: i64,
    pub created_at: DateTime,
}

impl From<RoundEntity> for MongoRoundDocument {
    fn from(value: RoundEntity) -> Self {
        Self {
            id: value.id.to_string(),
            created_at: DateTime::from_system_time(value.created_at),
            start_time: DateTime::from_system_time(value.start_time),
            end_time: DateTime::from_system_time(value.end_time),
            status: value.status,
            total_score: to_i64(value.total_score),
            winner: value.winner.map(Into::into),
        }
    }
}

impl TryFrom<MongoRoundDocument> for RoundEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRoundDocument) -> Result<Self, Self::Error> {
        let id = parse_uuid(&value.id)?;
        Ok(Self {
            id,
            created_at: value.created_at.to_system_time(),
            start_time: value.start_time.to_system_time(),
            end_time: value.end_time.to_system_time(),
            status: value.status,
            total_score: to_u64(value.total_score),
            winner: value.winner.map(Into::into),
        })
    }
}

impl From<WinnerEntity> for MongoWinnerDocument {
    fn from(value: WinnerEntity) -> Self {
        Self {
            user_id: value.user_id,
            user_name: value.user_name,
            score: to_i64(value.score),
        }
    }
}

impl From<MongoWinnerDocument> for WinnerEntity {
    fn from(value: MongoWinnerDocument) -> Self {
        Self {
            user_id: value.user_id,
            user_name: value.user_name,
            score: to_u64(value.score),
        }
    }
}

impl MongoResultDocument {
    /// Convert into an entity for a round whose identifier is already known.
    pub fn into_entity(self, round_id: Uuid) -> RoundResultEntity {
        RoundResultEntity {
            round_id,
            user_id: self.user_id,
            user_name: self.user_name,
            taps: to_u64(self.taps),
            score: to_u64(self.score),
            created_at: self.created_at.to_system_time(),
        }
    }
}

impl TryFrom<MongoResultDocument> for RoundResultEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoResultDocument) -> Result<Self, Self::Error> {
        let round_id = parse_uuid(&value.round_id)?;
        Ok(value.into_entity(round_id))
    }
}

/// Embedded winner value written by the finalization update.
pub fn winner_bson(winner: Option<WinnerEntity>) -> Bson {
    match winner {
        Some(winner) => Bson::Document(doc! {
            "user_id": winner.user_id,
            "user_name": winner.user_name,
            "score": to_i64(winner.score),
        }),
        None => Bson::Null,
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn ledger_key(round_id: Uuid, user_id: &str) -> Document {
    doc! {"round_id": round_id.to_string(), "user_id": user_id}
}

pub fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn parse_uuid(raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::MalformedRound {
        id: raw.to_owned(),
        reason: err.to_string(),
    })
}
