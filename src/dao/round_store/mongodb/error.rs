use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB server did not answer the initial ping")]
    Unreachable {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save round `{id}`")]
    SaveRound {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load round `{id}`")]
    LoadRound {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list rounds")]
    ListRounds {
        #[source]
        source: MongoError,
    },
    #[error("failed to load results for round `{round_id}`")]
    LoadResults {
        round_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list results of user `{user_id}`")]
    ListUserResults {
        user_id: String,
        #[source]
        source: MongoError,
    },
    #[error("{operation} on round `{round_id}` failed")]
    Transaction {
        operation: &'static str,
        round_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("{operation} on round `{round_id}` kept conflicting after {attempts} attempt(s)")]
    Contention {
        operation: &'static str,
        round_id: Uuid,
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("failed to update round statuses")]
    UpdateStatuses {
        #[source]
        source: MongoError,
    },
    #[error("stored document for round `{id}` is malformed: {reason}")]
    MalformedRound { id: String, reason: String },
}
