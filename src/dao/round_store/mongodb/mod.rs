mod config;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoRoundStore;

use crate::dao::round_store::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Contention { attempts, .. } => StorageError::Contention { attempts },
            other => StorageError::unavailable("use MongoDB", other),
        }
    }
}
