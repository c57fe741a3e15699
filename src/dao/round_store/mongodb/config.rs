use mongodb::{Client, Database, bson::doc, options::ClientOptions};

use super::error::{MongoDaoError, MongoResult};

/// Default database used when none is configured.
pub const DEFAULT_DATABASE_NAME: &str = "tap_rounds";

/// Parsed connection settings; reused on every reconnect.
#[derive(Clone)]
pub struct MongoConfig {
    options: ClientOptions,
    database_name: String,
}

impl MongoConfig {
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DATABASE_NAME).to_owned(),
        })
    }

    /// Open a client and check the server answers. Retrying is left to the storage supervisor.
    pub(super) async fn open(&self) -> MongoResult<(Client, Database)> {
        let client = Client::with_options(self.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&self.database_name);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::Unreachable { source })?;
        Ok((client, database))
    }
}
