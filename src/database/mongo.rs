//! MongoDB connection for the skin store.

use std::time::Duration;

use anyhow::{Context, Result};
use mongodb::bson::doc;
use mongodb::{Client, Collection, options::ClientOptions};
use tracing::info;

use super::skin_repository::StoredSkin;

/// Collection holding one document per owner key.
const SKINS_COLLECTION: &str = "skins";

/// Connected skin database.
#[derive(Debug, Clone)]
pub struct Database {
    db: mongodb::Database,
}

impl Database {
    /// Connect and ping before handing out the database.
    ///
    /// # Errors
    /// Returns error if the URI is malformed or the server is unreachable.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .context("parsing MONGODB_URI")?;
        options.app_name = Some("skinsync".to_string());
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("pinging MongoDB")?;

        info!("Successfully connected to MongoDB database {}", db_name);

        Ok(Self {
            db: client.database(db_name),
        })
    }

    /// The skin record collection.
    pub fn skins(&self) -> Collection<StoredSkin> {
        self.db.collection(SKINS_COLLECTION)
    }
}
