// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MongoDB backend.
//!
//! Each [`Update`] becomes one `update_one` call with `upsert` enabled, so
//! MongoDB seeds a missing document from the equality fields of the filter.
//! Each [`IndexModel`] becomes a `create_index` call, which MongoDB treats
//! as a no-op when an identical index exists.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use devstate_bridge::store::MongoStore;
//! use devstate_bridge::transport::MqttBridge;
//!
//! # async fn example() -> devstate_bridge::Result<()> {
//! let store = MongoStore::connect("mongodb://localhost:27017", "tplink").await?;
//! let _bridge = MqttBridge::builder()
//!     .host("192.168.1.50")
//!     .build(Arc::new(store))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use mongodb::bson::{self, Document as BsonDocument, doc};
use mongodb::error::ErrorKind;
use mongodb::{Client, Collection, Database};

use super::{Document, DocumentStore, IndexModel, Update};
use crate::error::StoreError;

/// [`DocumentStore`] writing to a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Creates a store writing to `database`.
    #[must_use]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Creates a store for the database `name` on the deployment at `uri`.
    ///
    /// The driver connects lazily, so an unreachable server is reported by
    /// the first write rather than here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if `uri` is not a valid
    /// connection string.
    pub async fn connect(uri: &str, name: &str) -> crate::Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(database = %name, "Using MongoDB document store");
        Ok(Self::new(client.database(name)))
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn upsert(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
    ) -> Result<(), StoreError> {
        let filter = to_bson(collection, &filter)?;
        let update = update_document(collection, &update)?;

        self.collection(collection)
            .update_one(filter, update)
            .upsert(true)
            .await
            .map_err(|e| store_error(collection, &e))?;
        Ok(())
    }

    async fn ensure_index(&self, collection: &str, index: IndexModel) -> Result<(), StoreError> {
        self.collection(collection)
            .create_index(index_model(&index))
            .await
            .map_err(|e| store_error(collection, &e))?;
        Ok(())
    }
}

fn to_bson(collection: &str, document: &Document) -> Result<BsonDocument, StoreError> {
    bson::to_document(document).map_err(|e| StoreError::Rejected {
        collection: collection.to_string(),
        message: e.to_string(),
    })
}

/// Renders `update` for `update_one`.
///
/// The driver refuses an update document without operators, so an empty
/// update is sent as an empty `$push`.
fn update_document(collection: &str, update: &Update) -> Result<BsonDocument, StoreError> {
    if update.is_empty() {
        return Ok(doc! { "$push": {} });
    }
    to_bson(collection, &update.to_document())
}

fn index_model(index: &IndexModel) -> mongodb::IndexModel {
    let mut keys = BsonDocument::new();
    for key in index.keys() {
        keys.insert(key.as_str(), 1_i32);
    }
    mongodb::IndexModel::builder().keys(keys).build()
}

fn store_error(collection: &str, error: &mongodb::error::Error) -> StoreError {
    match error.kind.as_ref() {
        ErrorKind::Write(_) | ErrorKind::InvalidArgument { .. } => StoreError::Rejected {
            collection: collection.to_string(),
            message: error.to_string(),
        },
        _ => StoreError::Unavailable(error.to_string()),
    }
}
