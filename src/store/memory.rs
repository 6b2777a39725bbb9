// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process document store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{Document, DocumentStore, IndexModel, Update};
use crate::error::StoreError;

/// A [`DocumentStore`] holding every collection in memory.
///
/// Upserts follow Mongo's `updateOne(..., {upsert: true})` rules: the first
/// document whose fields equal every filter field is updated; otherwise a
/// new document is created from the filter fields, with a generated `_id`
/// when the filter does not name one. `$push` onto a field that holds
/// something other than an array is rejected without modifying the document.
///
/// Writes to a collection can be refused with
/// [`reject_writes`](Self::reject_writes) to exercise failure handling.
///
/// # Examples
///
/// ```
/// use devstate_bridge::store::{Document, DocumentStore, MemoryStore, Update};
/// use serde_json::json;
///
/// # async fn example() {
/// let store = MemoryStore::new();
/// let mut filter = Document::new();
/// filter.insert("_id".into(), json!("tplink_D1"));
///
/// store
///     .upsert("current_state", filter.clone(), Update::new().set("power", json!("on")))
///     .await
///     .unwrap();
///
/// let doc = store.find_one("current_state", &filter).unwrap();
/// assert_eq!(doc["power"], json!("on"));
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    rejected: RwLock<HashSet<String>>,
}

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexModel>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first document matching every field of `filter`.
    #[must_use]
    pub fn find_one(&self, collection: &str, filter: &Document) -> Option<Document> {
        let collections = self.collections.read();
        collections
            .get(collection)?
            .documents
            .iter()
            .find(|doc| matches(doc, filter))
            .cloned()
    }

    /// Returns a copy of every document in `collection`.
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Returns the indexes created on `collection`.
    #[must_use]
    pub fn indexes(&self, collection: &str) -> Vec<IndexModel> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    /// Makes every following write to `collection` fail.
    pub fn reject_writes(&self, collection: impl Into<String>) {
        self.rejected.write().insert(collection.into());
    }

    /// Lets writes to `collection` succeed again.
    pub fn accept_writes(&self, collection: &str) {
        self.rejected.write().remove(collection);
    }

    fn check_accepting(&self, collection: &str) -> Result<(), StoreError> {
        if self.rejected.read().contains(collection) {
            return Err(StoreError::Unavailable(format!(
                "collection {collection} is not accepting writes"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
    ) -> Result<(), StoreError> {
        self.check_accepting(collection)?;

        let mut collections = self.collections.write();
        let documents = &mut collections.entry(collection.to_string()).or_default().documents;

        match documents.iter().position(|doc| matches(doc, &filter)) {
            Some(index) => apply(collection, &mut documents[index], &update),
            None => {
                let mut doc = filter;
                doc.entry("_id")
                    .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
                apply(collection, &mut doc, &update)?;
                documents.push(doc);
                Ok(())
            }
        }
    }

    async fn ensure_index(&self, collection: &str, index: IndexModel) -> Result<(), StoreError> {
        self.check_accepting(collection)?;

        let mut collections = self.collections.write();
        let indexes = &mut collections.entry(collection.to_string()).or_default().indexes;
        if !indexes.contains(&index) {
            tracing::debug!(collection = %collection, keys = ?index.keys(), "Created index");
            indexes.push(index);
        }
        Ok(())
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

/// Applies an update, leaving `doc` untouched if any part is invalid.
fn apply(collection: &str, doc: &mut Document, update: &Update) -> Result<(), StoreError> {
    let reject = |message: String| StoreError::Rejected {
        collection: collection.to_string(),
        message,
    };

    if let Some(new_id) = update.set_fields().get("_id")
        && doc.get("_id") != Some(new_id)
    {
        return Err(reject("the _id field is immutable".to_string()));
    }

    for field in update.push_fields().keys() {
        if update.set_fields().contains_key(field) {
            return Err(reject(format!("conflicting $set and $push on {field}")));
        }
        if let Some(existing) = doc.get(field)
            && !existing.is_array()
        {
            return Err(reject(format!("cannot $push to non-array field {field}")));
        }
    }

    for (field, value) in update.set_fields() {
        doc.insert(field.clone(), value.clone());
    }
    for (field, value) in update.push_fields() {
        if let Value::Array(items) = doc
            .entry(field.clone())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            items.push(value.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("filter must be an object"),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_with_filter_fields() {
        let store = MemoryStore::new();
        let f = filter(json!({"_id": "tplink_D1"}));

        store
            .upsert("current_state", f.clone(), Update::new().set("model", json!("HS110")))
            .await
            .unwrap();

        let doc = store.find_one("current_state", &f).unwrap();
        assert_eq!(Value::Object(doc), json!({"_id": "tplink_D1", "model": "HS110"}));
    }

    #[tokio::test]
    async fn upsert_updates_existing_match() {
        let store = MemoryStore::new();
        let f = filter(json!({"_id": "tplink_D1"}));

        store
            .upsert("c", f.clone(), Update::new().set("power", json!("on")).set("model", json!("A")))
            .await
            .unwrap();
        store
            .upsert("c", f.clone(), Update::new().set("power", json!("off")))
            .await
            .unwrap();

        assert_eq!(store.documents("c").len(), 1);
        let doc = store.find_one("c", &f).unwrap();
        assert_eq!(doc["power"], json!("off"));
        assert_eq!(doc["model"], json!("A"));
    }

    #[tokio::test]
    async fn insert_generates_id_when_filter_has_none() {
        let store = MemoryStore::new();
        let f = filter(json!({"device_id": "D1", "y": 2024}));

        store.upsert("h", f.clone(), Update::new()).await.unwrap();

        let doc = store.find_one("h", &f).unwrap();
        assert!(doc["_id"].is_string());
        assert_eq!(doc["device_id"], json!("D1"));
    }

    #[tokio::test]
    async fn push_appends_in_order() {
        let store = MemoryStore::new();
        let f = filter(json!({"device_id": "D1"}));

        for v in 1..=3 {
            store
                .upsert("h", f.clone(), Update::new().push("power", json!(v)))
                .await
                .unwrap();
        }

        let doc = store.find_one("h", &f).unwrap();
        assert_eq!(doc["power"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn push_to_scalar_is_rejected_without_partial_write() {
        let store = MemoryStore::new();
        let f = filter(json!({"_id": "x"}));
        store
            .upsert("c", f.clone(), Update::new().set("power", json!("on")))
            .await
            .unwrap();

        let result = store
            .upsert(
                "c",
                f.clone(),
                Update::new().set("other", json!(1)).push("power", json!("off")),
            )
            .await;

        assert!(matches!(result, Err(StoreError::Rejected { .. })));
        let doc = store.find_one("c", &f).unwrap();
        assert!(!doc.contains_key("other"));
        assert_eq!(doc["power"], json!("on"));
    }

    #[tokio::test]
    async fn changing_id_is_rejected() {
        let store = MemoryStore::new();
        let f = filter(json!({"_id": "x"}));
        let result = store
            .upsert("c", f, Update::new().set("_id", json!("y")))
            .await;
        assert!(matches!(result, Err(StoreError::Rejected { .. })));
        assert!(store.documents("c").is_empty());
    }

    #[tokio::test]
    async fn ensure_index_is_idempotent() {
        let store = MemoryStore::new();
        let index = IndexModel::ascending(["device_id", "y", "m", "d"]);

        store.ensure_index("h", index.clone()).await.unwrap();
        store.ensure_index("h", index.clone()).await.unwrap();

        assert_eq!(store.indexes("h"), vec![index]);
    }

    #[tokio::test]
    async fn rejected_collection_fails_writes() {
        let store = MemoryStore::new();
        store.reject_writes("c");

        let result = store
            .upsert("c", filter(json!({"_id": "x"})), Update::new())
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let result = store.ensure_index("c", IndexModel::ascending(["a"])).await;
        assert!(result.is_err());

        store.accept_writes("c");
        store
            .upsert("c", filter(json!({"_id": "x"})), Update::new())
            .await
            .unwrap();
        assert_eq!(store.documents("c").len(), 1);
    }

    #[test]
    fn unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.documents("nope").is_empty());
        assert!(store.indexes("nope").is_empty());
        assert!(store.find_one("nope", &Document::new()).is_none());
    }
}
