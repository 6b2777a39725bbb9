// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Document store interface.
//!
//! The bridge only ever writes, and only through two operations:
//!
//! - [`DocumentStore::upsert`]: update the single document matching a
//!   filter, inserting it (seeded with the filter fields) when absent;
//! - [`DocumentStore::ensure_index`]: create an index unless it already
//!   exists.
//!
//! Updates combine `$set` (overwrite a field) and `$push` (append to an
//! array field) in the shape of a Mongo update document. [`MemoryStore`]
//! implements these semantics in process; `MongoStore` (feature `mongodb`)
//! hands them to a MongoDB deployment.

mod memory;
#[cfg(feature = "mongodb")]
mod mongo;

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A stored document or filter: field names mapped to JSON values.
pub type Document = Map<String, Value>;

/// Field modifications applied by an upsert.
///
/// # Examples
///
/// ```
/// use devstate_bridge::store::Update;
/// use serde_json::json;
///
/// let update = Update::new()
///     .set("power", json!("on"))
///     .push("power", json!({"ts": 1709251200, "v": "on"}));
///
/// assert_eq!(update.set_fields().len(), 1);
/// assert_eq!(update.push_fields().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Document,
    push: Document,
}

impl Update {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites `field` with `value`.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.insert(field.into(), value);
        self
    }

    /// Appends `value` to the array in `field`.
    #[must_use]
    pub fn push(mut self, field: impl Into<String>, value: Value) -> Self {
        self.push.insert(field.into(), value);
        self
    }

    /// Returns the fields to overwrite.
    #[must_use]
    pub fn set_fields(&self) -> &Document {
        &self.set
    }

    /// Returns the fields to append to.
    #[must_use]
    pub fn push_fields(&self) -> &Document {
        &self.push
    }

    /// Returns `true` if the update modifies nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.push.is_empty()
    }

    /// Renders the update as a Mongo-style update document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if !self.set.is_empty() {
            doc.insert("$set".to_string(), Value::Object(self.set.clone()));
        }
        if !self.push.is_empty() {
            doc.insert("$push".to_string(), Value::Object(self.push.clone()));
        }
        doc
    }
}

/// An ascending compound index over a list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexModel {
    keys: Vec<String>,
}

impl IndexModel {
    /// Creates an ascending index over `keys`, in order.
    #[must_use]
    pub fn ascending<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the indexed fields.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Write-side document store collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Applies `update` to the document matching `filter`, inserting a new
    /// document seeded from `filter` when none matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or rejects the write.
    async fn upsert(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
    ) -> Result<(), StoreError>;

    /// Creates `index` on `collection` unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the index cannot be created.
    async fn ensure_index(&self, collection: &str, index: IndexModel) -> Result<(), StoreError>;
}

/// Runs a store call under a deadline.
///
/// An elapsed deadline is reported as [`StoreError::Timeout`].
pub(crate) async fn bounded<F>(timeout: Duration, call: F) -> Result<(), StoreError>
where
    F: Future<Output = Result<(), StoreError>>,
{
    #[allow(clippy::cast_possible_truncation)]
    let timeout_ms = timeout.as_millis() as u64;

    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StoreError::Timeout(timeout_ms))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_document_shape() {
        let update = Update::new()
            .set("update_ts", json!(10))
            .push("power", json!({"ts": 10, "v": "on"}));

        assert_eq!(
            Value::Object(update.to_document()),
            json!({
                "$set": {"update_ts": 10},
                "$push": {"power": {"ts": 10, "v": "on"}}
            })
        );
    }

    #[test]
    fn empty_update_renders_nothing() {
        let update = Update::new();
        assert!(update.is_empty());
        assert!(update.to_document().is_empty());
    }

    #[test]
    fn index_keys_keep_order() {
        let index = IndexModel::ascending(["device_id", "y", "m", "d"]);
        assert_eq!(index.keys(), ["device_id", "y", "m", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout() {
        let result = bounded(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(StoreError::Timeout(100)));
    }

    #[tokio::test]
    async fn bounded_passes_through_result() {
        let ok = bounded(Duration::from_secs(1), async { Ok(()) }).await;
        assert!(ok.is_ok());

        let err = bounded(Duration::from_secs(1), async {
            Err(StoreError::Unavailable("down".to_string()))
        })
        .await;
        assert_eq!(err, Err(StoreError::Unavailable("down".to_string())));
    }
}
