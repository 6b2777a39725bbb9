// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity upserts for newly announced devices.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::BridgeConfig;
use crate::device::Device;
use crate::error::StoreError;
use crate::store::{Document, DocumentStore, Update, bounded};

/// Writes a device's identity onto its current-state document.
///
/// Every field written is independent of what the document held before, so
/// the upsert needs no read and re-running it converges on the same result.
#[derive(Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn DocumentStore>,
    config: Arc<BridgeConfig>,
}

impl SnapshotWriter {
    /// Creates a writer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: Arc<BridgeConfig>) -> Self {
        Self { store, config }
    }

    /// Upserts the identity of `device`, logging and swallowing failures.
    ///
    /// Returns `true` if the write succeeded.
    pub async fn persist_identity(&self, device: &Device) -> bool {
        match self.try_persist_identity(device).await {
            Ok(()) => {
                tracing::debug!(
                    device_id = %device.id(),
                    friendly_name = %device.friendly_name(),
                    "Persisted device identity"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    device_id = %device.id(),
                    error = %e,
                    "Failed to persist device identity"
                );
                false
            }
        }
    }

    /// Upserts the identity of `device`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails or the call exceeds the
    /// configured store timeout.
    pub async fn try_persist_identity(&self, device: &Device) -> Result<(), StoreError> {
        let collection = self.config.current_state_collection();
        let filter = self.filter(device);
        let update = self.identity_update(device);

        bounded(
            self.config.store_timeout(),
            self.store.upsert(collection, filter, update),
        )
        .await
    }

    fn filter(&self, device: &Device) -> Document {
        let mut filter = Document::new();
        filter.insert(
            "_id".to_string(),
            Value::String(self.config.document_id(device.id())),
        );
        filter
    }

    /// Builds the `$set` of identity fields for `device`.
    #[must_use]
    pub fn identity_update(&self, device: &Device) -> Update {
        let identity = device.identity();
        Update::new()
            .set("friendly_name", json!(identity.friendly_name))
            .set("type", json!(self.config.device_type()))
            .set("network_address", json!(identity.network_address))
            .set("model", json!(identity.model))
            .set("vendor", json!(identity.vendor))
            .set("capabilities", json!(device.schema()))
    }
}

impl std::fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter")
            .field("collection", &self.config.current_state_collection())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilitySchema, PropertyDescriptor};
    use crate::device::DeviceIdentity;
    use crate::store::MemoryStore;

    fn device() -> Device {
        Device::new(
            DeviceIdentity::new("D1", "Desk Plug")
                .with_network_address("192.168.1.20")
                .with_model("HS110")
                .with_vendor("TP-Link"),
            CapabilitySchema::new(vec![
                PropertyDescriptor::new("power").with_attribute("type", "binary"),
                PropertyDescriptor::new("temperature"),
            ]),
        )
    }

    fn writer(store: &Arc<MemoryStore>) -> SnapshotWriter {
        SnapshotWriter::new(store.clone(), Arc::new(BridgeConfig::default()))
    }

    fn id_filter(id: &str) -> Document {
        let mut filter = Document::new();
        filter.insert("_id".to_string(), json!(id));
        filter
    }

    #[tokio::test]
    async fn persists_identity_fields() {
        let store = Arc::new(MemoryStore::new());
        assert!(writer(&store).persist_identity(&device()).await);

        let doc = store
            .find_one("current_state", &id_filter("tplink_D1"))
            .unwrap();
        assert_eq!(
            Value::Object(doc),
            json!({
                "_id": "tplink_D1",
                "friendly_name": "Desk Plug",
                "type": "hs1xx",
                "network_address": "192.168.1.20",
                "model": "HS110",
                "vendor": "TP-Link",
                "capabilities": [
                    {"property": "power", "type": "binary"},
                    {"property": "temperature"}
                ]
            })
        );
    }

    #[tokio::test]
    async fn repeated_persist_converges() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);

        writer.persist_identity(&device()).await;
        let first = store.find_one("current_state", &id_filter("tplink_D1"));
        writer.persist_identity(&device()).await;
        let second = store.find_one("current_state", &id_filter("tplink_D1"));

        assert_eq!(first, second);
        assert_eq!(store.documents("current_state").len(), 1);
    }

    #[tokio::test]
    async fn keeps_previously_stored_state_values() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(
                "current_state",
                id_filter("tplink_D1"),
                Update::new().set("power", json!("on")),
            )
            .await
            .unwrap();

        writer(&store).persist_identity(&device()).await;

        let doc = store
            .find_one("current_state", &id_filter("tplink_D1"))
            .unwrap();
        assert_eq!(doc["power"], json!("on"));
        assert_eq!(doc["model"], json!("HS110"));
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        store.reject_writes("current_state");

        let writer = writer(&store);
        assert!(!writer.persist_identity(&device()).await);
        assert!(writer.try_persist_identity(&device()).await.is_err());
        assert!(store.documents("current_state").is_empty());
    }
}
