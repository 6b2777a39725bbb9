// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Schema-driven persistence of state deltas.
//!
//! # Write sequence
//!
//! ```text
//! StatePayload {"power":"on","temperature":21.5,"unused":true}
//!                     ↓
//!     Selection::from_payload(schema = [power, temperature])
//!                     ↓
//!      {power: "on", temperature: 21.5}        ("unused" dropped)
//!           ↓                         ↓
//!  current_state $set            historical_state $push
//!  _id = tplink_<id>             (device_id, friendly_name, y, m, d)
//!  power, temperature,           power: {ts, v}
//!  update_ts, friendly_name      temperature: {ts, v}
//! ```
//!
//! The two upserts (and the index maintenance between them) are independent
//! store calls. A failure in one is logged and does not stop the others, so
//! the current-state document may briefly run ahead of its history.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde_json::{Value, json};

use super::{CURRENT_STATE_FIELDS, HISTORY_BUCKET_FIELDS, is_field_name};
use crate::capabilities::CapabilitySchema;
use crate::config::BridgeConfig;
use crate::device::Device;
use crate::error::StoreError;
use crate::payload::StatePayload;
use crate::store::{Document, DocumentStore, IndexModel, Update, bounded};

/// Properties of a state payload that the device's schema declares.
///
/// Values are kept in schema order. Absent and `null` values are not
/// selected, so they never clear a previously stored value.
///
/// # Examples
///
/// ```
/// use devstate_bridge::CapabilitySchema;
/// use devstate_bridge::payload::StatePayload;
/// use devstate_bridge::writer::Selection;
///
/// let schema = CapabilitySchema::from_properties(["power", "temperature"]);
/// let payload = StatePayload::from_slice(br#"{"power":"on","temperature":null,"x":1}"#).unwrap();
///
/// let selection = Selection::from_payload(&schema, &payload);
/// assert_eq!(selection.properties().collect::<Vec<_>>(), ["power"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    values: Vec<(String, Value)>,
}

impl Selection {
    /// Projects `payload` through `schema`.
    #[must_use]
    pub fn from_payload(schema: &CapabilitySchema, payload: &StatePayload) -> Self {
        let mut values: Vec<(String, Value)> = Vec::new();

        for property in schema.properties() {
            let Some(value) = payload.value(property) else {
                continue;
            };
            if !is_field_name(property) {
                tracing::debug!(property = %property, "Skipping property with invalid field name");
                continue;
            }
            if values.iter().any(|(p, _)| p == property) {
                continue;
            }
            values.push((property.to_string(), value.clone()));
        }

        Self { values }
    }

    /// Returns the selected property keys in schema order.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(p, _)| p.as_str())
    }

    /// Returns the selected value for `property`.
    #[must_use]
    pub fn value(&self, property: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v)
    }

    /// Returns the number of selected properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no declared property carried a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of one [`DeltaWriter::apply_state`] call.
///
/// Each store call reports separately; a failure in one does not prevent
/// the others from being attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaReport {
    /// Properties selected from the payload, in schema order.
    pub selected: Vec<String>,
    /// Epoch seconds stamped on both projections.
    pub timestamp: i64,
    /// Result of the current-state upsert.
    pub current_state: Result<(), StoreError>,
    /// Result of the history index maintenance.
    pub index: Result<(), StoreError>,
    /// Result of the history append.
    pub history: Result<(), StoreError>,
}

impl DeltaReport {
    /// Returns `true` if every store call succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_state.is_ok() && self.index.is_ok() && self.history.is_ok()
    }

    /// Converts the report into the selected properties, or the first store
    /// error in write order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if any store call failed.
    pub fn into_result(self) -> crate::Result<Vec<String>> {
        self.current_state?;
        self.index?;
        self.history?;
        Ok(self.selected)
    }
}

/// Persists state payloads into current-state documents and history buckets.
#[derive(Clone)]
pub struct DeltaWriter {
    store: Arc<dyn DocumentStore>,
    config: Arc<BridgeConfig>,
}

impl DeltaWriter {
    /// Creates a writer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: Arc<BridgeConfig>) -> Self {
        Self { store, config }
    }

    /// Persists `payload` for `device`, stamped with the current time.
    pub async fn apply_state(&self, device: &Device, payload: &StatePayload) -> DeltaReport {
        self.apply_state_at(device, payload, Utc::now()).await
    }

    /// Persists `payload` for `device` as processed at `now`.
    ///
    /// `now` selects both the `update_ts`/`ts` stamps and the UTC calendar
    /// day of the history bucket.
    pub async fn apply_state_at(
        &self,
        device: &Device,
        payload: &StatePayload,
        now: DateTime<Utc>,
    ) -> DeltaReport {
        let ts = now.timestamp();
        let selection = Selection::from_payload(device.schema(), payload);

        tracing::debug!(
            device_id = %device.id(),
            friendly_name = %device.friendly_name(),
            selected = selection.len(),
            received = payload.len(),
            "Persisting device state"
        );

        let current_state = self.write_current_state(device, &selection, ts).await;
        if let Err(ref e) = current_state {
            tracing::error!(
                device_id = %device.id(),
                error = %e,
                "Failed to persist current state"
            );
        }

        let index = self.ensure_history_index().await;
        if let Err(ref e) = index {
            tracing::error!(
                collection = %self.config.historical_state_collection(),
                error = %e,
                "Failed to create history index"
            );
        }

        let history = self.append_history(device, &selection, now).await;
        if let Err(ref e) = history {
            tracing::error!(
                device_id = %device.id(),
                error = %e,
                "Failed to append state history"
            );
        }

        DeltaReport {
            selected: selection.properties().map(str::to_string).collect(),
            timestamp: ts,
            current_state,
            index,
            history,
        }
    }

    async fn write_current_state(
        &self,
        device: &Device,
        selection: &Selection,
        ts: i64,
    ) -> Result<(), StoreError> {
        let mut filter = Document::new();
        filter.insert(
            "_id".to_string(),
            Value::String(self.config.document_id(device.id())),
        );

        let update = selection
            .values
            .iter()
            .filter(|(property, _)| !CURRENT_STATE_FIELDS.contains(&property.as_str()))
            .fold(
                Update::new()
                    .set("update_ts", json!(ts))
                    .set("friendly_name", json!(device.friendly_name())),
                |update, (property, value)| update.set(property.as_str(), value.clone()),
            );

        bounded(
            self.config.store_timeout(),
            self.store
                .upsert(self.config.current_state_collection(), filter, update),
        )
        .await
    }

    async fn ensure_history_index(&self) -> Result<(), StoreError> {
        bounded(
            self.config.store_timeout(),
            self.store.ensure_index(
                self.config.historical_state_collection(),
                history_index(),
            ),
        )
        .await
    }

    async fn append_history(
        &self,
        device: &Device,
        selection: &Selection,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ts = now.timestamp();
        let filter = history_bucket(device, now);

        let update = selection
            .values
            .iter()
            .filter(|(property, _)| !HISTORY_BUCKET_FIELDS.contains(&property.as_str()))
            .fold(Update::new(), |update, (property, value)| {
                update.push(property.as_str(), json!({ "ts": ts, "v": value }))
            });

        bounded(
            self.config.store_timeout(),
            self.store
                .upsert(self.config.historical_state_collection(), filter, update),
        )
        .await
    }
}

impl std::fmt::Debug for DeltaWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaWriter")
            .field("current_state", &self.config.current_state_collection())
            .field("historical_state", &self.config.historical_state_collection())
            .finish_non_exhaustive()
    }
}

/// The index maintained on the history collection.
#[must_use]
pub fn history_index() -> IndexModel {
    IndexModel::ascending(["device_id", "y", "m", "d"])
}

/// Returns the filter selecting the history bucket of `device` for the UTC
/// day containing `now`.
#[must_use]
pub fn history_bucket(device: &Device, now: DateTime<Utc>) -> Document {
    let mut filter = Document::new();
    filter.insert("device_id".to_string(), json!(device.id()));
    filter.insert("friendly_name".to_string(), json!(device.friendly_name()));
    filter.insert("y".to_string(), json!(now.year()));
    filter.insert("m".to_string(), json!(now.month()));
    filter.insert("d".to_string(), json!(now.day()));
    filter
}
