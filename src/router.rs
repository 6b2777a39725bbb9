// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing of inbound messages to the device registry and writers.
//!
//! # Architecture
//!
//! ```text
//! tplink2mqtt/bridge/devices → [{id, info}, ...]
//!                     ↓
//!          TopicRouter.on_announcement()
//!                     ↓
//!     DeviceRegistry.register_device()   (already known → skip)
//!                     ↓
//!     bind "tplink2mqtt/<name>" → id, SnapshotWriter, subscribe
//!
//! tplink2mqtt/desk_plug → {"power":"on", ...}
//!                     ↓
//!      bound topic → device id → DeviceRegistry.get()
//!                     ↓
//!          DeltaWriter.apply_state()
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::BridgeConfig;
use crate::device::Device;
use crate::error::ProtocolError;
use crate::payload::{StatePayload, decode_announcement};
use crate::registry::DeviceRegistry;
use crate::store::DocumentStore;
use crate::transport::Subscriber;
use crate::writer::{DeltaReport, DeltaWriter, SnapshotWriter};

/// Handles the message classes delivered by the transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called each time the transport (re)connects.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the announcement topic cannot be subscribed.
    async fn on_connected(&self) -> Result<(), ProtocolError>;

    /// Handles a device-list message.
    async fn on_announcement(&self, payload: &[u8]) -> AnnouncementOutcome;

    /// Handles a state message from the device bound to `device_id`.
    ///
    /// Returns `None` if the message was dropped before reaching the store.
    async fn on_device_state(&self, device_id: &str, payload: &[u8]) -> Option<DeltaReport>;

    /// Called for messages on topics nothing is bound to.
    fn on_unrouted(&self, topic: &str) {
        tracing::info!(topic = %topic, "Received message on unrouted topic");
    }

    /// Called when the transport loses its connection.
    fn on_disconnected(&self, reason: &str) {
        tracing::error!(reason = %reason, "Disconnected from MQTT broker");
    }
}

/// Summary of one announcement message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnouncementOutcome {
    /// Ids registered and subscribed by this message.
    pub registered: Vec<String>,
    /// Number of records for ids that were already registered.
    pub skipped: usize,
    /// Number of records that could not be decoded or had no id.
    pub rejected: usize,
    /// Ids whose subscription failed; they were rolled back.
    pub failed: Vec<String>,
    /// `true` if the payload could not be decoded.
    pub malformed: bool,
}

/// Where an inbound topic is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The device-list topic.
    Announcement,
    /// A state topic bound to the given device id.
    DeviceState(String),
    /// Nothing handles this topic.
    Unrouted,
}

/// Dispatches announcement and state messages.
///
/// State topics are bound to device ids when the device is first
/// registered; state messages are resolved through that binding rather than
/// by parsing the topic.
pub struct TopicRouter {
    config: Arc<BridgeConfig>,
    registry: Arc<DeviceRegistry>,
    snapshot: SnapshotWriter,
    delta: DeltaWriter,
    subscriber: Arc<dyn Subscriber>,
    /// Map from state topic to the id of the device publishing on it.
    bindings: RwLock<HashMap<String, String>>,
}

impl TopicRouter {
    /// Creates a router writing to `store` and subscribing through
    /// `subscriber`.
    #[must_use]
    pub fn new(
        config: Arc<BridgeConfig>,
        registry: Arc<DeviceRegistry>,
        store: Arc<dyn DocumentStore>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        Self {
            snapshot: SnapshotWriter::new(Arc::clone(&store), Arc::clone(&config)),
            delta: DeltaWriter::new(store, Arc::clone(&config)),
            config,
            registry,
            subscriber,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the device registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Decides which handler a topic belongs to.
    #[must_use]
    pub fn classify(&self, topic: &str) -> Route {
        if topic == self.config.announcement_topic() {
            return Route::Announcement;
        }
        match self.bindings.read().get(topic) {
            Some(device_id) => Route::DeviceState(device_id.clone()),
            None => Route::Unrouted,
        }
    }

    /// Routes one inbound message.
    ///
    /// Returns `true` if the topic was handled as an announcement or a
    /// device state message.
    pub async fn route(&self, topic: &str, payload: &[u8]) -> bool {
        match self.classify(topic) {
            Route::Announcement => {
                self.on_announcement(payload).await;
                true
            }
            Route::DeviceState(device_id) => {
                self.on_device_state(&device_id, payload).await;
                true
            }
            Route::Unrouted => {
                self.on_unrouted(topic);
                false
            }
        }
    }

    /// Decodes and persists a state message from the device `device_id`.
    ///
    /// Returns `Ok(None)` if no device with that id is registered. Store
    /// failures do not fail the call; they are carried in the report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`](crate::Error::Parse) if the payload is not a
    /// JSON object.
    pub async fn persist_device_state(
        &self,
        device_id: &str,
        payload: &[u8],
    ) -> crate::Result<Option<DeltaReport>> {
        let Some(device) = self.registry.get(device_id) else {
            tracing::warn!(device_id = %device_id, "Dropping state for unregistered device");
            return Ok(None);
        };

        let state = StatePayload::from_slice(payload)?;

        tracing::debug!(
            device_id = %device_id,
            friendly_name = %device.friendly_name(),
            "Received device state"
        );
        Ok(Some(self.delta.apply_state(&device, &state).await))
    }

    /// Rolls back the device bound to `topic` after the broker refused its
    /// subscription, so the next announcement registers it again.
    ///
    /// Returns the id of the forgotten device, or `None` if nothing was
    /// bound to `topic`.
    pub fn subscription_refused(&self, topic: &str) -> Option<String> {
        let device_id = self.bindings.write().remove(topic)?;
        self.registry.forget(&device_id);
        tracing::warn!(
            topic = %topic,
            device_id = %device_id,
            "Forgot device after refused subscription"
        );
        Some(device_id)
    }

    /// Returns every state topic bound so far.
    #[must_use]
    pub fn bound_topics(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }

    /// Binds, persists and subscribes a device that was just registered.
    ///
    /// On subscription failure the binding and registration are rolled back
    /// so the next announcement retries.
    async fn track_device(&self, device: &Device) -> bool {
        let topic = device.state_topic(self.config.topic_prefix());
        self.bind(&topic, device.id());

        self.snapshot.persist_identity(device).await;

        tracing::info!(
            device_id = %device.id(),
            friendly_name = %device.friendly_name(),
            topic = %topic,
            "Subscribing to device"
        );

        match self.subscriber.subscribe(&topic, self.config.qos()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    device_id = %device.id(),
                    topic = %topic,
                    error = %e,
                    "Failed to subscribe to device"
                );
                self.unbind(&topic, device.id());
                self.registry.forget(device.id());
                false
            }
        }
    }

    fn bind(&self, topic: &str, device_id: &str) {
        let previous = self
            .bindings
            .write()
            .insert(topic.to_string(), device_id.to_string());

        if let Some(previous) = previous
            && previous != device_id
        {
            tracing::warn!(
                topic = %topic,
                previous = %previous,
                device_id = %device_id,
                "State topic rebound to another device"
            );
        }
    }

    fn unbind(&self, topic: &str, device_id: &str) {
        let mut bindings = self.bindings.write();
        if bindings.get(topic).is_some_and(|bound| bound == device_id) {
            bindings.remove(topic);
        }
    }
}

#[async_trait]
impl MessageHandler for TopicRouter {
    async fn on_connected(&self) -> Result<(), ProtocolError> {
        let announcement = self.config.announcement_topic();
        self.subscriber
            .subscribe(announcement, self.config.qos())
            .await?;
        tracing::info!(topic = %announcement, "Subscribed to device announcements");

        for topic in self.bound_topics() {
            if let Err(e) = self.subscriber.subscribe(&topic, self.config.qos()).await {
                tracing::error!(topic = %topic, error = %e, "Failed to resubscribe to device");
            }
        }
        Ok(())
    }

    async fn on_announcement(&self, payload: &[u8]) -> AnnouncementOutcome {
        let announcement = match decode_announcement(payload) {
            Ok(announcement) => announcement,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed device announcement");
                return AnnouncementOutcome {
                    malformed: true,
                    ..AnnouncementOutcome::default()
                };
            }
        };

        tracing::debug!(
            count = announcement.devices.len(),
            rejected = announcement.rejected,
            "Received device announcement"
        );

        let mut outcome = AnnouncementOutcome {
            rejected: announcement.rejected,
            ..AnnouncementOutcome::default()
        };
        for device in announcement.devices {
            if self.registry.has_device(device.id())
                || !self.registry.register_device(device.clone())
            {
                outcome.skipped += 1;
                continue;
            }

            if self.track_device(&device).await {
                outcome.registered.push(device.id().to_string());
            } else {
                outcome.failed.push(device.id().to_string());
            }
        }
        outcome
    }

    async fn on_device_state(&self, device_id: &str, payload: &[u8]) -> Option<DeltaReport> {
        match self.persist_device_state(device_id, payload).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(
                    device_id = %device_id,
                    error = %e,
                    "Dropping malformed state payload"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRouter")
            .field("announcement_topic", &self.config.announcement_topic())
            .field("devices", &self.registry.len())
            .field("bound_topics", &self.bindings.read().len())
            .finish_non_exhaustive()
    }
}
