// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge configuration.
//!
//! [`BridgeConfig`] holds the topic layout, document naming and store
//! deadline shared by the router and both writers. Broker connection
//! settings live on [`MqttBridgeBuilder`](crate::transport::MqttBridgeBuilder).

use std::time::Duration;

use rumqttc::QoS;

/// Default topic carrying the full device list.
pub const DEFAULT_ANNOUNCEMENT_TOPIC: &str = "tplink2mqtt/bridge/devices";

/// Default prefix of per-device state topics.
pub const DEFAULT_TOPIC_PREFIX: &str = "tplink2mqtt";

/// Default collection for latest-value documents.
pub const DEFAULT_CURRENT_STATE_COLLECTION: &str = "current_state";

/// Default collection for per-day history buckets.
pub const DEFAULT_HISTORICAL_STATE_COLLECTION: &str = "historical_state";

/// Configuration shared by the router and the writers.
///
/// # Examples
///
/// ```
/// use devstate_bridge::BridgeConfig;
/// use std::time::Duration;
///
/// let config = BridgeConfig::builder()
///     .topic_prefix("zigbee2mqtt")
///     .announcement_topic("zigbee2mqtt/bridge/devices")
///     .store_timeout(Duration::from_secs(2))
///     .build();
///
/// assert_eq!(config.document_id("D1"), "tplink_D1");
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    announcement_topic: String,
    topic_prefix: String,
    id_prefix: String,
    device_type: String,
    qos: QoS,
    store_timeout: Duration,
    current_state_collection: String,
    historical_state_collection: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            announcement_topic: DEFAULT_ANNOUNCEMENT_TOPIC.to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            id_prefix: "tplink".to_string(),
            device_type: "hs1xx".to_string(),
            qos: QoS::AtLeastOnce,
            store_timeout: Duration::from_secs(5),
            current_state_collection: DEFAULT_CURRENT_STATE_COLLECTION.to_string(),
            historical_state_collection: DEFAULT_HISTORICAL_STATE_COLLECTION.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Returns the topic carrying the device list.
    #[must_use]
    pub fn announcement_topic(&self) -> &str {
        &self.announcement_topic
    }

    /// Returns the prefix of per-device state topics.
    #[must_use]
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Returns the type tag written on current-state documents.
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Returns the QoS used for subscriptions.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Returns the deadline applied to each store call.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Returns the current-state collection name.
    #[must_use]
    pub fn current_state_collection(&self) -> &str {
        &self.current_state_collection
    }

    /// Returns the history collection name.
    #[must_use]
    pub fn historical_state_collection(&self) -> &str {
        &self.historical_state_collection
    }

    /// Returns the current-state document key for a device id.
    #[must_use]
    pub fn document_id(&self, device_id: &str) -> String {
        format!("{}_{device_id}", self.id_prefix)
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Sets the device-list topic (default: `tplink2mqtt/bridge/devices`).
    #[must_use]
    pub fn announcement_topic(mut self, topic: impl Into<String>) -> Self {
        self.config.announcement_topic = topic.into();
        self
    }

    /// Sets the state topic prefix (default: `tplink2mqtt`).
    #[must_use]
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    /// Sets the current-state document key prefix (default: `tplink`).
    #[must_use]
    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.id_prefix = prefix.into();
        self
    }

    /// Sets the device type tag (default: `hs1xx`).
    #[must_use]
    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.config.device_type = device_type.into();
        self
    }

    /// Sets the subscription QoS (default: at least once).
    #[must_use]
    pub fn qos(mut self, qos: QoS) -> Self {
        self.config.qos = qos;
        self
    }

    /// Sets the per-call store deadline (default: 5 seconds).
    #[must_use]
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    /// Sets the current-state collection name.
    #[must_use]
    pub fn current_state_collection(mut self, name: impl Into<String>) -> Self {
        self.config.current_state_collection = name.into();
        self
    }

    /// Sets the history collection name.
    #[must_use]
    pub fn historical_state_collection(mut self, name: impl Into<String>) -> Self {
        self.config.historical_state_collection = name.into();
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
