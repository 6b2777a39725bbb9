// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport collaborator.
//!
//! The router only needs one capability from the bus: subscribing to a
//! topic. [`Subscriber`] captures that, so routing can be driven without a
//! live broker. [`MqttBridge`] is the MQTT implementation that owns the
//! connection, feeds inbound publishes to the router and reports
//! connection changes.

mod mqtt;

pub use mqtt::{MqttBridge, MqttBridgeBuilder, MqttSubscriber};

use async_trait::async_trait;
use rumqttc::QoS;

use crate::error::ProtocolError;

/// Subscribes the bridge to topics on the bus.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribes to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the subscription request cannot be sent.
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError>;
}
