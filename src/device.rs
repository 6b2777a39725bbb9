// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity and the registry entry type.
//!
//! A [`Device`] pairs an immutable identity with the capability schema the
//! device announced. The identifier is the only identity key; the friendly
//! name is used to derive the device's state topic but may change between
//! announcements.

use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilitySchema;

/// Identity fields announced for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Globally unique device identifier.
    pub id: String,
    /// Human-readable name, also used to derive the state topic.
    pub friendly_name: String,
    /// Network address reported by the bridge.
    pub network_address: String,
    /// Device model.
    pub model: String,
    /// Device vendor.
    pub vendor: String,
}

impl DeviceIdentity {
    /// Creates an identity with the given id and friendly name.
    #[must_use]
    pub fn new(id: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            ..Self::default()
        }
    }

    /// Sets the network address.
    #[must_use]
    pub fn with_network_address(mut self, address: impl Into<String>) -> Self {
        self.network_address = address.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the vendor.
    #[must_use]
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }
}

/// A known device: identity plus declared capabilities.
///
/// # Examples
///
/// ```
/// use devstate_bridge::{CapabilitySchema, Device, DeviceIdentity};
///
/// let device = Device::new(
///     DeviceIdentity::new("D1", "Living Room Plug"),
///     CapabilitySchema::from_properties(["power"]),
/// );
/// assert_eq!(device.state_topic("tplink2mqtt"), "tplink2mqtt/living_room_plug");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    identity: DeviceIdentity,
    schema: CapabilitySchema,
}

impl Device {
    /// Creates a device from its identity and schema.
    #[must_use]
    pub fn new(identity: DeviceIdentity, schema: CapabilitySchema) -> Self {
        Self { identity, schema }
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.identity.id
    }

    /// Returns the friendly name.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.identity.friendly_name
    }

    /// Returns the full identity.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns the capability schema.
    #[must_use]
    pub fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    /// Returns the topic this device publishes its state on.
    #[must_use]
    pub fn state_topic(&self, prefix: &str) -> String {
        format!("{prefix}/{}", sanitize_friendly_name(&self.identity.friendly_name))
    }
}

/// Normalizes a friendly name into a topic segment.
///
/// The name is lowercased and spaces become underscores.
///
/// # Examples
///
/// ```
/// use devstate_bridge::sanitize_friendly_name;
///
/// assert_eq!(sanitize_friendly_name("Kitchen Kettle"), "kitchen_kettle");
/// ```
#[must_use]
pub fn sanitize_friendly_name(friendly_name: &str) -> String {
    friendly_name.to_lowercase().replace(' ', "_")
}
