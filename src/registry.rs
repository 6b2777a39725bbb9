// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory registry of known devices.
//!
//! The registry is the only mutable state shared between concurrently
//! handled messages. Registration is an atomic insert-if-absent so that two
//! announcements racing on the same new device cannot both treat it as new.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;

/// Maps device identifiers to their announced identity and schema.
///
/// Entries live for the lifetime of the registry and are never mutated once
/// inserted.
///
/// # Examples
///
/// ```
/// use devstate_bridge::{CapabilitySchema, Device, DeviceIdentity, DeviceRegistry};
///
/// let registry = DeviceRegistry::new();
/// let device = Device::new(DeviceIdentity::new("D1", "Plug"), CapabilitySchema::default());
///
/// assert!(registry.register_device(device.clone()));
/// assert!(!registry.register_device(device));
/// assert!(registry.has_device("D1"));
/// ```
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<Device>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a device with this id has been registered.
    #[must_use]
    pub fn has_device(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Registers a device unless its id is already known.
    ///
    /// Returns `true` only if the device was newly inserted. An existing
    /// entry is left untouched.
    pub fn register_device(&self, device: Device) -> bool {
        match self.devices.write().entry(device.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                tracing::debug!(
                    device_id = %device.id(),
                    friendly_name = %device.friendly_name(),
                    "Registered device"
                );
                slot.insert(Arc::new(device));
                true
            }
        }
    }

    /// Returns the registered device with this id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.read().get(id).cloned()
    }

    /// Removes a registration.
    ///
    /// Used to roll back a device whose state topic could not be subscribed,
    /// so the next announcement treats it as new again. Returns `true` if
    /// an entry was removed.
    pub fn forget(&self, id: &str) -> bool {
        self.devices.write().remove(id).is_some()
    }

    /// Returns the ids of all registered devices.
    #[must_use]
    pub fn device_ids(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if no device has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilitySchema;
    use crate::device::DeviceIdentity;

    fn device(id: &str, name: &str) -> Device {
        Device::new(
            DeviceIdentity::new(id, name),
            CapabilitySchema::from_properties(["power"]),
        )
    }

    #[test]
    fn register_new_device() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.has_device("D1"));

        assert!(registry.register_device(device("D1", "Plug")));
        assert!(registry.has_device("D1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn second_registration_is_noop() {
        let registry = DeviceRegistry::new();
        assert!(registry.register_device(device("D1", "Plug")));
        assert!(!registry.register_device(device("D1", "Renamed Plug")));

        assert_eq!(registry.len(), 1);
        // First entry wins and is never mutated
        assert_eq!(registry.get("D1").unwrap().friendly_name(), "Plug");
    }

    #[test]
    fn forget_allows_reregistration() {
        let registry = DeviceRegistry::new();
        registry.register_device(device("D1", "Plug"));

        assert!(registry.forget("D1"));
        assert!(!registry.forget("D1"));
        assert!(!registry.has_device("D1"));
        assert!(registry.register_device(device("D1", "Plug")));
    }

    #[test]
    fn device_ids_lists_all() {
        let registry = DeviceRegistry::new();
        registry.register_device(device("A", "a"));
        registry.register_device(device("B", "b"));

        let mut ids = registry.device_ids();
        ids.sort();
        assert_eq!(ids, ["A", "B"]);
    }

    #[test]
    fn concurrent_registration_has_single_winner() {
        let registry = Arc::new(DeviceRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register_device(device("D1", "Plug")))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }
}
