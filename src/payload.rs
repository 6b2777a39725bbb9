// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of inbound MQTT payloads.
//!
//! Two payload shapes arrive on the bus:
//!
//! - the device list published on the announcement topic, decoded into
//!   typed [`Device`] values;
//! - per-device state messages, kept as an untyped key/value map
//!   ([`StatePayload`]) until the delta writer projects them through the
//!   device's capability schema.
//!
//! # Announcement format
//!
//! ```json
//! [
//!   {
//!     "id": "8006A1B2C3",
//!     "info": {
//!       "friendly_name": "Living Room Plug",
//!       "network_address": "192.168.1.20",
//!       "model": "HS110",
//!       "vendor": "TP-Link",
//!       "exposes": [{"property": "power"}, {"property": "current_consumption"}]
//!     }
//!   }
//! ]
//! ```

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::capabilities::CapabilitySchema;
use crate::device::{Device, DeviceIdentity};
use crate::error::ParseError;

/// One record of the announcement device list.
///
/// Missing and `null` fields decode to their empty value, as announcers
/// routinely leave identity strings unset.
#[derive(Debug, Deserialize)]
struct AnnouncedDevice {
    #[serde(default, alias = "ieee_address", deserialize_with = "null_as_default")]
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    info: AnnouncedInfo,
}

#[derive(Debug, Default, Deserialize)]
struct AnnouncedInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    friendly_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    network_address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    vendor: String,
    #[serde(default, deserialize_with = "null_as_default")]
    exposes: CapabilitySchema,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<AnnouncedDevice> for Device {
    fn from(record: AnnouncedDevice) -> Self {
        let info = record.info;
        let identity = DeviceIdentity {
            id: record.id,
            friendly_name: info.friendly_name,
            network_address: info.network_address,
            model: info.model,
            vendor: info.vendor,
        };
        Device::new(identity, info.exposes)
    }
}

/// A decoded announcement.
#[derive(Debug, Default)]
pub struct Announcement {
    /// Devices decoded from the usable records, in message order.
    pub devices: Vec<Device>,
    /// Number of records that were skipped because they could not be used.
    pub rejected: usize,
}

/// Decodes an announcement payload into the list of devices it describes.
///
/// Records are decoded one at a time: a record that is not an object, has
/// mistyped fields or carries no id is logged and skipped, and the rest of
/// the list is still returned.
///
/// # Errors
///
/// Returns [`ParseError::Json`] if the payload is not a JSON array.
///
/// # Examples
///
/// ```
/// use devstate_bridge::payload::decode_announcement;
///
/// let json = br#"[{"id":"D1","info":{"friendly_name":"Plug","exposes":[{"property":"power"}]}}]"#;
/// let announcement = decode_announcement(json).unwrap();
/// assert_eq!(announcement.devices[0].id(), "D1");
/// assert!(announcement.devices[0].schema().declares("power"));
/// ```
pub fn decode_announcement(payload: &[u8]) -> Result<Announcement, ParseError> {
    let records: Vec<Value> = serde_json::from_slice(payload)?;
    let mut announcement = Announcement::default();

    for (index, record) in records.into_iter().enumerate() {
        match AnnouncedDevice::deserialize(record) {
            Ok(record) if record.id.is_empty() => {
                tracing::warn!(index, "Skipping announced device without id");
                announcement.rejected += 1;
            }
            Ok(record) => announcement.devices.push(record.into()),
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping malformed announced device");
                announcement.rejected += 1;
            }
        }
    }
    Ok(announcement)
}

/// A decoded state message: arbitrary keys mapped to dynamic values.
///
/// Nothing in a `StatePayload` is trusted until it has been matched
/// against a capability schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePayload(Map<String, Value>);

impl StatePayload {
    /// Decodes a state payload from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Json`] for invalid JSON and
    /// [`ParseError::UnexpectedFormat`] when the JSON is not an object.
    pub fn from_slice(payload: &[u8]) -> Result<Self, ParseError> {
        match serde_json::from_slice::<Value>(payload)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ParseError::UnexpectedFormat(format!(
                "state payload must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Returns the value for `key` unless it is absent or `null`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Returns the number of keys, including unknown and null ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the payload carries no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for StatePayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn announcement_full_record() {
        let json = br#"[{
            "id": "8006A1",
            "info": {
                "friendly_name": "Living Room Plug",
                "network_address": "192.168.1.20",
                "model": "HS110",
                "vendor": "TP-Link",
                "exposes": [{"property":"power"},{"property":"current_consumption","unit":"W"}]
            }
        }]"#;

        let devices = decode_announcement(json).unwrap().devices;
        assert_eq!(devices.len(), 1);

        let device = &devices[0];
        assert_eq!(device.id(), "8006A1");
        assert_eq!(device.friendly_name(), "Living Room Plug");
        assert_eq!(device.identity().network_address, "192.168.1.20");
        assert_eq!(device.identity().model, "HS110");
        assert_eq!(device.identity().vendor, "TP-Link");
        let props: Vec<&str> = device.schema().properties().collect();
        assert_eq!(props, ["power", "current_consumption"]);
    }

    #[test]
    fn announcement_accepts_ieee_address_alias() {
        let json = br#"[{"ieee_address":"0x00158d0001","info":{"friendly_name":"Sensor"}}]"#;
        let devices = decode_announcement(json).unwrap().devices;
        assert_eq!(devices[0].id(), "0x00158d0001");
        assert!(devices[0].schema().is_empty());
    }

    #[test]
    fn announcement_missing_info_defaults() {
        let devices = decode_announcement(br#"[{"id":"bare"}]"#).unwrap().devices;
        assert_eq!(devices[0].friendly_name(), "");
        assert!(devices[0].schema().is_empty());
    }

    #[test]
    fn announcement_empty_list() {
        let announcement = decode_announcement(b"[]").unwrap();
        assert!(announcement.devices.is_empty());
        assert_eq!(announcement.rejected, 0);
    }

    #[test]
    fn announcement_rejects_non_list() {
        assert!(decode_announcement(b"not json").is_err());
        assert!(decode_announcement(br#"{"id":"D1"}"#).is_err());
    }

    #[test]
    fn announcement_null_fields_default_to_empty() {
        let json = br#"[{
            "id": "D2",
            "info": {"friendly_name": "Lamp", "vendor": null, "model": null, "exposes": null}
        }]"#;

        let devices = decode_announcement(json).unwrap().devices;
        assert_eq!(devices[0].friendly_name(), "Lamp");
        assert_eq!(devices[0].identity().vendor, "");
        assert_eq!(devices[0].identity().model, "");
        assert!(devices[0].schema().is_empty());
    }

    #[test]
    fn announcement_keeps_devices_with_composite_exposes() {
        let json = br#"[
            {"id": "D1", "info": {"friendly_name": "Plug", "exposes": [{"property": "power"}]}},
            {"id": "D2", "info": {"friendly_name": "Strip", "exposes": [
                {"type": "switch", "features": [{"property": "state"}]},
                {"property": "energy"}
            ]}}
        ]"#;

        let announcement = decode_announcement(json).unwrap();
        assert_eq!(announcement.rejected, 0);

        let strip = &announcement.devices[1];
        assert_eq!(strip.schema().properties().collect::<Vec<_>>(), ["energy"]);
        assert_eq!(strip.schema().len(), 2);
    }

    #[test]
    fn announcement_skips_unusable_records_only() {
        let json = br#"[
            {"info": {"friendly_name": "No Id"}},
            {"id": null},
            {"id": "D1", "info": {"friendly_name": "Plug"}},
            "not a record",
            {"id": "D3", "info": {"friendly_name": 42}}
        ]"#;

        let announcement = decode_announcement(json).unwrap();
        let ids: Vec<&str> = announcement.devices.iter().map(Device::id).collect();
        assert_eq!(ids, ["D1"]);
        assert_eq!(announcement.rejected, 4);
    }

    #[test]
    fn state_payload_filters_nulls() {
        let payload = StatePayload::from_slice(br#"{"power":"on","temperature":null}"#).unwrap();
        assert_eq!(payload.value("power"), Some(&json!("on")));
        assert_eq!(payload.value("temperature"), None);
        assert_eq!(payload.value("missing"), None);
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn state_payload_rejects_non_object() {
        let err = StatePayload::from_slice(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedFormat(_)));
        assert!(err.to_string().contains("an array"));

        let err = StatePayload::from_slice(b"{oops").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }
}
