// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability schemas announced by devices.
//!
//! A device's capability schema is the ordered list of properties it may
//! report in its state messages. The schema is authoritative: only the
//! properties it declares are ever persisted from a state payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Describes one property a device may report.
///
/// Only the `property` key is interpreted. Any other attributes the bridge
/// announces for the property (type, unit, access mode...) are kept as-is so
/// they can be persisted alongside the device identity. A descriptor without
/// a `property` key, such as a composite with nested `features`, is kept for
/// persistence but declares nothing.
///
/// # Examples
///
/// ```
/// use devstate_bridge::PropertyDescriptor;
///
/// let json = r#"{"property":"power","type":"binary"}"#;
/// let descriptor: PropertyDescriptor = serde_json::from_str(json).unwrap();
/// assert_eq!(descriptor.property(), "power");
/// assert_eq!(descriptor.attribute("type"), Some(&serde_json::json!("binary")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    property: String,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl PropertyDescriptor {
    /// Creates a descriptor with no extra attributes.
    #[must_use]
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            attributes: Map::new(),
        }
    }

    /// Adds an extra attribute to the descriptor.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the property key as it appears in state payloads, or `""`
    /// if the descriptor names none.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns an extra attribute by name.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Ordered set of properties a device declares it may report.
///
/// # Examples
///
/// ```
/// use devstate_bridge::CapabilitySchema;
///
/// let schema = CapabilitySchema::from_properties(["power", "temperature"]);
/// assert_eq!(schema.len(), 2);
/// assert!(schema.declares("power"));
/// assert!(!schema.declares("unused"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySchema(Vec<PropertyDescriptor>);

impl CapabilitySchema {
    /// Creates a schema from descriptors, keeping their order.
    #[must_use]
    pub fn new(descriptors: Vec<PropertyDescriptor>) -> Self {
        Self(descriptors)
    }

    /// Creates a schema from bare property names.
    #[must_use]
    pub fn from_properties<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        properties.into_iter().map(PropertyDescriptor::new).collect()
    }

    /// Returns the descriptors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.0.iter()
    }

    /// Returns the declared property keys in order.
    ///
    /// Descriptors without a property key are not listed.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .map(PropertyDescriptor::property)
            .filter(|p| !p.is_empty())
    }

    /// Returns `true` if the schema declares the given property.
    #[must_use]
    pub fn declares(&self, property: &str) -> bool {
        self.properties().any(|p| p == property)
    }

    /// Returns the number of descriptors, including those declaring nothing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the schema has no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the descriptors as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[PropertyDescriptor] {
        &self.0
    }
}

impl FromIterator<PropertyDescriptor> for CapabilitySchema {
    fn from_iter<I: IntoIterator<Item = PropertyDescriptor>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CapabilitySchema {
    type Item = &'a PropertyDescriptor;
    type IntoIter = std::slice::Iter<'a, PropertyDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_preserves_declaration_order() {
        let schema = CapabilitySchema::from_properties(["temperature", "power", "humidity"]);
        let props: Vec<&str> = schema.properties().collect();
        assert_eq!(props, ["temperature", "power", "humidity"]);
    }

    #[test]
    fn descriptor_keeps_extra_attributes() {
        let json = r#"{"property":"temperature","unit":"°C","access":1}"#;
        let descriptor: PropertyDescriptor = serde_json::from_str(json).unwrap();

        assert_eq!(descriptor.property(), "temperature");
        assert_eq!(descriptor.attribute("unit"), Some(&json!("°C")));
        assert_eq!(descriptor.attribute("access"), Some(&json!(1)));

        let back = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(back, json!({"property":"temperature","unit":"°C","access":1}));
    }

    #[test]
    fn descriptor_without_property_declares_nothing() {
        let json = r#"{"type":"switch","features":[{"property":"state"}]}"#;
        let descriptor: PropertyDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.property(), "");

        let schema = CapabilitySchema::new(vec![descriptor, PropertyDescriptor::new("power")]);
        assert_eq!(schema.properties().collect::<Vec<_>>(), ["power"]);
        assert!(!schema.declares(""));
        assert_eq!(schema.len(), 2);

        let persisted = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            persisted,
            json!([{"type":"switch","features":[{"property":"state"}]},{"property":"power"}])
        );
    }

    #[test]
    fn schema_serializes_as_plain_list() {
        let schema = CapabilitySchema::new(vec![
            PropertyDescriptor::new("power").with_attribute("type", "binary"),
        ]);
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value, json!([{"property":"power","type":"binary"}]));
    }

    #[test]
    fn empty_schema() {
        let schema = CapabilitySchema::default();
        assert!(schema.is_empty());
        assert!(!schema.declares("power"));
    }
}
