// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence of device identities and state deltas.
//!
//! - [`SnapshotWriter`] upserts a device's identity fields into its
//!   current-state document when the device is first announced.
//! - [`DeltaWriter`] projects a state payload through the device's schema
//!   and writes it twice: as latest values on the current-state document and
//!   as appended observations in the device's history bucket for the day.
//!
//! Store failures never propagate out of the writers: each one is logged
//! and reported back to the caller, and the remaining writes still run.
//!
//! Any declared property may be persisted, including names the snapshot
//! writer also uses such as `model` or `type`: a device reporting those
//! overwrites the announced identity value on its current-state document.
//! Only the fields in [`CURRENT_STATE_FIELDS`] and [`HISTORY_BUCKET_FIELDS`]
//! are kept out of the collection that owns them.

mod delta;
mod snapshot;

pub use delta::{DeltaReport, DeltaWriter, Selection, history_bucket, history_index};
pub use snapshot::SnapshotWriter;

/// Fields the delta writer sets itself on every current-state write.
///
/// A declared property with one of these names is left out of the
/// current-state update; it is still appended to the history bucket.
pub const CURRENT_STATE_FIELDS: &[&str] = &["_id", "update_ts", "friendly_name"];

/// Fields that key a history bucket.
///
/// A declared property with one of these names is left out of the history
/// append; it is still written to the current-state document.
pub const HISTORY_BUCKET_FIELDS: &[&str] = &["_id", "device_id", "friendly_name", "y", "m", "d"];

/// Returns `true` if `property` can be used as a document field name.
pub(crate) fn is_field_name(property: &str) -> bool {
    !property.is_empty() && !property.starts_with('$') && !property.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names() {
        assert!(is_field_name("power"));
        assert!(is_field_name("current_consumption"));
        assert!(is_field_name("model"));
        assert!(!is_field_name("$set"));
        assert!(!is_field_name("a.b"));
        assert!(!is_field_name(""));
    }
}
