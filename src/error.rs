// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the bridge.
//!
//! Most failures in this crate are per-message or per-operation: they are
//! logged where they happen and never abort the surrounding work. The types
//! here exist so that the collaborators (transport, store, payload decoding)
//! can report *what* failed before the caller decides to swallow it.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while talking to the MQTT broker.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while decoding an inbound payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error occurred while writing to the document store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors related to the MQTT transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT client request failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Subscription was refused or could not be sent.
    #[error("subscription to {topic} failed: {message}")]
    SubscriptionFailed {
        /// The topic that could not be subscribed.
        topic: String,
        /// Description of the failure.
        message: String,
    },
}

/// Errors related to decoding announcement and state payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON decoding failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload decoded but had the wrong shape.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// Errors reported by a document store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write.
    #[error("write rejected on {collection}: {message}")]
    Rejected {
        /// Collection the write targeted.
        collection: String,
        /// Reason given by the store.
        message: String,
    },

    /// The store call did not complete in time.
    #[error("store call timed out after {0} ms")]
    Timeout(u64),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::Rejected {
            collection: "current_state".to_string(),
            message: "duplicate key".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "write rejected on current_state: duplicate key"
        );
    }

    #[test]
    fn error_from_store_error() {
        let err: Error = StoreError::Timeout(5000).into();
        assert!(matches!(err, Error::Store(StoreError::Timeout(5000))));
    }

    #[test]
    fn parse_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ParseError = json_err.into();
        assert!(err.to_string().starts_with("JSON parse error"));
    }

    #[test]
    fn subscription_failed_display() {
        let err = ProtocolError::SubscriptionFailed {
            topic: "tplink2mqtt/lamp".to_string(),
            message: "request channel closed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "subscription to tplink2mqtt/lamp failed: request channel closed"
        );
    }
}
