// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `devstate_bridge` - persist MQTT device telemetry into a document store.
//!
//! The bridge listens for a device list announced on a well-known topic,
//! registers each device it has not seen before, and subscribes to that
//! device's state topic. Every state message is then projected through the
//! device's announced capability schema and written twice:
//!
//! - **current state**: one document per device holding the latest value of
//!   every property, its identity fields and the last update time;
//! - **historical state**: one bucket per device per UTC day where each
//!   property accumulates an append-only list of `{ts, v}` observations.
//!
//! Both writes are idempotent upserts, so re-delivered messages converge.
//! Store and decode failures are logged and never stop the bridge.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use devstate_bridge::BridgeConfig;
//! use devstate_bridge::store::MemoryStore;
//! use devstate_bridge::transport::MqttBridge;
//!
//! #[tokio::main]
//! async fn main() -> devstate_bridge::Result<()> {
//!     let bridge = MqttBridge::builder()
//!         .host("192.168.1.50")
//!         .credentials("user", "password")
//!         .bridge_config(BridgeConfig::default())
//!         .build(Arc::new(MemoryStore::new()))
//!         .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
//!     bridge.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Routing Without a Broker
//!
//! The [`TopicRouter`] only depends on the [`Subscriber`](transport::Subscriber)
//! and [`DocumentStore`](store::DocumentStore) traits, so it can be driven
//! directly:
//!
//! ```ignore
//! let router = TopicRouter::new(config, registry, store, subscriber);
//! router.route("tplink2mqtt/bridge/devices", announcement).await;
//! router.route("tplink2mqtt/desk_plug", br#"{"power":"on"}"#).await;
//! ```

mod capabilities;
pub mod config;
mod device;
pub mod error;
pub mod payload;
mod registry;
pub mod router;
pub mod store;
pub mod transport;
pub mod writer;

pub use capabilities::{CapabilitySchema, PropertyDescriptor};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use device::{Device, DeviceIdentity, sanitize_friendly_name};
pub use error::{Error, ParseError, ProtocolError, Result, StoreError};
pub use registry::DeviceRegistry;
pub use router::{AnnouncementOutcome, MessageHandler, Route, TopicRouter};
#[cfg(feature = "mongodb")]
pub use store::MongoStore;
pub use store::{DocumentStore, MemoryStore};
pub use transport::{MqttBridge, MqttBridgeBuilder, Subscriber};
pub use writer::{DeltaReport, DeltaWriter, SnapshotWriter};
