// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT connection driving the router.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use devstate_bridge::store::MemoryStore;
//! use devstate_bridge::transport::MqttBridge;
//!
//! # async fn example() -> Result<(), devstate_bridge::ProtocolError> {
//! let bridge = MqttBridge::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build(Arc::new(MemoryStore::new()))
//!     .await?;
//!
//! if bridge.is_connected() {
//!     println!("Bridging device state");
//! }
//!
//! bridge.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, SubAck, SubscribeReasonCode};
use tokio::sync::{Mutex as AsyncMutex, oneshot};

use super::Subscriber;
use crate::config::BridgeConfig;
use crate::error::ProtocolError;
use crate::registry::DeviceRegistry;
use crate::router::{MessageHandler, TopicRouter};
use crate::store::DocumentStore;

/// Global counter for generating unique client IDs.
static BRIDGE_CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Connection settings for the MQTT bridge.
#[derive(Debug, Clone)]
struct MqttBridgeConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
    reconnect_delay: Duration,
    client_id_prefix: String,
}

impl Default for MqttBridgeConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            client_id_prefix: "devstate".to_string(),
        }
    }
}

/// Matches subscribe requests to the packet ids the broker acknowledges.
///
/// `rumqttc` assigns packet ids inside the event loop and reports them
/// through `Outgoing::Subscribe` in request order, so topics are queued in
/// the order their requests enter the client channel.
#[derive(Debug, Default)]
struct SubscriptionTracker {
    queued: Mutex<VecDeque<String>>,
    in_flight: Mutex<HashMap<u16, String>>,
}

impl SubscriptionTracker {
    fn queue(&self, topic: &str) {
        self.queued.lock().push_back(topic.to_string());
    }

    /// Drops the most recently queued topic after its request failed.
    fn cancel_last(&self) {
        self.queued.lock().pop_back();
    }

    /// Records the packet id of the oldest queued request.
    fn sent(&self, pkid: u16) {
        if let Some(topic) = self.queued.lock().pop_front() {
            self.in_flight.lock().insert(pkid, topic);
        }
    }

    /// Returns the topic of an acknowledged request.
    fn acknowledged(&self, pkid: u16) -> Option<String> {
        self.in_flight.lock().remove(&pkid)
    }
}

/// [`Subscriber`] backed by a `rumqttc` client.
#[derive(Debug, Clone)]
pub struct MqttSubscriber {
    client: AsyncClient,
    subscriptions: Arc<SubscriptionTracker>,
    /// Keeps queue order and channel order identical.
    send_lock: Arc<AsyncMutex<()>>,
}

impl MqttSubscriber {
    /// Wraps an MQTT client.
    #[must_use]
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            subscriptions: Arc::default(),
            send_lock: Arc::default(),
        }
    }
}

#[async_trait]
impl Subscriber for MqttSubscriber {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        let _guard = self.send_lock.lock().await;
        self.subscriptions.queue(topic);
        self.client.subscribe(topic, qos).await.map_err(|e| {
            self.subscriptions.cancel_last();
            ProtocolError::Mqtt(e)
        })
    }
}

/// Resolves a SubAck against its request and rolls back refused device
/// subscriptions.
///
/// Returns the error for a refused subscription.
fn handle_suback(
    router: &TopicRouter,
    subscriptions: &SubscriptionTracker,
    suback: &SubAck,
) -> Option<ProtocolError> {
    let topic = subscriptions.acknowledged(suback.pkid);
    let refused = suback
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure));

    if !refused {
        tracing::debug!(pkid = suback.pkid, topic = ?topic, "MQTT subscription acknowledged");
        return None;
    }

    let Some(topic) = topic else {
        tracing::warn!(pkid = suback.pkid, "MQTT subscription refused for unknown request");
        return None;
    };

    let error = ProtocolError::SubscriptionFailed {
        topic: topic.clone(),
        message: "refused by broker".to_string(),
    };
    tracing::error!(error = %error, "MQTT subscription refused");
    router.subscription_refused(&topic);
    Some(error)
}

/// A running bridge between an MQTT broker and a document store.
///
/// The bridge subscribes to the announcement topic on every (re)connect,
/// hands each inbound publish to the [`TopicRouter`] on its own task and
/// keeps polling the connection after errors so `rumqttc` can reconnect.
///
/// `MqttBridge` is cheaply cloneable (via `Arc`).
#[derive(Clone)]
pub struct MqttBridge {
    inner: Arc<MqttBridgeInner>,
}

struct MqttBridgeInner {
    client: AsyncClient,
    router: Arc<TopicRouter>,
    subscriptions: Arc<SubscriptionTracker>,
    config: MqttBridgeConfig,
    connected: AtomicBool,
    shutting_down: AtomicBool,
}

impl MqttBridge {
    /// Creates a new builder for configuring the bridge.
    #[must_use]
    pub fn builder() -> MqttBridgeBuilder {
        MqttBridgeBuilder::default()
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the router handling inbound messages.
    #[must_use]
    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.inner.router
    }

    /// Disconnects from the broker and stops the event loop.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be sent.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner
            .client
            .disconnect()
            .await
            .map_err(ProtocolError::Mqtt)?;

        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for MqttBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBridge")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for [`MqttBridge`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use devstate_bridge::BridgeConfig;
/// use devstate_bridge::store::MemoryStore;
/// use devstate_bridge::transport::MqttBridge;
///
/// # async fn example() -> Result<(), devstate_bridge::ProtocolError> {
/// let bridge = MqttBridge::builder()
///     .host("192.168.1.50")
///     .keep_alive(Duration::from_secs(60))
///     .reconnect_delay(Duration::from_secs(2))
///     .bridge_config(BridgeConfig::builder().topic_prefix("tplink2mqtt").build())
///     .build(Arc::new(MemoryStore::new()))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttBridgeBuilder {
    config: MqttBridgeConfig,
    bridge: BridgeConfig,
    registry: Option<Arc<DeviceRegistry>>,
}

impl MqttBridgeBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the initial connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the pause before polling again after a connection error
    /// (default: 5 seconds).
    #[must_use]
    pub fn reconnect_delay(mut self, duration: Duration) -> Self {
        self.config.reconnect_delay = duration;
        self
    }

    /// Sets the MQTT client id prefix (default: `devstate`).
    #[must_use]
    pub fn client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.client_id_prefix = prefix.into();
        self
    }

    /// Sets the topic and persistence configuration.
    #[must_use]
    pub fn bridge_config(mut self, config: BridgeConfig) -> Self {
        self.bridge = config;
        self
    }

    /// Uses an existing device registry instead of a fresh one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Connects to the broker and starts bridging into `store`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn build(self, store: Arc<dyn DocumentStore>) -> Result<MqttBridge, ProtocolError> {
        if self.config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let counter = BRIDGE_CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!(
            "{}_{}_{}",
            self.config.client_id_prefix,
            std::process::id(),
            counter
        );

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        let subscriber = MqttSubscriber::new(client.clone());
        let subscriptions = Arc::clone(&subscriber.subscriptions);
        let router = Arc::new(TopicRouter::new(
            Arc::new(self.bridge),
            self.registry.unwrap_or_default(),
            store,
            Arc::new(subscriber),
        ));

        let bridge = MqttBridge {
            inner: Arc::new(MqttBridgeInner {
                client,
                router,
                subscriptions,
                config: self.config.clone(),
                connected: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();

        let bridge_clone = bridge.clone();
        tokio::spawn(async move {
            handle_bridge_events(event_loop, bridge_clone, connack_tx).await;
        });

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
                Ok(bridge)
            }
            Ok(Err(_)) => Err(ProtocolError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => {
                bridge.inner.shutting_down.store(true, Ordering::Release);
                Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

/// Polls the MQTT connection until the bridge shuts down.
async fn handle_bridge_events(
    mut event_loop: EventLoop,
    bridge: MqttBridge,
    connack_tx: oneshot::Sender<()>,
) {
    use rumqttc::{Event, Outgoing, Packet};

    let mut connack_tx = Some(connack_tx);
    let inner = &bridge.inner;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }

                // Subscribing goes through the client's request channel, which
                // this loop drains, so it must not be awaited here.
                let router = Arc::clone(&inner.router);
                tokio::spawn(async move {
                    if let Err(e) = router.on_connected().await {
                        tracing::error!(error = %e, "Failed to subscribe to device announcements");
                    }
                });
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                inner.subscriptions.sent(pkid);
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                handle_suback(&inner.router, &inner.subscriptions, &suback);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "MQTT message received"
                );
                let router = Arc::clone(&inner.router);
                tokio::spawn(async move {
                    router.route(&publish.topic, &publish.payload).await;
                });
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                inner.connected.store(false, Ordering::Release);
                inner.router.on_disconnected("broker closed the session");
                if inner.shutting_down.load(Ordering::Acquire) {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("MQTT bridge disconnected");
                inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                inner.connected.store(false, Ordering::Release);
                if inner.shutting_down.load(Ordering::Acquire) || connack_tx.is_some() {
                    tracing::error!(error = %e, "MQTT bridge event loop error");
                    break;
                }
                inner.router.on_disconnected(&e.to_string());
                tokio::time::sleep(inner.config.reconnect_delay).await;
            }
        }
    }
}
