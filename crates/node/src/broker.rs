//! One broker channel, instantiated twice (primary/backup). Each channel
//! owns its own rumqttc client + event loop and its own connection state;
//! the two never share anything. Publishes are at-most-once: a failed
//! publish reports failure but never changes connection state — state only
//! moves on explicit connect results and event-loop errors.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

/// Fixed delay between reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// Consecutive failures per `ensure_connected` call before yielding back to
/// the main loop (which will call again on its next tick).
pub const MAX_CONNECT_ATTEMPTS: u32 = 6;

const CONNACK_WAIT: Duration = Duration::from_secs(10);
const POLL_BUDGET: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Identity and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerId {
    Primary,
    Backup,
}

impl BrokerId {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

/// Outbound telemetry/ack topic: `<prefix>/<unit_id>`.
pub fn telemetry_topic(prefix: &str, unit_id: &str) -> String {
    format!("{prefix}/{unit_id}")
}

/// Inbound command topic: `<prefix>/<unit_id>/control`.
pub fn control_topic(prefix: &str, unit_id: &str) -> String {
    format!("{prefix}/{unit_id}/control")
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

pub struct BrokerChannel {
    id: BrokerId,
    host: String,
    port: u16,
    client_id: String,
    credentials: Option<(String, String)>,
    subscribe_topic: String,
    publish_topic: String,
    conn: Option<(AsyncClient, EventLoop)>,
    state: ConnState,
}

impl BrokerChannel {
    pub fn new(
        id: BrokerId,
        host: &str,
        port: u16,
        client_id: &str,
        credentials: Option<(String, String)>,
        subscribe_topic: &str,
        publish_topic: &str,
    ) -> Self {
        Self {
            id,
            host: host.to_string(),
            port,
            client_id: client_id.to_string(),
            credentials,
            subscribe_topic: subscribe_topic.to_string(),
            publish_topic: publish_topic.to_string(),
            conn: None,
            state: ConnState::Disconnected,
        }
    }

    pub fn id(&self) -> BrokerId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    /// If disconnected, attempt connect+subscribe up to
    /// `MAX_CONNECT_ATTEMPTS` times with a fixed backoff, then yield.
    /// Returns the final connected state.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            if self.try_connect().await {
                return true;
            }
            warn!(
                broker = self.id.label(),
                host = %self.host,
                attempt,
                "connect failed"
            );
            if attempt < MAX_CONNECT_ATTEMPTS {
                sleep(RECONNECT_BACKOFF).await;
            }
        }
        false
    }

    async fn try_connect(&mut self) -> bool {
        self.state = ConnState::Connecting;
        self.conn = None;

        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some((user, pass)) = &self.credentials {
            if !user.is_empty() {
                options.set_credentials(user, pass);
            }
        }

        let (client, mut eventloop) = AsyncClient::new(options, 20);

        // Queue the subscription up front; it flushes right after ConnAck.
        if client
            .subscribe(&self.subscribe_topic, QoS::AtMostOnce)
            .await
            .is_err()
        {
            self.state = ConnState::Disconnected;
            return false;
        }

        let deadline = Instant::now() + CONNACK_WAIT;
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.state = ConnState::Disconnected;
                return false;
            }
            match timeout(deadline - now, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!(
                        broker = self.id.label(),
                        host = %self.host,
                        topic = %self.subscribe_topic,
                        "connected and subscribed"
                    );
                    self.conn = Some((client, eventloop));
                    self.state = ConnState::Connected;
                    return true;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    warn!(broker = self.id.label(), "connect error: {e}");
                    self.state = ConnState::Disconnected;
                    return false;
                }
                Err(_) => {
                    self.state = ConnState::Disconnected;
                    return false;
                }
            }
        }
    }

    /// One bounded event-loop turn: delivers a buffered inbound payload if
    /// one arrived and lets the transport do its keep-alive bookkeeping.
    /// An event-loop error marks the channel disconnected.
    pub async fn poll(&mut self) -> Option<Vec<u8>> {
        let result = {
            let (_, eventloop) = self.conn.as_mut()?;
            timeout(POLL_BUDGET, eventloop.poll()).await
        };

        match result {
            Ok(Ok(Event::Incoming(Packet::Publish(p)))) => Some(p.payload.to_vec()),
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                warn!(broker = self.id.label(), "broker closed the connection");
                self.conn = None;
                self.state = ConnState::Disconnected;
                None
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(broker = self.id.label(), "connection lost: {e}");
                self.conn = None;
                self.state = ConnState::Disconnected;
                None
            }
            Err(_) => None, // nothing pending within the poll budget
        }
    }

    /// Best-effort at-most-once publish on this channel's outbound topic.
    /// A no-op returning `false` when not connected; a send failure also
    /// returns `false` without touching connection state.
    pub async fn publish(&self, payload: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some((client, _)) = self.conn.as_ref() else {
            return false;
        };
        client
            .publish(
                &self.publish_topic,
                QoS::AtMostOnce,
                false,
                payload.as_bytes().to_vec(),
            )
            .await
            .is_ok()
    }

    #[cfg(test)]
    fn force_connected(&mut self, client: AsyncClient, eventloop: EventLoop) {
        self.conn = Some((client, eventloop));
        self.state = ConnState::Connected;
    }
}

// ---------------------------------------------------------------------------
// Response seam
// ---------------------------------------------------------------------------

/// The slice of a channel the command engine sees: publish one response
/// payload back toward whoever sent the command.
#[allow(async_fn_in_trait)]
pub trait ResponseChannel {
    async fn respond(&mut self, payload: &str) -> bool;
}

impl ResponseChannel for BrokerChannel {
    async fn respond(&mut self, payload: &str) -> bool {
        self.publish(payload).await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
