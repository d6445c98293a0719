//! MQTT broker session lifecycle.
//!
//! Owns the client, the availability announcement, and the last will. The
//! session connects lazily from the scrape loop, and reconnection is always
//! loop-driven: the event-loop driver task exits on the first poll error
//! instead of retrying, so every Connecting transition goes through
//! [`MqttSession::ensure_connected`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, LastWill, LastWillProperties, Packet};
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};

const AVAILABILITY_ONLINE: &[u8] = b"online";
const AVAILABILITY_OFFLINE: &[u8] = b"offline";

/// Broker-side delay before the will is published on an unclean disconnect,
/// so a brief network blip does not flap the availability topic.
const WILL_DELAY_SECS: u32 = 5;

const DEFAULT_PORT: u16 = 1883;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Why a connection attempt did not reach Connected.
enum ConnectFailure {
    Refused(String),
    Other(String),
}

/// MQTT session manager: lazy connect, availability messaging, graceful
/// disconnect. Exactly one task drives this; no internal locking beyond the
/// shared connected flag the driver task clears on failure.
pub struct MqttSession {
    options: MqttOptions,
    server: String,
    availability_topic: String,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl MqttSession {
    /// Build a session from the configuration. The last will is registered
    /// here, at session creation, and never changes.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let (host, port) = split_address(&config.mqtt_server)?;
        let availability_topic = format!("{}available", config.mqtt_topic);

        let client_id = format!("mqtt-bridge-prometheus-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        if !config.mqtt_username.is_empty() {
            options.set_credentials(config.mqtt_username.clone(), config.mqtt_password.clone());
        }

        let will_properties = LastWillProperties {
            delay_interval: Some(WILL_DELAY_SECS),
            payload_format_indicator: None,
            message_expiry_interval: None,
            content_type: None,
            response_topic: None,
            correlation_data: None,
            user_properties: Vec::new(),
        };
        options.set_last_will(LastWill::new(
            availability_topic.clone(),
            AVAILABILITY_OFFLINE.to_vec(),
            QoS::AtLeastOnce,
            true,
            Some(will_properties),
        ));

        Ok(Self {
            options,
            server: config.mqtt_server.clone(),
            availability_topic,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            driver: None,
        })
    }

    /// Whether the session is currently Connected.
    pub fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    /// Connect if not already connected. Returns whether the session is
    /// Connected afterwards; a failed attempt leaves it Disconnected and is
    /// logged (warn for refusals, error otherwise), never propagated.
    ///
    /// On success the retained "online" availability message is published
    /// immediately, as a synchronous post-connect step.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        self.reset();

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 16);

        match timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(ConnectFailure::Refused(reason))) => {
                tracing::warn!(server = %self.server, reason = %reason, "mqtt connection refused");
                return false;
            }
            Ok(Err(ConnectFailure::Other(reason))) => {
                tracing::error!(server = %self.server, reason = %reason, "mqtt connection failed");
                return false;
            }
            Err(_) => {
                tracing::warn!(server = %self.server, "mqtt connect timed out");
                return false;
            }
        }

        self.connected.store(true, Ordering::SeqCst);

        let connected = Arc::clone(&self.connected);
        self.driver = Some(tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        tracing::debug!(error = %e, "mqtt event loop stopped");
                        break;
                    }
                }
            }
        }));

        if let Err(e) = client
            .publish(
                self.availability_topic.clone(),
                QoS::AtLeastOnce,
                true,
                AVAILABILITY_ONLINE.to_vec(),
            )
            .await
        {
            tracing::warn!(error = %e, "failed to publish availability");
        }

        self.client = Some(client);
        tracing::info!(server = %self.server, "mqtt connected");
        true
    }

    /// Fire-and-forget publish of a numeric sample. Only call when the
    /// session is known Connected.
    pub async fn publish(&self, topic: &str, value: f64) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::mqtt("not connected"))?;
        client
            .publish(
                topic.to_string(),
                QoS::AtMostOnce,
                false,
                value.to_string().into_bytes(),
            )
            .await
            .map_err(|e| Error::Mqtt(e.to_string()))
    }

    /// Graceful shutdown: announce "offline", send DISCONNECT, let the event
    /// loop drain, and tear down. No-op when never connected.
    ///
    /// A clean DISCONNECT makes the broker discard the will, and rumqttc
    /// exposes no "disconnect with will" reason code, so the retained
    /// "offline" announcement is published explicitly before disconnecting.
    pub async fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = client
                .publish(
                    self.availability_topic.clone(),
                    QoS::AtLeastOnce,
                    true,
                    AVAILABILITY_OFFLINE.to_vec(),
                )
                .await
            {
                tracing::warn!(error = %e, "failed to publish availability");
            }
            if let Err(e) = client.disconnect().await {
                tracing::warn!(error = %e, "mqtt disconnect failed");
            }
        }

        if let Some(mut driver) = self.driver.take() {
            // Give the event loop a moment to flush the DISCONNECT packet.
            if timeout(Duration::from_secs(1), &mut driver).await.is_err() {
                driver.abort();
            }
        }

        tracing::info!("mqtt disconnected");
    }

    /// Drop any stale client/driver before a fresh connection attempt.
    fn reset(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.client = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Drive the event loop until the broker acknowledges the connection.
async fn wait_for_connack(eventloop: &mut EventLoop) -> std::result::Result<(), ConnectFailure> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(ConnectFailure::Refused(format!(
                    "broker rejected connection: {:?}",
                    ack.code
                )));
            }
            Ok(_) => {}
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(ConnectFailure::Refused(e.to_string()));
            }
            Err(e) => return Err(ConnectFailure::Other(e.to_string())),
        }
    }
}

/// Split `host` or `host:port` into host and port (default 1883).
///
/// IPv6 literals use the usual bracket form: `[::1]` or `[::1]:1884`. A bare
/// multi-colon literal is taken whole with the default port rather than
/// misreading its tail as a port number.
fn split_address(server: &str) -> Result<(String, u16)> {
    if let Some(rest) = server.strip_prefix('[') {
        let Some((host, after)) = rest.split_once(']') else {
            return Err(Error::config(format!("invalid mqtt_server '{}'", server)));
        };
        return match after.strip_prefix(':') {
            Some(port) => port
                .parse::<u16>()
                .map(|port| (host.to_string(), port))
                .map_err(|_| Error::config(format!("invalid mqtt_server port in '{}'", server))),
            None if after.is_empty() => Ok((host.to_string(), DEFAULT_PORT)),
            None => Err(Error::config(format!("invalid mqtt_server '{}'", server))),
        };
    }

    if server.matches(':').count() > 1 {
        return Ok((server.to_string(), DEFAULT_PORT));
    }

    match server.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => port
            .parse::<u16>()
            .map(|port| (host.to_string(), port))
            .map_err(|_| Error::config(format!("invalid mqtt_server port in '{}'", server))),
        _ => Ok((server.to_string(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(server: &str, prefix: &str) -> BridgeConfig {
        BridgeConfig {
            mqtt_server: server.to_string(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_topic: prefix.to_string(),
            update_rate: 60,
            logging: None,
            victoriametrics_prom_import_url: None,
            scrapers: Vec::new(),
        }
    }

    #[test]
    fn test_split_address() {
        assert_eq!(
            split_address("broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            split_address("broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert!(split_address("broker.local:notaport").is_err());
    }

    #[test]
    fn test_split_address_ipv6() {
        assert_eq!(split_address("::1").unwrap(), ("::1".to_string(), 1883));
        assert_eq!(split_address("[::1]").unwrap(), ("::1".to_string(), 1883));
        assert_eq!(
            split_address("[::1]:1884").unwrap(),
            ("::1".to_string(), 1884)
        );
        assert_eq!(
            split_address("fe80::1").unwrap(),
            ("fe80::1".to_string(), 1883)
        );
        assert!(split_address("[::1").is_err());
        assert!(split_address("[::1]x").is_err());
    }

    #[test]
    fn test_availability_topic_uses_prefix() {
        let session = MqttSession::new(&config("localhost", "home/")).unwrap();
        assert_eq!(session.availability_topic, "home/available");

        let session = MqttSession::new(&config("localhost", "")).unwrap();
        assert_eq!(session.availability_topic, "available");
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = MqttSession::new(&config("localhost", "")).unwrap();
        assert!(!session.is_connected());
    }

    fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Minimal broker stand-in: acknowledge the connection, then record
    /// every byte the client sends until it goes away.
    async fn connack_stub(listener: tokio::net::TcpListener) -> Vec<u8> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];

        // Read the CONNECT, answer with a success CONNACK
        // (session_present = 0, reason = 0, no properties).
        let _ = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(&[0x20, 0x03, 0x00, 0x00, 0x00])
            .await
            .unwrap();

        let mut received = Vec::new();
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
        received
    }

    #[tokio::test]
    async fn test_graceful_disconnect_announces_offline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(connack_stub(listener));

        let mut session = MqttSession::new(&config(&addr.to_string(), "home/")).unwrap();
        assert!(session.ensure_connected().await);
        assert!(session.is_connected());

        session.disconnect().await;
        assert!(!session.is_connected());

        // No further publishes once the session is torn down.
        assert!(session.publish("home/temp", 21.5).await.is_err());

        let received = server.await.unwrap();
        let online = position(&received, b"online").expect("online announced on connect");
        let offline = position(&received, b"offline").expect("offline announced on shutdown");
        assert!(offline > online, "offline must follow online");
        // A DISCONNECT (0xE0) follows the offline announcement.
        assert!(received[offline..].contains(&0xE0));
    }

    #[tokio::test]
    async fn test_refused_broker_leaves_session_disconnected() {
        // Port 1 is never listening; connect fails fast with refused.
        let mut session = MqttSession::new(&config("127.0.0.1:1", "")).unwrap();
        assert!(!session.ensure_connected().await);
        assert!(!session.is_connected());

        // Disconnect without ever connecting is a no-op.
        session.disconnect().await;
    }
}
