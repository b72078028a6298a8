use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Outgoing;

use super::endpoint::MqttEndpoint;
use super::{DetectionMessage, DetectionPublisher};
use crate::detect::DetectionResult;

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const REQUEST_CAPACITY: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Settings for one MQTT session.
#[derive(Clone, Debug)]
pub struct MqttSessionConfig {
    pub endpoint: MqttEndpoint,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive: Duration,
    /// Numeric session id; selects the topic namespace.
    pub cid: u16,
}

impl MqttSessionConfig {
    pub fn availability_topic(&self) -> String {
        format!("{}/{}/status", self.topic_prefix, self.cid)
    }

    pub fn detection_topic(&self, sender_stamp: u32) -> String {
        format!("{}/{}/detection/{}", self.topic_prefix, self.cid, sender_stamp)
    }
}

/// Clonable handle that ends a session's active state (e.g. from Ctrl-C).
#[derive(Clone, Debug)]
pub struct SessionStopHandle {
    running: Arc<AtomicBool>,
}

impl SessionStopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// MQTT-backed pub/sub session.
///
/// The rumqttc event loop is driven on a dedicated thread; reconnection is
/// left to rumqttc. The session stays active until stopped.
pub struct MqttSession {
    client: Client,
    config: MqttSessionConfig,
    running: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
    published: u64,
    dropped: u64,
}

impl MqttSession {
    pub fn open(config: MqttSessionConfig) -> Result<Self> {
        let availability_topic = config.availability_topic();

        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.endpoint.host.clone(),
            config.endpoint.port,
        );
        options.set_keep_alive(config.keep_alive);
        options.set_clean_start(true);
        let will = LastWill::new(
            availability_topic.clone(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        );
        options.set_last_will(will);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let connection_handle = spawn_event_loop(connection, Arc::clone(&running))?;

        if let Err(e) = client.try_publish(
            availability_topic.clone(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_ONLINE.as_bytes().to_vec(),
        ) {
            log::warn!("failed to queue online status: {}", e);
        }
        log::info!(
            "MQTT session {} opened (broker {}:{}, topic prefix {})",
            config.cid,
            config.endpoint.host,
            config.endpoint.port,
            config.topic_prefix
        );

        Ok(Self {
            client,
            config,
            running,
            connection_handle: Some(connection_handle),
            published: 0,
            dropped: 0,
        })
    }

    pub fn stop_handle(&self) -> SessionStopHandle {
        SessionStopHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Messages handed to the client.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Messages the client refused (queue full, client closed).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Announce `offline`, disconnect and join the event loop thread.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        self.stop();
        if let Err(e) = self.client.try_publish(
            self.config.availability_topic(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        ) {
            log::debug!("failed to queue offline status: {}", e);
        }
        // Without a queued disconnect a connected event loop never exits.
        let disconnected = self.client.try_disconnect();
        if disconnected.is_ok() {
            let _ = handle.join();
        } else {
            log::warn!(
                "MQTT session {}: disconnect not queued; not waiting for the event loop",
                self.config.cid
            );
        }
        log::info!(
            "MQTT session {} closed ({} published, {} dropped)",
            self.config.cid,
            self.published,
            self.dropped
        );
        disconnected.context("failed to disconnect MQTT client")
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::debug!("MQTT session shutdown: {:#}", e);
        }
    }
}

impl DetectionPublisher for MqttSession {
    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn publish(&mut self, result: &DetectionResult, sent: SystemTime, sender_stamp: u32) {
        let message = DetectionMessage::new(result, sent, sender_stamp);
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                log::debug!("detection not encoded: {}", e);
                self.dropped += 1;
                return;
            }
        };
        match self.client.try_publish(
            self.config.detection_topic(sender_stamp),
            QoS::AtMostOnce,
            false,
            payload,
        ) {
            Ok(()) => self.published += 1,
            Err(e) => {
                log::debug!("detection dropped: {}", e);
                self.dropped += 1;
            }
        }
    }
}

fn spawn_event_loop(mut connection: Connection, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mqtt-session".to_string())
        .spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MQTT connection error: {}", e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        })
        .context("failed to spawn MQTT event loop thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> MqttSessionConfig {
        MqttSessionConfig {
            endpoint: MqttEndpoint {
                host: "127.0.0.1".to_string(),
                port: 1,
            },
            client_id: "shm-perception-test".to_string(),
            topic_prefix: "opendlv".to_string(),
            keep_alive: Duration::from_secs(30),
            cid: 111,
        }
    }

    #[test]
    fn topics_are_namespaced_by_session_id() {
        let config = unreachable_config();
        assert_eq!(config.availability_topic(), "opendlv/111/status");
        assert_eq!(config.detection_topic(3), "opendlv/111/detection/3");
    }

    #[test]
    fn session_stays_active_until_stopped() -> Result<()> {
        let mut session = MqttSession::open(unreachable_config())?;
        assert!(session.is_active());

        // No broker: publishing must neither block nor fail loudly.
        session.publish(&DetectionResult::default(), SystemTime::now(), 0);
        assert_eq!(session.published() + session.dropped(), 1);

        session.stop_handle().stop();
        assert!(!session.is_active());
        session.close()
    }

    #[test]
    fn close_returns_when_request_queue_is_full() {
        let mut session = MqttSession::open(unreachable_config()).expect("open session");

        // Nothing drains the queue while the broker is unreachable.
        for _ in 0..(REQUEST_CAPACITY * 4) {
            session.publish(&DetectionResult::default(), SystemTime::now(), 0);
        }
        assert!(session.dropped() > 0);

        let started = std::time::Instant::now();
        assert!(session.close().is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
