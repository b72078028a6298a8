//! Detection publishing.
//!
//! The acquisition loop only needs two things from a message bus: whether the
//! session is still running, and a fire-and-forget send. `DetectionPublisher`
//! captures exactly that; `MqttSession` is the production implementation.

mod endpoint;
mod mqtt;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::detect::DetectionResult;

pub use endpoint::{parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint};
pub use mqtt::{MqttSession, MqttSessionConfig, SessionStopHandle};

/// Narrow pub/sub session contract used by the acquisition loop.
pub trait DetectionPublisher {
    /// Whether the underlying session considers itself running.
    fn is_active(&self) -> bool;

    /// Send one result. Best effort: no acknowledgment, no retry, and transport
    /// failures are not reported to the caller.
    fn publish(&mut self, result: &DetectionResult, sent: SystemTime, sender_stamp: u32);
}

/// Wall-clock send time split into seconds and microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStamp {
    pub seconds: i64,
    pub microseconds: i64,
}

impl TimeStamp {
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self {
                seconds: since.as_secs() as i64,
                microseconds: since.subsec_micros() as i64,
            },
            // Clock before the epoch; keep the sign on both parts.
            Err(err) => {
                let before = err.duration();
                Self {
                    seconds: -(before.as_secs() as i64),
                    microseconds: -(before.subsec_micros() as i64),
                }
            }
        }
    }
}

/// Wire record for one published detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionMessage {
    pub sender_stamp: u32,
    pub sent: TimeStamp,
    pub azimuth_angle: f32,
    pub distance: f32,
}

impl DetectionMessage {
    pub fn new(result: &DetectionResult, sent: SystemTime, sender_stamp: u32) -> Self {
        Self {
            sender_stamp,
            sent: TimeStamp::from_system_time(sent),
            azimuth_angle: result.azimuth_angle,
            distance: result.distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timestamp_splits_seconds_and_micros() {
        let time = UNIX_EPOCH + Duration::from_micros(1_700_000_000_123_456);
        let stamp = TimeStamp::from_system_time(time);
        assert_eq!(stamp.seconds, 1_700_000_000);
        assert_eq!(stamp.microseconds, 123_456);
    }

    #[test]
    fn detection_message_serializes_expected_fields() -> anyhow::Result<()> {
        let time = UNIX_EPOCH + Duration::from_secs(42);
        let message = DetectionMessage::new(&DetectionResult::new(0.25, 3.5), time, 7);

        let json: serde_json::Value = serde_json::to_value(&message)?;
        assert_eq!(json["sender_stamp"], 7);
        assert_eq!(json["sent"]["seconds"], 42);
        assert_eq!(json["sent"]["microseconds"], 0);
        assert_eq!(json["azimuth_angle"], 0.25);
        assert_eq!(json["distance"], 3.5);
        Ok(())
    }
}
