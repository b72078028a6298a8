use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::publish::{parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint};

const DEFAULT_MQTT_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_CLIENT_ID: &str = "shm-perception";
const DEFAULT_TOPIC_PREFIX: &str = "opendlv";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const MIN_KEEP_ALIVE_SECS: u64 = 5;
const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    mqtt: Option<MqttConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    addr: Option<String>,
    client_id: Option<String>,
    topic_prefix: Option<String>,
    keep_alive_secs: Option<u64>,
    allow_remote: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    snapshot_interval_ms: Option<u64>,
}

/// Deployment settings that do not belong on the command line.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub addr: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive: Duration,
    pub allow_remote: bool,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Where snapshots and the preview image are written.
    pub dir: PathBuf,
    pub snapshot_interval: Duration,
}

impl BridgeConfig {
    /// Load from `SHM_PERCEPTION_CONFIG` (JSON, optional), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SHM_PERCEPTION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Self {
        let mqtt_file = file.mqtt.unwrap_or_default();
        let output_file = file.output.unwrap_or_default();
        let mqtt = MqttSettings {
            addr: mqtt_file
                .addr
                .unwrap_or_else(|| DEFAULT_MQTT_ADDR.to_string()),
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            topic_prefix: mqtt_file
                .topic_prefix
                .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
            keep_alive: Duration::from_secs(
                mqtt_file.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            allow_remote: mqtt_file.allow_remote.unwrap_or(false),
        };
        let output = OutputSettings {
            dir: output_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            snapshot_interval: Duration::from_millis(
                output_file
                    .snapshot_interval_ms
                    .unwrap_or(DEFAULT_SNAPSHOT_INTERVAL_MS),
            ),
        };
        Self { mqtt, output }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("SHM_PERCEPTION_MQTT_ADDR") {
            self.mqtt.addr = addr;
        }
        if let Some(client_id) = non_empty_env("SHM_PERCEPTION_MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(prefix) = non_empty_env("SHM_PERCEPTION_TOPIC_PREFIX") {
            self.mqtt.topic_prefix = prefix;
        }
        if let Some(allow) = non_empty_env("SHM_PERCEPTION_ALLOW_REMOTE_MQTT") {
            self.mqtt.allow_remote = parse_bool(&allow).ok_or_else(|| {
                anyhow!("SHM_PERCEPTION_ALLOW_REMOTE_MQTT must be true or false")
            })?;
        }
        if let Some(dir) = non_empty_env("SHM_PERCEPTION_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }
        if let Some(interval) = non_empty_env("SHM_PERCEPTION_SNAPSHOT_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                anyhow!("SHM_PERCEPTION_SNAPSHOT_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.output.snapshot_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.mqtt.client_id = self.mqtt.client_id.trim().to_string();
        if self.mqtt.client_id.is_empty() {
            return Err(anyhow!("mqtt client id must not be empty"));
        }
        self.mqtt.topic_prefix = self.mqtt.topic_prefix.trim_matches('/').to_string();
        if self.mqtt.topic_prefix.is_empty() {
            return Err(anyhow!("mqtt topic prefix must not be empty"));
        }
        if self.mqtt.keep_alive.as_secs() < MIN_KEEP_ALIVE_SECS {
            return Err(anyhow!(
                "mqtt keep alive must be at least {} seconds",
                MIN_KEEP_ALIVE_SECS
            ));
        }
        parse_mqtt_endpoint(&self.mqtt.addr)?;
        Ok(())
    }

    /// Parsed broker endpoint, refusing remote brokers unless allowed.
    pub fn mqtt_endpoint(&self) -> Result<MqttEndpoint> {
        let endpoint = parse_mqtt_endpoint(&self.mqtt.addr)?;
        if self.mqtt.allow_remote {
            log::warn!("remote MQTT enabled - ensure the broker is on a trusted network");
        } else {
            validate_loopback_addr(&endpoint, &self.mqtt.addr)?;
        }
        Ok(endpoint)
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() -> Result<()> {
        let mut cfg = BridgeConfig::from_file(BridgeConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.mqtt.addr, "127.0.0.1:1883");
        assert_eq!(cfg.mqtt.client_id, "shm-perception");
        assert_eq!(cfg.mqtt.topic_prefix, "opendlv");
        assert_eq!(cfg.mqtt.keep_alive.as_secs(), 30);
        assert!(!cfg.mqtt.allow_remote);
        assert_eq!(cfg.output.dir, PathBuf::from("."));
        assert_eq!(cfg.output.snapshot_interval.as_millis(), 1000);
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = BridgeConfig::from_file(BridgeConfigFile::default());
        cfg.mqtt.keep_alive = Duration::from_secs(1);
        assert!(cfg.validate().is_err());

        let mut cfg = BridgeConfig::from_file(BridgeConfigFile::default());
        cfg.mqtt.topic_prefix = "//".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = BridgeConfig::from_file(BridgeConfigFile::default());
        cfg.mqtt.addr = "no-port".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn remote_broker_requires_opt_in() -> Result<()> {
        let mut cfg = BridgeConfig::from_file(BridgeConfigFile::default());
        cfg.mqtt.addr = "10.1.2.3:1883".to_string();
        assert!(cfg.mqtt_endpoint().is_err());
        cfg.mqtt.allow_remote = true;
        assert_eq!(cfg.mqtt_endpoint()?.host, "10.1.2.3");
        Ok(())
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
