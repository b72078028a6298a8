use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use shm_perception::config::BridgeConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SHM_PERCEPTION_CONFIG",
        "SHM_PERCEPTION_MQTT_ADDR",
        "SHM_PERCEPTION_MQTT_CLIENT_ID",
        "SHM_PERCEPTION_TOPIC_PREFIX",
        "SHM_PERCEPTION_ALLOW_REMOTE_MQTT",
        "SHM_PERCEPTION_OUTPUT_DIR",
        "SHM_PERCEPTION_SNAPSHOT_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "mqtt": {
                "addr": "mqtt://localhost:1884",
                "client_id": "  camera-front  ",
                "topic_prefix": "/vehicle/",
                "keep_alive_secs": 15
            },
            "output": {
                "dir": "/var/lib/shm-perception",
                "snapshot_interval_ms": 250
            }
        }"#,
    );
    std::env::set_var("SHM_PERCEPTION_CONFIG", file.path());
    std::env::set_var("SHM_PERCEPTION_SNAPSHOT_INTERVAL_MS", "2000");
    std::env::set_var("SHM_PERCEPTION_OUTPUT_DIR", "/tmp/frames");

    let cfg = BridgeConfig::load().expect("load config");

    assert_eq!(cfg.mqtt.addr, "mqtt://localhost:1884");
    assert_eq!(cfg.mqtt.client_id, "camera-front");
    assert_eq!(cfg.mqtt.topic_prefix, "vehicle");
    assert_eq!(cfg.mqtt.keep_alive.as_secs(), 15);
    assert!(!cfg.mqtt.allow_remote);
    assert_eq!(cfg.output.dir, PathBuf::from("/tmp/frames"));
    assert_eq!(cfg.output.snapshot_interval.as_millis(), 2000);

    let endpoint = cfg.mqtt_endpoint().expect("loopback endpoint");
    assert_eq!(endpoint.host, "localhost");
    assert_eq!(endpoint.port, 1884);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BridgeConfig::load().expect("load defaults");

    assert_eq!(cfg.mqtt.addr, "127.0.0.1:1883");
    assert_eq!(cfg.mqtt.client_id, "shm-perception");
    assert_eq!(cfg.mqtt.topic_prefix, "opendlv");
    assert_eq!(cfg.output.snapshot_interval.as_millis(), 1000);

    clear_env();
}

#[test]
fn remote_broker_needs_explicit_opt_in() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SHM_PERCEPTION_MQTT_ADDR", "192.168.10.4:1883");
    let cfg = BridgeConfig::load().expect("load config");
    assert!(cfg.mqtt_endpoint().is_err());

    std::env::set_var("SHM_PERCEPTION_ALLOW_REMOTE_MQTT", "true");
    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.mqtt_endpoint().expect("remote allowed").host, "192.168.10.4");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SHM_PERCEPTION_ALLOW_REMOTE_MQTT", "sometimes");
    assert!(BridgeConfig::load().is_err());
    clear_env();

    std::env::set_var("SHM_PERCEPTION_SNAPSHOT_INTERVAL_MS", "fast");
    assert!(BridgeConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "mqtt": { "keep_alive_secs": 2 } }"#);
    std::env::set_var("SHM_PERCEPTION_CONFIG", file.path());
    assert!(BridgeConfig::load().is_err());
    clear_env();

    let file = write_config("not json");
    std::env::set_var("SHM_PERCEPTION_CONFIG", file.path());
    assert!(BridgeConfig::load().is_err());
    clear_env();

    std::env::set_var("SHM_PERCEPTION_MQTT_ADDR", "mqtts://127.0.0.1:8883");
    assert!(BridgeConfig::load().is_err());
    clear_env();
}
