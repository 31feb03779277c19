use std::time::Duration;

use cl_core::topics::{
    TopicLayout, DEFAULT_CAPABILITY_PREFIX, DEFAULT_ENTITY_PREFIX, DEFAULT_JOB_EVENTS_TOPIC,
};

use crate::reconnect::ReconnectConfig;

/// Monitor configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Default broker target (default: `mqtt://localhost:1883`).
    pub mqtt_url: String,
    pub topics: TopicLayout,
    /// Port of the store service, used to build entity-status topics.
    pub store_port: u16,
    /// How long construction blocks waiting for the broker's ack.
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Default timeout for `wait_for_capability` / `wait_for_workers`.
    pub worker_wait_timeout: Duration,
    /// Poll interval used while waiting for a capability.
    pub capability_check_interval: Duration,
    /// Prefix of the client id presented to the broker.
    pub client_id_prefix: String,
    pub reconnect: ReconnectConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mqtt_url: "mqtt://localhost:1883".into(),
            topics: TopicLayout::default(),
            store_port: 8001,
            connect_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(60),
            worker_wait_timeout: Duration::from_secs(30),
            capability_check_interval: Duration::from_secs(1),
            client_id_prefix: "cl-monitor".into(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Unparsable numeric values fall back to their defaults.
    ///
    /// | Env Var                               | Default                 |
    /// |---------------------------------------|-------------------------|
    /// | `MQTT_URL`                            | `mqtt://localhost:1883` |
    /// | `MQTT_CAPABILITY_TOPIC_PREFIX`        | `inference/workers`     |
    /// | `MQTT_JOB_EVENTS_TOPIC`               | `inference/events`      |
    /// | `MQTT_ENTITY_TOPIC_PREFIX`            | `store`                 |
    /// | `STORE_PORT`                          | `8001`                  |
    /// | `MQTT_CONNECT_TIMEOUT_SECS`           | `5`                     |
    /// | `MQTT_KEEP_ALIVE_SECS`                | `60`                    |
    /// | `WORKER_WAIT_TIMEOUT_SECS`            | `30`                    |
    /// | `WORKER_CAPABILITY_CHECK_INTERVAL_MS` | `1000`                  |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let topics = TopicLayout {
            capability_prefix: env_or("MQTT_CAPABILITY_TOPIC_PREFIX", DEFAULT_CAPABILITY_PREFIX),
            job_events_topic: env_or("MQTT_JOB_EVENTS_TOPIC", DEFAULT_JOB_EVENTS_TOPIC),
            entity_prefix: env_or("MQTT_ENTITY_TOPIC_PREFIX", DEFAULT_ENTITY_PREFIX),
        };

        Self {
            mqtt_url: env_or("MQTT_URL", &defaults.mqtt_url),
            topics,
            store_port: env_parse("STORE_PORT").unwrap_or(defaults.store_port),
            connect_timeout: env_parse("MQTT_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            keep_alive: env_parse("MQTT_KEEP_ALIVE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.keep_alive),
            worker_wait_timeout: env_parse("WORKER_WAIT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.worker_wait_timeout),
            capability_check_interval: env_parse("WORKER_CAPABILITY_CHECK_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.capability_check_interval),
            ..defaults
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
