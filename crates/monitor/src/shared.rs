//! Reference-counted sharing of monitors per broker target.
//!
//! [`MonitorRegistry`] hands out one [`JobMonitor`] per target. Every
//! [`acquire`](MonitorRegistry::acquire) must be paired with a
//! [`release`](MonitorRegistry::release); the connection closes when the
//! last holder releases. Applications normally construct one registry at
//! startup and pass it where it is needed.

use std::collections::HashMap;
use std::sync::Arc;

use cl_core::target::BrokerTarget;
use tokio::sync::Mutex;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::monitor::JobMonitor;
use crate::transport::{Connector, MqttConnector};

struct SharedEntry {
    monitor: Arc<JobMonitor>,
    refs: usize,
}

/// Process-wide cache of monitors keyed by normalised broker target.
pub struct MonitorRegistry {
    connector: Arc<dyn Connector>,
    config: MonitorConfig,
    /// Held across the connect in `acquire`, so concurrent first
    /// acquires of one target share a single connection.
    entries: Mutex<HashMap<String, SharedEntry>>,
}

impl MonitorRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: MonitorConfig) -> Self {
        Self {
            connector,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registry that connects over MQTT.
    pub fn mqtt(config: MonitorConfig) -> Self {
        Self::new(Arc::new(MqttConnector::new()), config)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Get the monitor for `target`, connecting on first use.
    ///
    /// `mqtt://host:1883`, `tcp://host:1883`, `host:1883` and `host`
    /// all name the same monitor.
    pub async fn acquire(&self, target: &str) -> Result<Arc<JobMonitor>, MonitorError> {
        let target = BrokerTarget::parse(target)?;
        let key = target.to_string();

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            entry.refs += 1;
            tracing::debug!(target_url = %key, refs = entry.refs, "Reusing shared monitor");
            return Ok(Arc::clone(&entry.monitor));
        }

        let monitor = Arc::new(
            JobMonitor::connect(target, self.config.clone(), self.connector.as_ref()).await?,
        );
        entries.insert(
            key.clone(),
            SharedEntry {
                monitor: Arc::clone(&monitor),
                refs: 1,
            },
        );
        tracing::info!(target_url = %key, "Created shared monitor");
        Ok(monitor)
    }

    /// Acquire the monitor for the configured default target.
    pub async fn acquire_default(&self) -> Result<Arc<JobMonitor>, MonitorError> {
        let target = self.config.mqtt_url.clone();
        self.acquire(&target).await
    }

    /// Give back a monitor obtained from [`acquire`](Self::acquire).
    ///
    /// The last release closes the connection. Releasing a monitor this
    /// registry does not track (for example a second release of the last
    /// reference) logs a warning and closes it again, which is harmless.
    pub async fn release(&self, monitor: &Arc<JobMonitor>) {
        let key = monitor.target().to_string();
        let mut entries = self.entries.lock().await;

        let tracked = entries
            .get(&key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.monitor, monitor));
        if !tracked {
            drop(entries);
            tracing::warn!(target_url = %key, "Releasing a monitor that is not registered");
            monitor.close().await;
            return;
        }

        let Some(entry) = entries.get_mut(&key) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            tracing::debug!(target_url = %key, refs = entry.refs, "Released shared monitor");
            return;
        }

        if let Some(entry) = entries.remove(&key) {
            entry.monitor.close().await;
            tracing::info!(target_url = %key, "Closed shared monitor");
        }
    }

    /// Number of targets with a live monitor.
    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Current holders of the monitor for `target`, or 0 if none.
    pub async fn ref_count(&self, target: &str) -> usize {
        let Ok(target) = BrokerTarget::parse(target) else {
            return 0;
        };
        self.entries
            .lock()
            .await
            .get(&target.to_string())
            .map_or(0, |entry| entry.refs)
    }
}
