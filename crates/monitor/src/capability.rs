//! Last-known worker capabilities.
//!
//! [`CapabilityRegistry`] keeps one [`CapabilitySnapshot`] per worker,
//! replaced wholesale by every capability message and removed when the
//! worker's disconnect signal arrives. Change listeners are append-only
//! for the registry's lifetime.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use cl_core::capability::{idle_slots_by_task_type, CapabilitySnapshot};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::callback::{Callback, CallbackDispatcher};
use crate::error::MonitorError;

/// Notification passed to capability listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityChange {
    pub worker_id: String,
    /// The new snapshot, or `None` when the worker disconnected.
    pub snapshot: Option<CapabilitySnapshot>,
}

impl CapabilityChange {
    pub fn is_disconnect(&self) -> bool {
        self.snapshot.is_none()
    }
}

pub struct CapabilityRegistry {
    workers: RwLock<HashMap<String, CapabilitySnapshot>>,
    listeners: RwLock<Vec<Callback<CapabilityChange>>>,
    dispatcher: Arc<CallbackDispatcher>,
}

impl CapabilityRegistry {
    pub fn new(dispatcher: Arc<CallbackDispatcher>) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            dispatcher,
        }
    }

    /// Insert or replace the snapshot for its worker, then notify.
    pub async fn update(&self, snapshot: CapabilitySnapshot) {
        let worker_id = snapshot.worker_id.clone();
        {
            let mut workers = self.workers.write().await;
            if let Some(previous) = workers.get(&worker_id) {
                if previous.observed_at > snapshot.observed_at {
                    tracing::debug!(
                        worker_id = %worker_id,
                        previous = previous.observed_at,
                        current = snapshot.observed_at,
                        "Capability timestamp went backwards",
                    );
                }
            }
            workers.insert(worker_id.clone(), snapshot.clone());
        }

        tracing::debug!(
            worker_id = %worker_id,
            idle_slots = snapshot.idle_slots,
            "Worker capability updated",
        );
        self.notify(CapabilityChange {
            worker_id,
            snapshot: Some(snapshot),
        })
        .await;
    }

    /// Forget a worker. Listeners are only notified if it was known.
    pub async fn remove(&self, worker_id: &str) -> bool {
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            tracing::info!(worker_id = %worker_id, "Worker disconnected");
            self.notify(CapabilityChange {
                worker_id: worker_id.to_string(),
                snapshot: None,
            })
            .await;
        }
        removed
    }

    pub async fn subscribe_changes(&self, callback: Callback<CapabilityChange>) {
        self.listeners.write().await.push(callback);
    }

    /// Copy of the current map, safe to iterate without holding a lock.
    pub async fn snapshot_all(&self) -> HashMap<String, CapabilitySnapshot> {
        self.workers.read().await.clone()
    }

    pub async fn idle_slots_by_task_type(&self) -> BTreeMap<String, u32> {
        idle_slots_by_task_type(self.workers.read().await.values())
    }

    /// Poll until some worker can accept `task_type` or `timeout` passes.
    ///
    /// On timeout fails with [`MonitorError::WorkerUnavailable`] carrying
    /// the idle slots per task type across all known workers.
    pub async fn wait_for_capability(
        &self,
        task_type: &str,
        timeout: Duration,
        check_interval: Duration,
    ) -> Result<bool, MonitorError> {
        let deadline = Instant::now() + timeout;

        loop {
            let workers = self.snapshot_all().await;
            if workers.values().any(|w| w.can_accept(task_type)) {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                let available = idle_slots_by_task_type(workers.values());
                tracing::warn!(
                    task_type,
                    ?available,
                    "Timed out waiting for worker capability",
                );
                return Err(MonitorError::WorkerUnavailable {
                    task_type: task_type.to_string(),
                    available,
                });
            }

            tokio::time::sleep(check_interval.min(deadline - now)).await;
        }
    }

    async fn notify(&self, change: CapabilityChange) {
        let listeners = self.listeners.read().await.clone();
        for listener in &listeners {
            self.dispatcher.invoke(listener, change.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(Arc::new(CallbackDispatcher::new()))
    }

    #[tokio::test]
    async fn update_replaces_whole_snapshot() {
        let reg = registry();
        reg.update(CapabilitySnapshot::new("w1", ["clip_embedding", "hash"], 2).observed_at(1))
            .await;
        reg.update(CapabilitySnapshot::new("w1", ["exif"], 0).observed_at(2))
            .await;

        let all = reg.snapshot_all().await;
        assert_eq!(all.len(), 1);
        let w1 = &all["w1"];
        assert!(w1.supports("exif"));
        assert!(!w1.supports("hash"));
        assert_eq!(w1.idle_slots, 0);
        assert_eq!(w1.observed_at, 2);
    }

    #[tokio::test]
    async fn remove_notifies_only_known_workers() {
        let reg = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        reg.subscribe_changes(Callback::inline(move |change: CapabilityChange| {
            s.lock().unwrap().push(change);
        }))
        .await;

        assert!(!reg.remove("ghost").await);
        assert!(seen.lock().unwrap().is_empty());

        reg.update(CapabilitySnapshot::new("w1", ["hash"], 1)).await;
        assert!(reg.remove("w1").await);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].is_disconnect());
        assert_eq!(seen[1].worker_id, "w1");
        assert!(seen[1].is_disconnect());
        assert!(reg.snapshot_all().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let reg = registry();
        reg.update(CapabilitySnapshot::new("w1", ["hash"], 1)).await;
        let copy = reg.snapshot_all().await;
        reg.remove("w1").await;
        assert!(copy.contains_key("w1"));
    }

    #[tokio::test]
    async fn wait_times_out_with_empty_counts() {
        let reg = registry();
        let started = std::time::Instant::now();
        let result = reg
            .wait_for_capability(
                "clip_embedding",
                Duration::from_millis(300),
                Duration::from_secs(1),
            )
            .await;

        let elapsed = started.elapsed();
        assert_matches!(
            result,
            Err(MonitorError::WorkerUnavailable { ref task_type, ref available })
                if task_type == "clip_embedding" && available.is_empty()
        );
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn wait_ignores_busy_workers() {
        let reg = registry();
        reg.update(CapabilitySnapshot::new("w1", ["clip_embedding"], 0)).await;
        let result = reg
            .wait_for_capability(
                "clip_embedding",
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await;
        assert_matches!(
            result,
            Err(MonitorError::WorkerUnavailable { ref available, .. })
                if available.get("clip_embedding") == Some(&0)
        );
    }

    #[tokio::test]
    async fn wait_succeeds_when_worker_appears() {
        let reg = Arc::new(registry());
        let r = Arc::clone(&reg);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            r.update(CapabilitySnapshot::new("w1", ["clip_embedding"], 1)).await;
        });

        let ok = reg
            .wait_for_capability(
                "clip_embedding",
                Duration::from_secs(1),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert!(ok);
    }
}
