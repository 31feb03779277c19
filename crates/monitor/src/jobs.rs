//! Job watches keyed by subscription id.
//!
//! Several watches may target the same job id; each receives every event
//! for that job independently. A watch with a completion callback is
//! removed right after that callback is invoked for a terminal event.

use std::collections::HashMap;
use std::sync::Arc;

use cl_core::job::JobSnapshot;
use tokio::sync::RwLock;

use crate::callback::{Callback, CallbackDispatcher};
use crate::messages::JobEvent;

/// Callback type for job watches.
pub type JobCallback = Callback<JobSnapshot>;

#[derive(Clone)]
struct JobWatch {
    job_id: String,
    /// Echoed into snapshots; the events topic does not carry it.
    task_type: String,
    on_progress: Option<JobCallback>,
    on_complete: Option<JobCallback>,
}

pub struct JobWatchRegistry {
    watches: RwLock<HashMap<String, JobWatch>>,
    dispatcher: Arc<CallbackDispatcher>,
}

impl JobWatchRegistry {
    pub fn new(dispatcher: Arc<CallbackDispatcher>) -> Self {
        Self {
            watches: RwLock::new(HashMap::new()),
            dispatcher,
        }
    }

    /// Register a watch and return its subscription id.
    pub async fn subscribe(
        &self,
        job_id: &str,
        task_type: &str,
        on_progress: Option<JobCallback>,
        on_complete: Option<JobCallback>,
    ) -> String {
        let subscription_id = uuid::Uuid::new_v4().to_string();
        let watch = JobWatch {
            job_id: job_id.to_string(),
            task_type: task_type.to_string(),
            on_progress,
            on_complete,
        };
        self.watches
            .write()
            .await
            .insert(subscription_id.clone(), watch);

        tracing::debug!(
            job_id,
            subscription_id = %subscription_id,
            "Registered job watch",
        );
        subscription_id
    }

    /// Remove a watch. Unknown ids are logged and ignored.
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        match self.watches.write().await.remove(subscription_id) {
            Some(watch) => {
                tracing::debug!(
                    job_id = %watch.job_id,
                    subscription_id,
                    "Removed job watch",
                );
                true
            }
            None => {
                tracing::warn!(subscription_id, "Job subscription not found");
                false
            }
        }
    }

    pub async fn contains(&self, subscription_id: &str) -> bool {
        self.watches.read().await.contains_key(subscription_id)
    }

    pub async fn len(&self) -> usize {
        self.watches.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.watches.read().await.is_empty()
    }

    pub async fn watches_for(&self, job_id: &str) -> usize {
        self.watches
            .read()
            .await
            .values()
            .filter(|w| w.job_id == job_id)
            .count()
    }

    /// Deliver one event to every watch on its job id.
    ///
    /// Matching watches are copied out before any callback runs, so a
    /// watch removed concurrently may still see this one event.
    pub async fn dispatch(&self, event: &JobEvent) {
        let matching: Vec<(String, JobWatch)> = self
            .watches
            .read()
            .await
            .iter()
            .filter(|(_, w)| w.job_id == event.job_id)
            .map(|(id, w)| (id.clone(), w.clone()))
            .collect();

        if matching.is_empty() {
            tracing::trace!(job_id = %event.job_id, "No watches for job event");
            return;
        }

        let terminal = event.is_terminal();

        for (subscription_id, watch) in matching {
            let snapshot = JobSnapshot::from_event(
                event.job_id.clone(),
                watch.task_type.clone(),
                event.event_type.clone(),
                event.progress,
                event.timestamp,
            );

            let mut calls = Vec::with_capacity(2);
            if let Some(cb) = watch.on_progress {
                calls.push((cb, snapshot.clone()));
            }
            let completes = terminal && watch.on_complete.is_some();
            if terminal {
                if let Some(cb) = watch.on_complete {
                    calls.push((cb, snapshot));
                }
            }
            self.dispatcher.invoke_ordered(calls);

            if completes {
                self.watches.write().await.remove(&subscription_id);
                tracing::debug!(
                    job_id = %event.job_id,
                    subscription_id = %subscription_id,
                    status = %event.event_type,
                    "Job finished, watch removed",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    fn registry() -> JobWatchRegistry {
        JobWatchRegistry::new(Arc::new(CallbackDispatcher::new()))
    }

    fn counter() -> (Arc<AtomicUsize>, JobCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let cb = Callback::inline(move |_: JobSnapshot| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[tokio::test]
    async fn subscription_ids_are_unique() {
        let reg = registry();
        let a = reg.subscribe("job-A", "hash", None, None).await;
        let b = reg.subscribe("job-A", "hash", None, None).await;
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(reg.watches_for("job-A").await, 2);
    }

    #[tokio::test]
    async fn completed_event_fires_both_then_removes() {
        let reg = registry();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let on_progress = Callback::inline(move |job: JobSnapshot| {
            o.lock().unwrap().push(format!("progress:{}:{}", job.status, job.progress));
        });
        let o = Arc::clone(&order);
        let on_complete = Callback::inline(move |job: JobSnapshot| {
            o.lock().unwrap().push(format!("complete:{}", job.status));
        });

        reg.subscribe("job-42", "clip_embedding", Some(on_progress), Some(on_complete))
            .await;

        reg.dispatch(&JobEvent::new("job-42", "processing").with_progress(50.0))
            .await;
        reg.dispatch(&JobEvent::new("job-42", "completed").with_progress(100.0))
            .await;
        reg.dispatch(&JobEvent::new("job-42", "processing").with_progress(10.0))
            .await;

        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "progress:processing:50".to_string(),
                "progress:completed:100".to_string(),
                "complete:completed".to_string(),
            ]
        );
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn watch_without_completion_callback_survives_terminal_event() {
        let reg = registry();
        let (hits, on_progress) = counter();
        let id = reg.subscribe("job-1", "hash", Some(on_progress), None).await;

        reg.dispatch(&JobEvent::new("job-1", "failed")).await;
        reg.dispatch(&JobEvent::new("job-1", "failed")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(reg.unsubscribe(&id).await);
    }

    #[tokio::test]
    async fn watches_on_same_job_are_independent() {
        let reg = registry();
        let (hits_a, cb_a) = counter();
        let (hits_b, cb_b) = counter();
        let a = reg.subscribe("job-A", "hash", Some(cb_a), None).await;
        reg.subscribe("job-A", "hash", Some(cb_b), None).await;

        reg.dispatch(&JobEvent::new("job-A", "processing")).await;
        assert!(reg.unsubscribe(&a).await);
        reg.dispatch(&JobEvent::new("job-A", "processing")).await;

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn each_watch_sees_its_own_task_type() {
        let reg = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for task_type in ["hash", "exif"] {
            let s = Arc::clone(&seen);
            let cb = Callback::inline(move |job: JobSnapshot| {
                s.lock().unwrap().push(job.task_type);
            });
            reg.subscribe("job-A", task_type, Some(cb), None).await;
        }

        reg.dispatch(&JobEvent::new("job-A", "processing")).await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["exif", "hash"]);
    }

    #[tokio::test]
    async fn other_jobs_are_not_notified() {
        let reg = registry();
        let (hits, cb) = counter();
        reg.subscribe("job-A", "hash", Some(cb), None).await;
        reg.dispatch(&JobEvent::new("job-B", "completed")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_unsubscribe_is_a_noop() {
        let reg = registry();
        assert!(!reg.unsubscribe("missing").await);
    }
}
