//! The per-target monitor handed out by [`MonitorRegistry`].
//!
//! [`JobMonitor`] ties one [`Connection`] to one [`MessageRouter`] and
//! exposes the watch, capability and wait operations applications use.
//!
//! [`MonitorRegistry`]: crate::shared::MonitorRegistry

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cl_core::capability::CapabilitySnapshot;
use cl_core::entity::EntityStatus;
use cl_core::job::JobSnapshot;
use cl_core::target::BrokerTarget;
use cl_core::types::EntityId;
use tokio::sync::oneshot;

use crate::api::JobLookup;
use crate::callback::Callback;
use crate::capability::CapabilityChange;
use crate::config::MonitorConfig;
use crate::connection::Connection;
use crate::entity::EntityCallback;
use crate::error::MonitorError;
use crate::jobs::JobCallback;
use crate::router::MessageRouter;
use crate::transport::{Connector, TransportError};

/// Job and capability monitor bound to one broker connection.
pub struct JobMonitor {
    config: MonitorConfig,
    router: Arc<MessageRouter>,
    connection: Connection,
    /// Held across an entity registry change and the matching broker
    /// request, so subscribe and unsubscribe for one topic reach the
    /// broker in the order the registry saw them.
    entity_topics: tokio::sync::Mutex<()>,
}

impl JobMonitor {
    /// Connect to `target` and start routing messages.
    ///
    /// Waits at most `config.connect_timeout` for the broker. A broker that
    /// does not answer in time is logged and the monitor is returned
    /// anyway; it keeps connecting in the background.
    pub async fn connect(
        target: BrokerTarget,
        config: MonitorConfig,
        connector: &dyn Connector,
    ) -> Result<Self, MonitorError> {
        config.topics.validate().map_err(MonitorError::Config)?;

        let router = Arc::new(MessageRouter::new(config.topics.clone()));
        let connection = Connection::open(target, &config, connector, Arc::clone(&router)).await?;

        Ok(Self {
            config,
            router,
            connection,
            entity_topics: tokio::sync::Mutex::new(()),
        })
    }

    pub fn target(&self) -> &BrokerTarget {
        self.connection.target()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    // ---- job watches ----

    /// Watch a job. Returns the subscription id.
    ///
    /// `task_type` is echoed into every snapshot delivered to the
    /// callbacks. The watch is removed automatically after `on_complete`
    /// runs for a terminal event.
    pub async fn subscribe_job(
        &self,
        job_id: &str,
        task_type: &str,
        on_progress: Option<JobCallback>,
        on_complete: Option<JobCallback>,
    ) -> String {
        self.router.dispatcher().capture_current();
        self.router
            .jobs()
            .subscribe(job_id, task_type, on_progress, on_complete)
            .await
    }

    pub async fn unsubscribe_job(&self, subscription_id: &str) -> bool {
        self.router.jobs().unsubscribe(subscription_id).await
    }

    /// Wait for `job_id` to reach a terminal status.
    ///
    /// With a `lookup`, the job is also checked once over HTTP after the
    /// watch is registered so jobs that finished earlier are not missed.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        task_type: &str,
        timeout: Duration,
        lookup: Option<&dyn JobLookup>,
    ) -> Result<JobSnapshot, MonitorError> {
        let (tx, rx) = oneshot::channel();
        let on_complete = Callback::inline(first_only(tx));
        let subscription_id = self
            .subscribe_job(job_id, task_type, None, Some(on_complete))
            .await;

        let waited = tokio::time::timeout(timeout, async {
            if let Some(lookup) = lookup {
                match lookup.get_job(job_id).await {
                    Ok(job) if job.is_terminal() => return Ok(job),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(job_id, error = %e, "Job lookup failed, waiting for events");
                    }
                }
            }
            rx.await
                .map_err(|_| MonitorError::Transport(TransportError::Closed))
        })
        .await;

        if self.router.jobs().contains(&subscription_id).await {
            self.router.jobs().unsubscribe(&subscription_id).await;
        }

        waited.unwrap_or_else(|_| {
            Err(MonitorError::JobTimeout {
                job_id: job_id.to_string(),
                timeout,
            })
        })
    }

    // ---- entity watches ----

    /// Watch a store entity's status topic. Returns the subscription id.
    pub async fn subscribe_entity(&self, entity_id: EntityId, callback: EntityCallback) -> String {
        self.router.dispatcher().capture_current();
        let topic = self
            .config
            .topics
            .entity_topic(self.config.store_port, entity_id);

        let _order = self.entity_topics.lock().await;
        let subscription = self
            .router
            .entities()
            .subscribe(entity_id, topic, callback)
            .await;
        if subscription.first_for_topic {
            self.connection.subscribe(&subscription.topic).await;
        }
        subscription.subscription_id
    }

    pub async fn unsubscribe_entity(&self, subscription_id: &str) -> bool {
        let _order = self.entity_topics.lock().await;
        match self.router.entities().unsubscribe(subscription_id).await {
            Some(release) => {
                if release.last_for_topic {
                    self.connection.unsubscribe(&release.topic).await;
                }
                true
            }
            None => false,
        }
    }

    /// Wait until the entity reports `target_status`.
    ///
    /// A `failed` report ends the wait with [`MonitorError::EntityFailed`]
    /// when `fail_on_error` is set and is ignored otherwise.
    pub async fn wait_for_entity_status(
        &self,
        entity_id: EntityId,
        target_status: &str,
        timeout: Duration,
        fail_on_error: bool,
    ) -> Result<EntityStatus, MonitorError> {
        let (tx, rx) = oneshot::channel::<Result<EntityStatus, EntityStatus>>();
        let send = first_only(tx);
        let wanted = target_status.to_string();
        let callback = Callback::inline(move |status: EntityStatus| {
            if status.status == wanted {
                send(Ok(status));
            } else if fail_on_error && status.is_failed() {
                send(Err(status));
            }
        });
        let subscription_id = self.subscribe_entity(entity_id, callback).await;

        let waited = tokio::time::timeout(timeout, rx).await;
        self.unsubscribe_entity(&subscription_id).await;

        match waited {
            Ok(Ok(Ok(status))) => Ok(status),
            Ok(Ok(Err(status))) => {
                tracing::warn!(entity_id, "Entity processing failed");
                Err(MonitorError::EntityFailed(status))
            }
            Ok(Err(_)) => Err(MonitorError::Transport(TransportError::Closed)),
            Err(_) => Err(MonitorError::EntityTimeout {
                entity_id,
                target_status: target_status.to_string(),
                timeout,
            }),
        }
    }

    // ---- capabilities ----

    pub async fn subscribe_capability_changes(&self, callback: Callback<CapabilityChange>) {
        self.router.dispatcher().capture_current();
        self.router.capabilities().subscribe_changes(callback).await;
    }

    pub async fn snapshot_capabilities(&self) -> HashMap<String, CapabilitySnapshot> {
        self.router.capabilities().snapshot_all().await
    }

    pub async fn idle_slots_by_task_type(&self) -> BTreeMap<String, u32> {
        self.router.capabilities().idle_slots_by_task_type().await
    }

    /// Wait until some worker can accept `task_type`, polling at the
    /// configured capability check interval.
    pub async fn wait_for_capability(
        &self,
        task_type: &str,
        timeout: Duration,
    ) -> Result<bool, MonitorError> {
        self.router
            .capabilities()
            .wait_for_capability(task_type, timeout, self.config.capability_check_interval)
            .await
    }

    /// Wait for each task type in turn. `timeout` applies to each one and
    /// defaults to the configured worker wait timeout.
    pub async fn wait_for_workers(
        &self,
        task_types: &[&str],
        timeout: Option<Duration>,
    ) -> Result<(), MonitorError> {
        let timeout = timeout.unwrap_or(self.config.worker_wait_timeout);
        for task_type in task_types {
            self.wait_for_capability(task_type, timeout).await?;
        }
        Ok(())
    }

    /// Stop the connection. Safe to call more than once.
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

/// Wrap a oneshot sender so only the first value is sent.
fn first_only<T>(tx: oneshot::Sender<T>) -> impl Fn(T) + Send + Sync + 'static
where
    T: Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(tx)));
    move |value| {
        let tx = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(value);
        }
    }
}
