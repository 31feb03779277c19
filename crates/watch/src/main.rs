//! `cl-watch` -- job and worker monitor daemon.
//!
//! Connects to the broker, logs worker capability changes, and follows
//! the jobs and store entities named in the environment until Ctrl-C.
//!
//! # Environment variables
//!
//! Besides the broker settings read by [`MonitorConfig::from_env`]:
//!
//! | Variable              | Required | Default   | Description                                  |
//! |-----------------------|----------|-----------|----------------------------------------------|
//! | `WATCH_JOB_IDS`       | no       | --        | Comma-separated job ids to follow            |
//! | `WATCH_TASK_TYPE`     | no       | `unknown` | Task type reported for followed jobs         |
//! | `WATCH_ENTITY_IDS`    | no       | --        | Comma-separated store entity ids to follow   |
//! | `WATCH_REQUIRE_TASKS` | no       | --        | Task types that must have an idle worker before watching starts |

use cl_core::entity::EntityStatus;
use cl_core::job::JobSnapshot;
use cl_core::types::{to_utc, EntityId};
use cl_monitor::{Callback, CapabilityChange, MonitorConfig, MonitorRegistry};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Task type reported when `WATCH_TASK_TYPE` is unset.
const DEFAULT_TASK_TYPE: &str = "unknown";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cl_watch=info,cl_monitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env();
    let job_ids = env_list("WATCH_JOB_IDS");
    let task_type =
        std::env::var("WATCH_TASK_TYPE").unwrap_or_else(|_| DEFAULT_TASK_TYPE.to_string());
    let entity_ids: Vec<EntityId> = env_list("WATCH_ENTITY_IDS")
        .iter()
        .filter_map(|raw| match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring invalid entity id");
                None
            }
        })
        .collect();
    let required = env_list("WATCH_REQUIRE_TASKS");

    tracing::info!(
        mqtt_url = %config.mqtt_url,
        jobs = job_ids.len(),
        entities = entity_ids.len(),
        "Starting cl-watch",
    );

    let registry = MonitorRegistry::mqtt(config);
    let monitor = match registry.acquire_default().await {
        Ok(monitor) => monitor,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start monitor");
            std::process::exit(1);
        }
    };

    monitor
        .subscribe_capability_changes(Callback::inline(log_capability_change))
        .await;

    if !required.is_empty() {
        let required: Vec<&str> = required.iter().map(String::as_str).collect();
        if let Err(e) = monitor.wait_for_workers(&required, None).await {
            tracing::error!(error = %e, "Required workers are not available");
            registry.release(&monitor).await;
            std::process::exit(1);
        }
        tracing::info!(task_types = ?required, "Required workers available");
    }

    for job_id in &job_ids {
        monitor
            .subscribe_job(
                job_id,
                &task_type,
                Some(Callback::inline(log_job_progress)),
                Some(Callback::inline(log_job_finished)),
            )
            .await;
    }

    for entity_id in &entity_ids {
        monitor
            .subscribe_entity(*entity_id, Callback::inline(log_entity_status))
            .await;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutting down");
    registry.release(&monitor).await;
}

/// Split a comma-separated variable, skipping blanks.
fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn log_capability_change(change: CapabilityChange) {
    match change.snapshot {
        Some(snapshot) => tracing::info!(
            worker_id = %change.worker_id,
            capabilities = ?snapshot.capabilities,
            idle_slots = snapshot.idle_slots,
            observed_at = ?to_utc(snapshot.observed_at),
            "Worker capabilities updated",
        ),
        None => tracing::info!(worker_id = %change.worker_id, "Worker disconnected"),
    }
}

fn log_job_progress(job: JobSnapshot) {
    tracing::info!(
        job_id = %job.job_id,
        status = %job.status,
        progress = job.progress,
        "Job update",
    );
}

fn log_job_finished(job: JobSnapshot) {
    tracing::info!(
        job_id = %job.job_id,
        task_type = %job.task_type,
        status = %job.status,
        at = ?to_utc(job.created_at),
        "Job finished",
    );
}

fn log_entity_status(status: EntityStatus) {
    tracing::info!(
        entity_id = status.entity_id,
        status = %status.status,
        at = ?to_utc(status.timestamp),
        "Entity status",
    );
}
