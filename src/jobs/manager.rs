//! Job lifecycle: accept, preprocess, launch, complete, cancel.
//!
//! The manager is the single writer of job state. Every status transition
//! posts the user webhook (best-effort, no retry); completion statistics
//! feed the wait-time heuristic and the health endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::ServiceClient;
use crate::config::Settings;
use crate::error::JobError;
use crate::jobs::model_config::ModelCatalog;
use crate::jobs::preprocess::preprocess_job;
use crate::jobs::state::{InputItem, JobState, JobStatus};
use crate::workflow::{JsonMap, WorkflowManager};

/// How many completed-job durations feed the wait-time estimate.
const MAX_PROCESSING_TIMES: usize = 10;

/// Assumed processing time with no history.
const DEFAULT_PROCESSING_SECS: f64 = 60.0;

/// Response to a job submission.
#[derive(Debug, Serialize)]
pub struct JobTicket {
    pub id: String,
    pub pod_id: String,
    pub queue_position: usize,
    pub estimated_wait_time: f64,
    pub pod_url: String,
}

/// Health endpoint summary.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub jobs: JobCounts,
}

#[derive(Debug, Serialize)]
pub struct JobCounts {
    pub completed: u64,
    pub failed: u64,
    #[serde(rename = "inProgress")]
    pub in_progress: usize,
    #[serde(rename = "inQueue")]
    pub in_queue: usize,
}

#[derive(Default)]
struct JobStats {
    completed: u64,
    failed: u64,
    processing_times: VecDeque<f64>,
}

/// Owns all job state and drives jobs through their lifecycle.
pub struct JobManager {
    settings: Arc<Settings>,
    catalog: Arc<ModelCatalog>,
    workflows: Arc<WorkflowManager>,
    client: ServiceClient,
    jobs: RwLock<HashMap<String, JobState>>,
    stats: Mutex<JobStats>,
}

impl JobManager {
    pub fn new(
        settings: Arc<Settings>,
        catalog: Arc<ModelCatalog>,
        workflows: Arc<WorkflowManager>,
        client: ServiceClient,
    ) -> Self {
        Self {
            settings,
            catalog,
            workflows,
            client,
            jobs: RwLock::new(HashMap::new()),
            stats: Mutex::new(JobStats::default()),
        }
    }

    /// Accept a job: record state, preprocess into the model's workflow,
    /// and launch execution with the internal webhook wired up.
    pub async fn submit(
        &self,
        model: String,
        input: Vec<InputItem>,
        options: JsonMap,
        webhook_url: Option<String>,
        job_id: Option<String>,
    ) -> Result<JobTicket, JobError> {
        let config = self.catalog.resolve(&model);
        let id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(job_id = %id, model = %config.name, "Job accepted");

        let job = JobState::new(
            id.clone(),
            config.name.clone(),
            input.clone(),
            options.clone(),
            webhook_url,
            self.settings.pod_id.clone(),
            self.settings.service_url.clone(),
        );
        self.jobs.write().await.insert(id.clone(), job);

        let launched = self.launch(&config, &id, &input, &options).await;
        if let Err(e) = launched {
            let message = e.to_string();
            let _ = self
                .set_status(&id, JobStatus::Failed, |job| {
                    job.error = Some(message);
                    job.completed_at = Some(Utc::now());
                })
                .await;
            return Err(e);
        }

        let queue_position = self.active_job_count().await;
        let estimated_wait_time = self.estimated_wait_time().await;

        Ok(JobTicket {
            id,
            pod_id: self.settings.pod_id.clone(),
            queue_position,
            estimated_wait_time,
            pod_url: self.settings.service_url.clone(),
        })
    }

    async fn launch(
        &self,
        config: &crate::jobs::model_config::ModelConfig,
        job_id: &str,
        input: &[InputItem],
        options: &JsonMap,
    ) -> Result<(), JobError> {
        let mut prepared = preprocess_job(config, input, options, job_id);
        self.seed_service_timeouts(&mut prepared.workflow, config.timeout_minutes);

        // Transition before launch: the workflow's completion callback may
        // arrive arbitrarily soon after execute() returns.
        self.set_status(job_id, JobStatus::Processing, |job| {
            job.workflow_task_id = Some(job_id.to_string());
        })
        .await?;

        let webhook_url = self.settings.workflow_webhook_url(job_id);
        self.workflows
            .execute(&prepared.workflow, Some(webhook_url), Some(job_id.to_string()))
            .await?;
        Ok(())
    }

    /// Seed the model's timeout into service nodes that declare a `timeout`
    /// port and were not given one explicitly.
    fn seed_service_timeouts(
        &self,
        workflow: &mut crate::workflow::GraphDefinition,
        timeout_minutes: u64,
    ) {
        let env = self.workflows.env();
        let registry = &env.registry;
        let timeout_secs = timeout_minutes * 60;
        for node in &mut workflow.nodes {
            if node.input_values.contains_key("timeout") {
                continue;
            }
            let declares_timeout = registry
                .get(&node.type_name)
                .is_some_and(|reg| reg.schema.input_port("timeout").is_some());
            if declares_timeout {
                node.input_values
                    .insert("timeout".to_string(), serde_json::json!(timeout_secs));
            }
        }
    }

    /// Handle the internal workflow-completion webhook for a job.
    pub async fn handle_workflow_callback(
        &self,
        job_id: &str,
        status: &str,
        result: Option<&Value>,
        error: Option<String>,
    ) -> Result<(), JobError> {
        let next = match status {
            "completed" => JobStatus::Completed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };

        {
            let jobs = self.jobs.read().await;
            let Some(job) = jobs.get(job_id) else {
                warn!(job_id = %job_id, "Workflow callback for unknown job, ignoring");
                return Ok(());
            };
            // Already finalized locally (e.g. user cancellation raced the
            // workflow's own cancelled callback).
            if job.status.is_terminal() {
                debug!(job_id = %job_id, "Workflow callback after terminal state, ignoring");
                return Ok(());
            }
        }

        let outputs = if next == JobStatus::Completed {
            self.map_outputs(job_id, result).await
        } else {
            Vec::new()
        };

        self.set_status(job_id, next, |job| {
            job.completed_at = Some(Utc::now());
            if let Some(message) = error {
                job.error = Some(message);
            }
            for (field, value) in outputs {
                match field.as_str() {
                    "output_url" => job.output_url = Some(value),
                    "local_url" => job.local_url = Some(value),
                    "output_wasabi_url" => job.output_wasabi_url = Some(value),
                    other => {
                        warn!(job_id = %job.id, field = %other, "Unknown output mapping field");
                    }
                }
            }
        })
        .await?;
        Ok(())
    }

    /// Resolve the model's output mapping against the workflow results.
    async fn map_outputs(&self, job_id: &str, result: Option<&Value>) -> Vec<(String, String)> {
        let Some(result) = result else {
            return Vec::new();
        };
        let model = {
            let jobs = self.jobs.read().await;
            match jobs.get(job_id) {
                Some(job) => job.model.clone(),
                None => return Vec::new(),
            }
        };
        let config = self.catalog.resolve(&model);

        let mut outputs = Vec::new();
        for (output_key, target) in &config.output_mapping {
            let value = result
                .get(&target.node_id)
                .and_then(|node| node.get(&target.output_key));
            match value {
                Some(Value::String(s)) => outputs.push((output_key.clone(), s.clone())),
                Some(Value::Null) | None => {
                    debug!(
                        job_id = %job_id,
                        node_id = %target.node_id,
                        output_key = %target.output_key,
                        "Output mapping produced no value"
                    );
                }
                Some(other) => outputs.push((output_key.clone(), other.to_string())),
            }
        }
        outputs
    }

    /// Cancel a job: guarded transition, then cascade into the workflow
    /// task (which cancels any in-flight remote work).
    pub async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let snapshot = self
            .set_status(job_id, JobStatus::Cancelled, |job| {
                job.error = Some("Job cancelled by user".to_string());
                job.completed_at = Some(Utc::now());
            })
            .await?;

        if let Some(task_id) = &snapshot.workflow_task_id {
            self.workflows.cancel(task_id).await;
        }
        info!(job_id = %job_id, "Job cancelled");
        Ok(())
    }

    /// Cancel every pending job. Returns how many were removed.
    pub async fn purge_queue(&self) -> usize {
        let pending: Vec<String> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|job| job.status == JobStatus::Pending)
                .map(|job| job.id.clone())
                .collect()
        };

        let mut removed = 0;
        for job_id in pending {
            if self.cancel(&job_id).await.is_ok() {
                removed += 1;
            }
        }
        info!(removed, "Purged pending jobs");
        removed
    }

    pub async fn get(&self, job_id: &str) -> Option<JobState> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Estimated wait: queued-or-running jobs times the recent average
    /// processing time.
    pub async fn estimated_wait_time(&self) -> f64 {
        let average = {
            let stats = self.stats.lock().await;
            if stats.processing_times.is_empty() {
                DEFAULT_PROCESSING_SECS
            } else {
                stats.processing_times.iter().sum::<f64>() / stats.processing_times.len() as f64
            }
        };
        self.active_job_count().await as f64 * average
    }

    pub async fn health(&self) -> HealthReport {
        let (in_progress, in_queue) = {
            let jobs = self.jobs.read().await;
            let in_progress = jobs
                .values()
                .filter(|j| j.status == JobStatus::Processing)
                .count();
            let in_queue = jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .count();
            (in_progress, in_queue)
        };
        let stats = self.stats.lock().await;
        HealthReport {
            status: "ok",
            jobs: JobCounts {
                completed: stats.completed,
                failed: stats.failed,
                in_progress,
                in_queue,
            },
        }
    }

    async fn active_job_count(&self) -> usize {
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
            .count()
    }

    /// Transition a job and publish the user webhook when the status
    /// actually changed. Terminal states reject transitions.
    async fn set_status<F>(
        &self,
        job_id: &str,
        status: JobStatus,
        mutate: F,
    ) -> Result<JobState, JobError>
    where
        F: FnOnce(&mut JobState),
    {
        let (snapshot, changed) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
            if job.status.is_terminal() {
                return Err(JobError::InvalidTransition(job.status.to_string()));
            }
            let changed = job.status != status;
            if changed {
                job.transition(status)?;
            }
            mutate(job);
            (job.clone(), changed)
        };

        if changed {
            self.record_stats(&snapshot).await;
            self.post_user_webhook(&snapshot).await;
        }
        Ok(snapshot)
    }

    async fn record_stats(&self, job: &JobState) {
        match job.status {
            JobStatus::Completed => {
                let mut stats = self.stats.lock().await;
                stats.completed += 1;
                if let Some(completed_at) = job.completed_at {
                    let elapsed = (completed_at - job.created_at).num_milliseconds() as f64 / 1000.0;
                    stats.processing_times.push_back(elapsed.max(0.0));
                    while stats.processing_times.len() > MAX_PROCESSING_TIMES {
                        stats.processing_times.pop_front();
                    }
                }
            }
            JobStatus::Failed => {
                self.stats.lock().await.failed += 1;
            }
            _ => {}
        }
    }

    async fn post_user_webhook(&self, job: &JobState) {
        let Some(url) = &job.webhook_url else {
            return;
        };
        debug!(job_id = %job.id, status = %job.status, "Posting user webhook");
        self.client.post_webhook(url, &job.webhook_payload()).await;
    }
}
