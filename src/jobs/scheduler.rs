// Background Job Scheduler
//
// Runs the daily pipeline batches on their configured intervals and keeps
// an in-memory history of every run.

use crate::config::{JobConfig, PipelineConfig};
use crate::error::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};

/// Runs kept in memory per scheduler
const HISTORY_LIMIT: usize = 500;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job execution failed: {0}")]
    ExecutionError(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Job configuration invalid: {0}")]
    ConfigError(String),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job error: {0}")]
    JobError(#[from] JobError),
}

/// Report generated after job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Number of users processed
    pub users_processed: usize,

    /// Number of users whose stored state changed
    pub changes_made: usize,

    /// Duration of job execution
    #[serde(with = "serde_duration_millis")]
    pub duration: Duration,

    /// Number of errors encountered
    pub errors: usize,

    /// Optional error message if job failed
    pub error_message: Option<String>,
}

impl JobReport {
    fn failed(duration: Duration, message: String) -> Self {
        Self {
            users_processed: 0,
            changes_made: 0,
            duration,
            errors: 1,
            error_message: Some(message),
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Trait for scheduled pipeline jobs
#[async_trait]
pub trait PipelineJob: Send + Sync {
    /// Job name (for logging and tracking)
    fn name(&self) -> &str;

    /// Run the job with given configuration
    async fn run(&self, config: &JobConfig) -> Result<JobReport, JobError>;

    /// Job-specific gate checked after the interval is due
    async fn should_run(&self) -> Result<bool, JobError> {
        Ok(true)
    }
}

/// Job execution record for tracking history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: String,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub report: Option<JobReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Timeout,
}

/// Background job scheduler
pub struct BackgroundScheduler {
    config: PipelineConfig,
    jobs: Vec<Arc<dyn PipelineJob>>,
    running: Arc<AtomicBool>,
    history: Arc<RwLock<Vec<JobRun>>>,
}

impl BackgroundScheduler {
    /// Create a new scheduler with configuration and jobs
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            jobs: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a job with the scheduler
    pub fn register_job(&mut self, job: Arc<dyn PipelineJob>) {
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Start the scheduler (runs until stopped)
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        tracing::info!("Starting background pipeline scheduler");

        while self.running.load(Ordering::SeqCst) {
            self.run_due_jobs(Utc::now()).await;
            sleep(self.config.jobs.tick).await;
        }

        tracing::info!("Stopping background pipeline scheduler");
        Ok(())
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run every job whose interval has elapsed. Returns the names that ran.
    pub async fn run_due_jobs(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut ran = Vec::new();

        for job in &self.jobs {
            let name = job.name();
            let config = match self.get_job_config(name) {
                Ok(config) => config,
                Err(e) => {
                    tracing::debug!("Skipping job {}: {}", name, e);
                    continue;
                }
            };

            if !self.is_due(name, &config, now).await {
                tracing::debug!("Job {} not due yet", name);
                continue;
            }

            match job.should_run().await {
                Ok(true) => {
                    tracing::info!("Running pipeline job: {}", name);
                    if let Err(e) = self.run_job(job.as_ref()).await {
                        tracing::error!("Job {} failed: {}", name, e);
                    }
                    ran.push(name.to_string());
                }
                Ok(false) => tracing::debug!("Job {} declined to run", name),
                Err(e) => tracing::error!("Failed to check if job {} should run: {}", name, e),
            }
        }

        ran
    }

    async fn is_due(&self, job_name: &str, config: &JobConfig, now: DateTime<Utc>) -> bool {
        let history = self.history.read().await;
        let last = history
            .iter()
            .rev()
            .find(|run| run.job_name == job_name && run.status == JobStatus::Success);

        match last {
            None => true,
            Some(run) => now
                .signed_duration_since(run.started_at)
                .to_std()
                .map_or(false, |elapsed| elapsed >= config.interval),
        }
    }

    /// Run a registered job by name, regardless of its interval
    pub async fn run_named(&self, job_name: &str) -> Result<JobReport, SchedulerError> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name() == job_name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJob(job_name.to_string()))?;
        self.run_job(job.as_ref()).await
    }

    /// Run a specific job with timeout
    pub async fn run_job(&self, job: &dyn PipelineJob) -> Result<JobReport, SchedulerError> {
        let job_name = job.name();
        let job_config = self.get_job_config(job_name)?;

        let start_time = Utc::now();
        let job_id = uuid::Uuid::new_v4().to_string();

        tracing::info!("Starting job {} (id: {})", job_name, job_id);

        let result = timeout(job_config.max_duration, job.run(&job_config)).await;

        let (status, report) = match result {
            Ok(Ok(report)) => {
                tracing::info!(
                    "Job {} completed: {} users, {} changes in {:?}",
                    job_name,
                    report.users_processed,
                    report.changes_made,
                    report.duration
                );
                (JobStatus::Success, report)
            }
            Ok(Err(e)) => {
                tracing::error!("Job {} failed: {}", job_name, e);
                let elapsed = Utc::now()
                    .signed_duration_since(start_time)
                    .to_std()
                    .unwrap_or_default();
                (JobStatus::Failed, JobReport::failed(elapsed, e.to_string()))
            }
            Err(_) => {
                tracing::error!(
                    "Job {} timed out after {:?}",
                    job_name,
                    job_config.max_duration
                );
                (
                    JobStatus::Timeout,
                    JobReport::failed(
                        job_config.max_duration,
                        JobError::Timeout(job_config.max_duration).to_string(),
                    ),
                )
            }
        };

        let job_run = JobRun {
            id: job_id,
            job_name: job_name.to_string(),
            started_at: start_time,
            completed_at: Some(Utc::now()),
            status,
            report: Some(report.clone()),
        };
        self.record_job_run(job_run).await;

        Ok(report)
    }

    /// Get job configuration by job name
    fn get_job_config(&self, job_name: &str) -> Result<JobConfig, SchedulerError> {
        let config = match self.config.job(job_name) {
            Some(config) => config,
            // For testing: allow test jobs with default config
            None if job_name.starts_with("test_") => {
                return Ok(JobConfig {
                    enabled: true,
                    interval: Duration::from_secs(3600),
                    batch_size: 1000,
                    max_duration: Duration::from_secs(5),
                });
            }
            None => return Err(SchedulerError::UnknownJob(job_name.to_string())),
        };

        if !config.enabled {
            return Err(SchedulerError::JobError(JobError::ConfigError(format!(
                "Job {} is disabled",
                job_name
            ))));
        }

        Ok(config.clone())
    }

    async fn record_job_run(&self, job_run: JobRun) {
        tracing::debug!("Job run recorded: {} - {:?}", job_run.job_name, job_run.status);
        let mut history = self.history.write().await;
        history.push(job_run);
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
    }

    /// Most recent runs first, optionally filtered by job name
    pub async fn get_job_history(&self, job_name: Option<&str>, limit: usize) -> Vec<JobRun> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .filter(|run| job_name.map_or(true, |name| run.job_name == name))
            .take(limit)
            .cloned()
            .collect()
    }
}
