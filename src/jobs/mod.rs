// Jobs Module - scheduled pipeline batches
//
// Components:
// - scheduler: interval scheduling, timeouts and run history
// - retry: exponential backoff for upstream failures
// - detection, insights, risk: the three daily batches

pub mod detection;
pub mod insights;
pub mod retry;
pub mod risk;
pub mod scheduler;

pub use detection::DailyDetectionJob;
pub use insights::DailyInsightJob;
pub use risk::DailyRiskJob;
pub use scheduler::{BackgroundScheduler, JobError, JobReport, JobRun, JobStatus, PipelineJob, SchedulerError};

use crate::pipeline::{BatchReport, Pipeline};
use std::sync::Arc;
use std::time::Instant;

impl JobReport {
    pub(crate) fn from_batch(batch: BatchReport, started: Instant) -> Self {
        Self {
            users_processed: batch.users_processed,
            changes_made: batch.changes_made,
            duration: started.elapsed(),
            errors: batch.errors.len(),
            error_message: if batch.errors.is_empty() {
                None
            } else {
                Some(batch.errors.join("; "))
            },
        }
    }
}

/// Turn a batch into the job result. A batch where every user failed is
/// a failed run, not a report with errors.
pub(crate) fn finish_batch(batch: BatchReport, started: Instant) -> Result<JobReport, JobError> {
    if batch.users_processed > 0 && batch.errors.len() == batch.users_processed {
        return Err(JobError::ExecutionError(format!(
            "all {} users failed: {}",
            batch.users_processed,
            batch.errors.join("; ")
        )));
    }
    Ok(JobReport::from_batch(batch, started))
}

/// Scheduler with the three daily jobs registered
pub fn default_scheduler(pipeline: Arc<Pipeline>) -> BackgroundScheduler {
    let mut scheduler = BackgroundScheduler::new(pipeline.config().clone());
    scheduler.register_job(Arc::new(DailyDetectionJob::new(pipeline.clone())));
    scheduler.register_job(Arc::new(DailyRiskJob::new(pipeline.clone())));
    scheduler.register_job(Arc::new(DailyInsightJob::new(pipeline)));
    scheduler
}
