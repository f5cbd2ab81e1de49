// Daily Detection Job
//
// Re-runs pattern detection for every user with logged events. Users whose
// detection is already in flight are counted as skipped.

use super::finish_batch;
use super::scheduler::{JobError, JobReport, PipelineJob};
use crate::config::JobConfig;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

pub struct DailyDetectionJob {
    pipeline: Arc<Pipeline>,
}

impl DailyDetectionJob {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl PipelineJob for DailyDetectionJob {
    fn name(&self) -> &str {
        "daily_detection"
    }

    async fn run(&self, config: &JobConfig) -> Result<JobReport, JobError> {
        let start = Instant::now();
        tracing::info!("Starting daily detection (batch_size: {})", config.batch_size);

        let batch = self
            .pipeline
            .run_daily_detection_for_all_users_at(Utc::now(), config.batch_size)
            .await?;

        if batch.skipped > 0 {
            tracing::info!("{} users skipped, detection already in flight", batch.skipped);
        }
        finish_batch(batch, start)
    }
}
