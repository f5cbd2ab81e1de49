// Daily Insight Job
//
// Generates the day's insight for every user ahead of the first read, so
// the request path usually finds a stored record.

use super::finish_batch;
use super::scheduler::{JobError, JobReport, PipelineJob};
use crate::config::JobConfig;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

pub struct DailyInsightJob {
    pipeline: Arc<Pipeline>,
}

impl DailyInsightJob {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl PipelineJob for DailyInsightJob {
    fn name(&self) -> &str {
        "daily_insights"
    }

    async fn run(&self, config: &JobConfig) -> Result<JobReport, JobError> {
        let start = Instant::now();
        tracing::info!("Starting daily insight generation (batch_size: {})", config.batch_size);

        let batch = self
            .pipeline
            .run_daily_insight_generation_at(Utc::now(), config.batch_size)
            .await?;
        finish_batch(batch, start)
    }
}
