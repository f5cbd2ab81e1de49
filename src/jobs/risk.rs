// Daily Risk Job
//
// Warms the risk cache for every user. Notification dispatch reads the
// cache elsewhere.

use super::finish_batch;
use super::scheduler::{JobError, JobReport, PipelineJob};
use crate::config::JobConfig;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

pub struct DailyRiskJob {
    pipeline: Arc<Pipeline>,
}

impl DailyRiskJob {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl PipelineJob for DailyRiskJob {
    fn name(&self) -> &str {
        "daily_risk"
    }

    async fn run(&self, config: &JobConfig) -> Result<JobReport, JobError> {
        let start = Instant::now();
        tracing::info!("Starting daily risk refresh (batch_size: {})", config.batch_size);

        let batch = self
            .pipeline
            .run_daily_risk_refresh_at(Utc::now(), config.batch_size)
            .await?;
        finish_batch(batch, start)
    }
}
