//! Nutrimind - eating-behavior pattern pipeline
//!
//! Turns a log of food events into:
//! - Detected behavioral patterns (time, mood, context, sequence, skip)
//! - A daily risk estimate of an overeating episode
//! - One rotating daily insight, gated by the subscription tier
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Core data structures (FoodEvent, Pattern, RiskScore, Insight)
//! - **Detection / Risk / Insight / Feedback**: pure components with no I/O
//! - **Storage**: Event log and pipeline state (libSQL, in-memory)
//! - **Services**: Cluster templates, lessons, subscriptions, LLM phrasing
//! - **Pipeline**: Facade wiring the components to their collaborators
//! - **Jobs / API**: Scheduled daily batches and the HTTP surface
//!
//! # Example
//!
//! ```ignore
//! use nutrimind_core::{LibsqlStorage, Pipeline, PipelineConfig, UserId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> nutrimind_core::Result<()> {
//!     let store = Arc::new(LibsqlStorage::new_local("nutrimind.db").await?);
//!     let pipeline = Pipeline::new(PipelineConfig::default(), store);
//!
//!     let user = UserId::new();
//!     pipeline.detect_patterns(user).await?;
//!     let risk = pipeline.get_risk_today(user).await?;
//!     println!("risk today: {}", risk.level.as_str());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod detection;
pub mod error;
pub mod feedback;
pub mod insight;
pub mod jobs;
pub mod pipeline;
pub mod risk;
pub mod services;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use detection::{DetectionOutcome, PatternDetector};
pub use error::{PipelineError, Result};
pub use feedback::{FeedbackHandler, FeedbackOutcome};
pub use insight::{InsightGenerator, InsightRenderer};
pub use pipeline::{BatchReport, DetectionRun, Freshness, Pipeline, TodayInsight};
pub use risk::RiskPredictor;
pub use storage::{ConnectionMode, EventStore, LibsqlStorage, MemoryStorage, StorageBackend};
pub use types::{
    EatingContext, FoodEvent, Insight, InsightId, InsightKind, Mood, Pattern, PatternId,
    PatternKind, RiskLevel, RiskScore, UserId, UserProfile,
};
