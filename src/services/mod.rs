//! Collaborators around the pipeline
//!
//! Cluster templates, the lesson catalog, subscription state and the
//! optional LLM phrasing of insights.

pub mod clusters;
pub mod lessons;
pub mod llm;
pub mod subscriptions;

pub use clusters::{assign_cluster, ClusterTable, InterviewAnswer, StaticClusterTable};
pub use lessons::{Lesson, LessonCatalog, LessonCompletion, LessonProgress};
pub use llm::LlmRenderer;
pub use subscriptions::{should_lock, SubscriptionService};
