//! Storage layer for the Nutrimind pipeline
//!
//! [`EventStore`] is the append-only meal log owned by ingestion.
//! [`StorageBackend`] holds everything the pipeline derives: patterns,
//! insights, the daily risk cache and per-user profiles.

pub mod libsql;
pub mod memory;

use crate::error::Result;
use crate::types::{
    FoodEvent, Insight, InsightId, Pattern, PatternId, RiskScore, UserId, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub use self::libsql::{ConnectionMode, LibsqlStorage};
pub use self::memory::MemoryStorage;

/// Append-only log of food events
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_event(&self, event: &FoodEvent) -> Result<()>;

    /// Events with `since <= timestamp < until`, ordered by timestamp
    async fn list_events(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<FoodEvent>>;

    /// Total events ever logged by the user
    async fn count_events(&self, user_id: UserId) -> Result<u64>;

    /// Users with at least one logged event
    async fn list_users(&self) -> Result<Vec<UserId>>;
}

/// Storage backend for pipeline-owned state
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Atomically deactivate the user's active patterns as superseded and
    /// insert `patterns`. Returns the number of patterns superseded.
    async fn replace_active_patterns(&self, user_id: UserId, patterns: &[Pattern]) -> Result<usize>;

    async fn get_pattern(&self, id: PatternId) -> Result<Pattern>;

    /// Persist confidence and lifecycle changes of an existing pattern
    async fn update_pattern(&self, pattern: &Pattern) -> Result<()>;

    /// Patterns for a user, highest confidence first
    async fn list_patterns(&self, user_id: UserId, include_inactive: bool) -> Result<Vec<Pattern>>;

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>>;

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()>;

    /// Store the insight unless the user already has one for that day.
    /// Returns `false` when an earlier insight for the day wins.
    async fn insert_insight(&self, insight: &Insight) -> Result<bool>;

    async fn get_insight(&self, id: InsightId) -> Result<Insight>;

    async fn insight_for_day(&self, user_id: UserId, date: NaiveDate) -> Result<Option<Insight>>;

    async fn latest_insight(&self, user_id: UserId) -> Result<Option<Insight>>;

    /// Flip `seen` once; later calls leave the record unchanged
    async fn mark_insight_seen(&self, id: InsightId) -> Result<Insight>;

    /// Cache the day's risk score, replacing any earlier one for that day
    async fn put_risk(&self, score: &RiskScore) -> Result<()>;

    async fn get_risk(&self, user_id: UserId, date: NaiveDate) -> Result<Option<RiskScore>>;

    async fn latest_risk(&self, user_id: UserId) -> Result<Option<RiskScore>>;

    /// Drop the cached score for one day so the next read recomputes it
    async fn clear_risk(&self, user_id: UserId, date: NaiveDate) -> Result<()>;

    /// Cached scores with `since <= date <= until`
    async fn risk_history(
        &self,
        user_id: UserId,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<RiskScore>>;
}
