//! Subscription collaborator
//!
//! Billing lives outside the pipeline. We only read the premium flag and
//! the running count of delivered insights, and bump that count once per
//! generated insight.

use crate::error::Result;
use crate::types::{InsightId, UserId};
use async_trait::async_trait;

#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Insights delivered to the user so far
    async fn insights_received_count(&self, user_id: UserId) -> Result<u64>;

    async fn is_premium(&self, user_id: UserId) -> Result<bool>;

    /// Count `insight_id` as delivered and return the new total. Recording
    /// the same insight again leaves the count unchanged.
    async fn record_insight_delivered(&self, user_id: UserId, insight_id: InsightId) -> Result<u64>;

    async fn set_premium(&self, user_id: UserId, premium: bool) -> Result<()>;
}

/// Whether the next insight is locked for this user
pub fn should_lock(received_so_far: u64, is_premium: bool, free_tier_limit: u32) -> bool {
    !is_premium && received_so_far >= u64::from(free_tier_limit)
}
