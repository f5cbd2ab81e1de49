//! User feedback on detected patterns

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{DeactivationReason, Pattern, PatternId};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Confidence removed by one dispute
pub const DISPUTE_DECREMENT: f64 = 0.2;

/// Patterns below this confidence are deactivated; the value itself stays active
pub const ACTIVE_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    pub pattern_id: PatternId,
    pub confidence: f64,
    pub active: bool,
}

impl From<&Pattern> for FeedbackOutcome {
    fn from(pattern: &Pattern) -> Self {
        Self {
            pattern_id: pattern.id,
            confidence: pattern.confidence,
            active: pattern.active,
        }
    }
}

/// Round away binary noise so `0.5 - 0.2` compares equal to `0.3`
fn round_confidence(value: f64) -> f64 {
    (value * 1e9).round() / 1e9
}

/// Apply one dispute in place
pub fn apply_dispute(pattern: &mut Pattern) -> FeedbackOutcome {
    pattern.confidence = round_confidence((pattern.confidence - DISPUTE_DECREMENT).max(0.0));
    if pattern.active && pattern.confidence < ACTIVE_THRESHOLD {
        pattern.deactivate(DeactivationReason::Disputed);
    }
    FeedbackOutcome::from(&*pattern)
}

pub struct FeedbackHandler<S: ?Sized> {
    store: Arc<S>,
}

impl<S: StorageBackend + ?Sized> FeedbackHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record feedback. A non-disputed submission leaves the pattern as is.
    pub async fn submit(&self, pattern_id: PatternId, disputed: bool) -> Result<FeedbackOutcome> {
        self.submit_at(pattern_id, disputed, Utc::now().date_naive()).await
    }

    /// Record feedback given on `today`. A dispute changes the pattern's
    /// weight in the risk score, so the user's cached score for that day is
    /// dropped.
    pub async fn submit_at(
        &self,
        pattern_id: PatternId,
        disputed: bool,
        today: NaiveDate,
    ) -> Result<FeedbackOutcome> {
        let mut pattern = self.store.get_pattern(pattern_id).await?;
        if !disputed {
            debug!("Pattern {} confirmed, nothing to update", pattern_id);
            return Ok(FeedbackOutcome::from(&pattern));
        }

        let was_active = pattern.active;
        let outcome = apply_dispute(&mut pattern);
        self.store.update_pattern(&pattern).await?;
        self.store.clear_risk(pattern.user_id, today).await?;

        if was_active && !outcome.active {
            info!(
                "Pattern {} deactivated after dispute (confidence {:.2})",
                pattern_id, outcome.confidence
            );
        } else {
            debug!(
                "Pattern {} disputed, confidence now {:.2}",
                pattern_id, outcome.confidence
            );
        }
        Ok(outcome)
    }
}
