//! In-process storage
//!
//! Backs tests and ephemeral runs. Each collection sits behind its own
//! lock; the pattern replace-set happens under a single write guard.

use crate::error::{PipelineError, Result};
use crate::services::lessons::{LessonCompletion, LessonProgress};
use crate::services::subscriptions::SubscriptionService;
use crate::storage::{EventStore, StorageBackend};
use crate::types::{
    DeactivationReason, FoodEvent, Insight, InsightId, Pattern, PatternId, RiskScore, UserId,
    UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default, Clone)]
struct SubscriptionState {
    premium: bool,
    delivered: HashSet<InsightId>,
}

#[derive(Default, Clone)]
pub struct MemoryStorage {
    events: Arc<RwLock<HashMap<UserId, Vec<FoodEvent>>>>,
    patterns: Arc<RwLock<HashMap<PatternId, Pattern>>>,
    profiles: Arc<RwLock<HashMap<UserId, UserProfile>>>,
    insights: Arc<RwLock<HashMap<InsightId, Insight>>>,
    risk: Arc<RwLock<HashMap<(UserId, NaiveDate), RiskScore>>>,
    subscriptions: Arc<RwLock<HashMap<UserId, SubscriptionState>>>,
    lessons: Arc<RwLock<HashMap<UserId, Vec<LessonCompletion>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_confidence(patterns: &mut [Pattern]) {
    patterns.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.discovered_at.cmp(&b.discovered_at))
            .then(a.id.cmp(&b.id))
    });
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn append_event(&self, event: &FoodEvent) -> Result<()> {
        let mut events = self.events.write().await;
        let log = events.entry(event.user_id).or_default();
        log.push(event.clone());
        log.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(())
    }

    async fn list_events(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<FoodEvent>> {
        let events = self.events.read().await;
        Ok(events
            .get(&user_id)
            .map(|log| {
                log.iter()
                    .filter(|e| e.timestamp >= since && e.timestamp < until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_events(&self, user_id: UserId) -> Result<u64> {
        let events = self.events.read().await;
        Ok(events.get(&user_id).map_or(0, |log| log.len() as u64))
    }

    async fn list_users(&self) -> Result<Vec<UserId>> {
        let events = self.events.read().await;
        let users: BTreeSet<UserId> = events.keys().copied().collect();
        Ok(users.into_iter().collect())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn replace_active_patterns(&self, user_id: UserId, patterns: &[Pattern]) -> Result<usize> {
        let mut store = self.patterns.write().await;

        let mut superseded = 0;
        for pattern in store.values_mut() {
            if pattern.user_id == user_id && pattern.active {
                pattern.deactivate(DeactivationReason::Superseded);
                superseded += 1;
            }
        }
        for pattern in patterns {
            store.insert(pattern.id, pattern.clone());
        }

        debug!(
            "Replaced active patterns for {}: {} superseded, {} inserted",
            user_id,
            superseded,
            patterns.len()
        );
        Ok(superseded)
    }

    async fn get_pattern(&self, id: PatternId) -> Result<Pattern> {
        let store = self.patterns.read().await;
        store
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("pattern {}", id)))
    }

    async fn update_pattern(&self, pattern: &Pattern) -> Result<()> {
        let mut store = self.patterns.write().await;
        match store.get_mut(&pattern.id) {
            Some(existing) => {
                *existing = pattern.clone();
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!("pattern {}", pattern.id))),
        }
    }

    async fn list_patterns(&self, user_id: UserId, include_inactive: bool) -> Result<Vec<Pattern>> {
        let store = self.patterns.read().await;
        let mut patterns: Vec<Pattern> = store
            .values()
            .filter(|p| p.user_id == user_id && (include_inactive || p.active))
            .cloned()
            .collect();
        by_confidence(&mut patterns);
        Ok(patterns)
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(&user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn insert_insight(&self, insight: &Insight) -> Result<bool> {
        let mut insights = self.insights.write().await;
        let date = insight.date();
        if insights
            .values()
            .any(|i| i.user_id == insight.user_id && i.date() == date)
        {
            debug!("Insight for {} on {} already stored", insight.user_id, date);
            return Ok(false);
        }
        insights.insert(insight.id, insight.clone());
        Ok(true)
    }

    async fn get_insight(&self, id: InsightId) -> Result<Insight> {
        self.insights
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("insight {}", id)))
    }

    async fn insight_for_day(&self, user_id: UserId, date: NaiveDate) -> Result<Option<Insight>> {
        let insights = self.insights.read().await;
        Ok(insights
            .values()
            .filter(|i| i.user_id == user_id && i.date() == date)
            .min_by_key(|i| i.created_at)
            .cloned())
    }

    async fn latest_insight(&self, user_id: UserId) -> Result<Option<Insight>> {
        let insights = self.insights.read().await;
        Ok(insights
            .values()
            .filter(|i| i.user_id == user_id)
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn mark_insight_seen(&self, id: InsightId) -> Result<Insight> {
        let mut insights = self.insights.write().await;
        let insight = insights
            .get_mut(&id)
            .ok_or_else(|| PipelineError::NotFound(format!("insight {}", id)))?;
        insight.seen = true;
        Ok(insight.clone())
    }

    async fn put_risk(&self, score: &RiskScore) -> Result<()> {
        self.risk
            .write()
            .await
            .insert((score.user_id, score.date), score.clone());
        Ok(())
    }

    async fn get_risk(&self, user_id: UserId, date: NaiveDate) -> Result<Option<RiskScore>> {
        Ok(self.risk.read().await.get(&(user_id, date)).cloned())
    }

    async fn latest_risk(&self, user_id: UserId) -> Result<Option<RiskScore>> {
        let risk = self.risk.read().await;
        Ok(risk
            .values()
            .filter(|r| r.user_id == user_id)
            .max_by_key(|r| r.date)
            .cloned())
    }

    async fn clear_risk(&self, user_id: UserId, date: NaiveDate) -> Result<()> {
        self.risk.write().await.remove(&(user_id, date));
        Ok(())
    }

    async fn risk_history(
        &self,
        user_id: UserId,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<RiskScore>> {
        let risk = self.risk.read().await;
        let mut scores: Vec<RiskScore> = risk
            .values()
            .filter(|r| r.user_id == user_id && r.date >= since && r.date <= until)
            .cloned()
            .collect();
        scores.sort_by_key(|r| r.date);
        Ok(scores)
    }
}

#[async_trait]
impl SubscriptionService for MemoryStorage {
    async fn insights_received_count(&self, user_id: UserId) -> Result<u64> {
        let subs = self.subscriptions.read().await;
        Ok(subs.get(&user_id).map_or(0, |s| s.delivered.len() as u64))
    }

    async fn is_premium(&self, user_id: UserId) -> Result<bool> {
        let subs = self.subscriptions.read().await;
        Ok(subs.get(&user_id).is_some_and(|s| s.premium))
    }

    async fn record_insight_delivered(&self, user_id: UserId, insight_id: InsightId) -> Result<u64> {
        let mut subs = self.subscriptions.write().await;
        let state = subs.entry(user_id).or_default();
        state.delivered.insert(insight_id);
        Ok(state.delivered.len() as u64)
    }

    async fn set_premium(&self, user_id: UserId, premium: bool) -> Result<()> {
        let mut subs = self.subscriptions.write().await;
        subs.entry(user_id).or_default().premium = premium;
        Ok(())
    }
}

#[async_trait]
impl LessonProgress for MemoryStorage {
    async fn completed_lessons(&self, user_id: UserId) -> Result<Vec<LessonCompletion>> {
        let lessons = self.lessons.read().await;
        Ok(lessons.get(&user_id).cloned().unwrap_or_default())
    }

    async fn complete_lesson(
        &self,
        user_id: UserId,
        lesson_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut lessons = self.lessons.write().await;
        let done = lessons.entry(user_id).or_default();
        if !done.iter().any(|c| c.lesson_id == lesson_id) {
            done.push(LessonCompletion {
                lesson_id: lesson_id.to_string(),
                completed_at: at,
            });
        }
        Ok(())
    }
}
