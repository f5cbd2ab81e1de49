//! The pipeline facade
//!
//! [`Pipeline`] owns the pure components (detector, predictor, generator)
//! and the collaborators they read from. Every public operation has an
//! `_at` variant taking the current time so scheduled runs and tests can
//! pin the clock.

use crate::config::PipelineConfig;
use crate::detection::cold_start::{patterns_from_templates, FALLBACK_CLUSTER};
use crate::detection::{DetectionOutcome, PatternDetector};
use crate::error::{PipelineError, Result};
use crate::feedback::{FeedbackHandler, FeedbackOutcome};
use crate::insight::{
    InsightContext, InsightGenerator, InsightRenderer, TemplateRenderer, WeekStats,
};
use crate::jobs::retry::with_retry;
use crate::risk::{RiskInputs, RiskPredictor, WeeklyRiskSummary};
use crate::services::clusters::{assign_cluster, ClusterTable, InterviewAnswer, StaticClusterTable};
use crate::services::lessons::{LessonCatalog, LessonProgress};
use crate::services::llm::LlmRenderer;
use crate::services::subscriptions::SubscriptionService;
use crate::storage::{EventStore, StorageBackend};
use crate::types::{
    FoodEvent, Insight, InsightId, Pattern, PatternId, RiskScore, UserId, UserProfile,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Result of asking for a detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectionRun {
    Completed(DetectionOutcome),
    /// A run for the same user was already in flight
    Skipped,
}

/// Whether an insight read produced today's insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    /// Generation failed; this is the last good insight
    MostRecent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodayInsight {
    pub insight: Insight,
    pub freshness: Freshness,
}

/// Summary of one batch over all users
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub users_processed: usize,
    pub changes_made: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Events with `timestamp <= now` when used as an exclusive upper bound
fn through(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::microseconds(1)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Collaborator failures that are not already classified become
/// `UpstreamUnavailable`
fn upstream(source: &'static str) -> impl Fn(PipelineError) -> PipelineError {
    move |err| match err {
        PipelineError::UpstreamUnavailable(_)
        | PipelineError::NotFound(_)
        | PipelineError::InvalidInput(_) => err,
        other => PipelineError::UpstreamUnavailable(format!("{}: {}", source, other)),
    }
}

/// Marks a user's detection as running until dropped
struct InFlightGuard {
    users: Arc<Mutex<HashSet<UserId>>>,
    user_id: UserId,
}

impl InFlightGuard {
    fn acquire(users: &Arc<Mutex<HashSet<UserId>>>, user_id: UserId) -> Option<Self> {
        let mut set = users.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(user_id) {
            return None;
        }
        Some(Self {
            users: users.clone(),
            user_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.users.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.user_id);
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn StorageBackend>,
    events: Arc<dyn EventStore>,
    clusters: Arc<dyn ClusterTable>,
    subscriptions: Arc<dyn SubscriptionService>,
    lessons: Arc<dyn LessonProgress>,
    renderer: Arc<dyn InsightRenderer>,
    detector: PatternDetector,
    predictor: RiskPredictor,
    generator: InsightGenerator,
    feedback: FeedbackHandler<dyn StorageBackend>,
    in_flight: Arc<Mutex<HashSet<UserId>>>,
}

impl Pipeline {
    /// Wire a pipeline whose collaborators all live in one store
    pub fn new<S>(config: PipelineConfig, store: Arc<S>) -> Self
    where
        S: StorageBackend + EventStore + SubscriptionService + LessonProgress + 'static,
    {
        let renderer: Arc<dyn InsightRenderer> = if config.llm.enabled {
            match LlmRenderer::new(config.llm.clone()) {
                Ok(llm) => {
                    info!("Insight phrasing enabled with model {}", config.llm.model);
                    Arc::new(llm)
                }
                Err(e) => {
                    warn!("LLM phrasing disabled: {}", e);
                    Arc::new(TemplateRenderer)
                }
            }
        } else {
            Arc::new(TemplateRenderer)
        };

        let backend: Arc<dyn StorageBackend> = store.clone();

        Self {
            detector: PatternDetector::new(config.detection.clone()),
            predictor: RiskPredictor::new(config.risk.clone()),
            generator: InsightGenerator::new(config.insight.clone(), LessonCatalog::builtin()),
            feedback: FeedbackHandler::new(backend.clone()),
            store: backend,
            events: store.clone(),
            clusters: Arc::new(StaticClusterTable::builtin()),
            subscriptions: store.clone(),
            lessons: store,
            renderer,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            config,
        }
    }

    pub fn with_event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cluster_table(mut self, clusters: Arc<dyn ClusterTable>) -> Self {
        self.clusters = clusters;
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Arc<dyn SubscriptionService>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn InsightRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_lesson_catalog(mut self, catalog: LessonCatalog) -> Self {
        self.generator = InsightGenerator::new(self.config.insight.clone(), catalog);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn lesson_catalog(&self) -> &LessonCatalog {
        self.generator.catalog()
    }

    // ---------------------------------------------------------------------
    // Detection
    // ---------------------------------------------------------------------

    pub async fn detect_patterns(&self, user_id: UserId) -> Result<DetectionRun> {
        self.detect_patterns_at(user_id, Utc::now()).await
    }

    /// Run detection for one user. A second call while one is in flight
    /// returns [`DetectionRun::Skipped`].
    pub async fn detect_patterns_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<DetectionRun> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, user_id) else {
            debug!("Detection already running for {}, skipping", user_id);
            return Ok(DetectionRun::Skipped);
        };

        let since = now - Duration::days(i64::from(self.config.detection.window_days));
        let events = self
            .events
            .list_events(user_id, since, through(now))
            .await
            .map_err(upstream("event store"))?;

        let outcome = if events.is_empty() {
            DetectionOutcome::Empty
        } else if self.detector.needs_cold_start(events.len()) {
            self.cold_start(user_id, now).await?
        } else {
            DetectionOutcome::Detected {
                patterns: self.detector.detect(user_id, &events, now),
            }
        };

        if matches!(outcome, DetectionOutcome::Empty) {
            debug!("No events in window for {}, leaving patterns untouched", user_id);
        } else {
            let superseded = self
                .store
                .replace_active_patterns(user_id, outcome.patterns())
                .await?;
            // Today's cached score was built from the superseded set
            self.store.clear_risk(user_id, now.date_naive()).await?;
            info!(
                "Detection for {}: {} patterns from {} events ({} superseded, preliminary: {})",
                user_id,
                outcome.patterns().len(),
                events.len(),
                superseded,
                outcome.is_preliminary()
            );
        }

        Ok(DetectionRun::Completed(outcome))
    }

    async fn cold_start(&self, user_id: UserId, now: DateTime<Utc>) -> Result<DetectionOutcome> {
        let cluster_id = self
            .store
            .get_profile(user_id)
            .await?
            .and_then(|p| p.cluster_id)
            .unwrap_or_else(|| FALLBACK_CLUSTER.to_string());

        let (cluster_id, templates) = match self.clusters.get_cluster_patterns(&cluster_id).await {
            Ok(templates) => (cluster_id, templates),
            Err(PipelineError::NotFound(_)) if cluster_id != FALLBACK_CLUSTER => {
                warn!("Unknown cluster {} for {}, using {}", cluster_id, user_id, FALLBACK_CLUSTER);
                let templates = self
                    .clusters
                    .get_cluster_patterns(FALLBACK_CLUSTER)
                    .await
                    .map_err(upstream("cluster table"))?;
                (FALLBACK_CLUSTER.to_string(), templates)
            }
            Err(e) => return Err(upstream("cluster table")(e)),
        };

        let patterns = patterns_from_templates(user_id, &cluster_id, &templates, now);
        Ok(DetectionOutcome::ColdStart {
            cluster_id,
            patterns,
        })
    }

    /// Append an event and run detection when the user's count reaches a
    /// multiple of the trigger count
    pub async fn log_event(&self, event: FoodEvent) -> Result<Option<DetectionRun>> {
        if event.raw_text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("raw_text must not be empty".to_string()));
        }
        self.events
            .append_event(&event)
            .await
            .map_err(upstream("event store"))?;
        self.on_food_logged_at(&event, Utc::now().max(event.timestamp)).await
    }

    pub async fn on_food_logged(&self, event: &FoodEvent) -> Result<Option<DetectionRun>> {
        self.on_food_logged_at(event, Utc::now().max(event.timestamp)).await
    }

    pub async fn on_food_logged_at(
        &self,
        event: &FoodEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<DetectionRun>> {
        let every = self.config.detection.trigger_every as u64;
        let count = self
            .events
            .count_events(event.user_id)
            .await
            .map_err(upstream("event store"))?;

        if every == 0 || count < every || count % every != 0 {
            debug!("{} has {} events, no detection triggered", event.user_id, count);
            return Ok(None);
        }

        info!("{} reached {} events, triggering detection", event.user_id, count);
        self.detect_patterns_at(event.user_id, now).await.map(Some)
    }

    pub async fn list_patterns(&self, user_id: UserId, include_inactive: bool) -> Result<Vec<Pattern>> {
        self.store.list_patterns(user_id, include_inactive).await
    }

    // ---------------------------------------------------------------------
    // Risk
    // ---------------------------------------------------------------------

    pub async fn get_risk_today(&self, user_id: UserId) -> Result<RiskScore> {
        self.get_risk_today_at(user_id, Utc::now()).await
    }

    /// Today's risk. Serves the cached score while it is younger than the
    /// refresh window; when recomputing fails the last cached score is
    /// returned instead.
    pub async fn get_risk_today_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<RiskScore> {
        let today = now.date_naive();
        let cached = self.store.get_risk(user_id, today).await?;

        if let Some(score) = &cached {
            let age = now.signed_duration_since(score.computed_at);
            if age.to_std().map_or(true, |a| a < self.config.risk.cache_refresh) {
                return Ok(score.clone());
            }
        }

        match self.refresh_risk(user_id, now).await {
            Ok(score) => Ok(score),
            Err(e) => {
                let fallback = match cached {
                    Some(score) => Some(score),
                    None => self.store.latest_risk(user_id).await?,
                };
                match fallback {
                    Some(score) => {
                        warn!(
                            "Risk refresh for {} failed ({}), serving score from {}",
                            user_id, e, score.computed_at
                        );
                        Ok(score)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Recompute and cache today's risk
    pub async fn refresh_risk(&self, user_id: UserId, now: DateTime<Utc>) -> Result<RiskScore> {
        let today = now.date_naive();
        let patterns = self.store.list_patterns(user_id, false).await?;
        let today_events = self
            .events
            .list_events(user_id, start_of_day(today), through(now))
            .await
            .map_err(upstream("event store"))?;
        let lesson_completed_today = self
            .lessons
            .completed_lesson_on(user_id, today)
            .await
            .map_err(upstream("lessons"))?;

        let score = self.predictor.predict(&RiskInputs {
            user_id,
            now,
            patterns: &patterns,
            today_events: &today_events,
            lesson_completed_today,
            is_weekend: is_weekend(today),
        });

        self.store.put_risk(&score).await?;
        debug!(
            "Risk for {} on {}: {} ({:.2})",
            user_id,
            today,
            score.level.as_str(),
            score.score
        );
        Ok(score)
    }

    /// Cached scores for the seven days ending today
    pub async fn weekly_risk(&self, user_id: UserId, today: NaiveDate) -> Result<Option<WeeklyRiskSummary>> {
        let scores = self
            .store
            .risk_history(user_id, today - Duration::days(6), today)
            .await?;
        Ok(WeeklyRiskSummary::from_scores(&scores))
    }

    // ---------------------------------------------------------------------
    // Insights
    // ---------------------------------------------------------------------

    pub async fn get_today_insight(&self, user_id: UserId) -> Result<TodayInsight> {
        self.get_today_insight_at(user_id, Utc::now()).await
    }

    /// Today's insight, generating it on the first call of the day. When
    /// generation fails the most recent stored insight is returned.
    pub async fn get_today_insight_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<TodayInsight> {
        match self.generate_today_insight(user_id, now).await {
            Ok((insight, _)) => Ok(TodayInsight {
                insight,
                freshness: Freshness::Fresh,
            }),
            Err(e) => match self.store.latest_insight(user_id).await? {
                Some(insight) => {
                    let age = now.signed_duration_since(insight.created_at);
                    if age.to_std().map_or(false, |a| a > self.config.insight.cache_refresh) {
                        warn!(
                            "Insight for {} is stale (from {}), generation failed: {}",
                            user_id, insight.created_at, e
                        );
                    } else {
                        warn!("Insight generation for {} failed, serving latest: {}", user_id, e);
                    }
                    Ok(TodayInsight {
                        insight,
                        freshness: Freshness::MostRecent,
                    })
                }
                None => Err(e),
            },
        }
    }

    /// Return today's stored insight or create it. The flag says whether a
    /// new insight was created.
    ///
    /// The store keeps at most one insight per user and day; a caller that
    /// loses a concurrent race returns the stored one. Delivery bookkeeping
    /// is idempotent and repeated on every call, so a retry after a partial
    /// failure finishes it without double counting.
    pub async fn generate_today_insight(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(Insight, bool)> {
        let today = now.date_naive();
        if let Some(existing) = self.store.insight_for_day(user_id, today).await? {
            self.complete_delivery(&existing, now).await?;
            return Ok((existing, false));
        }

        let mut profile = match self.store.get_profile(user_id).await? {
            Some(profile) => profile,
            None => UserProfile {
                created_at: now,
                ..UserProfile::new(user_id, None)
            },
        };
        crate::insight::RotationCursor::advance_for(&mut profile, today);

        let patterns = self.store.list_patterns(user_id, false).await?;

        let week_ago = now - Duration::days(7);
        let current = self
            .events
            .list_events(user_id, week_ago, through(now))
            .await
            .map_err(upstream("event store"))?;
        let previous = self
            .events
            .list_events(user_id, week_ago - Duration::days(7), week_ago)
            .await
            .map_err(upstream("event store"))?;

        let completed: HashSet<String> = self
            .lessons
            .completed_lessons(user_id)
            .await
            .map_err(upstream("lessons"))?
            .into_iter()
            .map(|c| c.lesson_id)
            .collect();

        let received_so_far = self
            .subscriptions
            .insights_received_count(user_id)
            .await
            .map_err(upstream("subscriptions"))?;
        let premium = self
            .subscriptions
            .is_premium(user_id)
            .await
            .map_err(upstream("subscriptions"))?;

        let ctx = InsightContext {
            user_id,
            now,
            rotation_day: profile.rotation_day,
            active_patterns: &patterns,
            current_week: WeekStats::from_events(&current),
            previous_week: WeekStats::from_events(&previous),
            completed_lessons: &completed,
            weekly_risk: self.weekly_risk(user_id, today).await?,
            received_so_far,
            premium,
        };

        let insight = self.generator.generate(&ctx, self.renderer.as_ref()).await;

        if !self.store.insert_insight(&insight).await? {
            let stored = self
                .store
                .insight_for_day(user_id, today)
                .await?
                .ok_or_else(|| PipelineError::NotFound(format!("insight for {} on {}", user_id, today)))?;
            debug!("Concurrent generation for {} already stored {}", user_id, stored.id);
            self.complete_delivery(&stored, now).await?;
            return Ok((stored, false));
        }
        self.complete_delivery(&insight, now).await?;

        info!(
            "Generated {} insight for {} (day {}, locked: {})",
            insight.kind.as_str(),
            user_id,
            insight.rotation_day,
            insight.locked
        );
        Ok((insight, true))
    }

    /// Bring the rotation cursor and the delivered counter in line with a
    /// stored insight
    async fn complete_delivery(&self, insight: &Insight, now: DateTime<Utc>) -> Result<()> {
        let today = insight.date();
        let mut profile = match self.store.get_profile(insight.user_id).await? {
            Some(profile) => profile,
            None => UserProfile {
                created_at: now,
                ..UserProfile::new(insight.user_id, None)
            },
        };
        let behind = match profile.rotation_date {
            None => true,
            Some(last) => last < today || (last == today && profile.rotation_day != insight.rotation_day),
        };
        if behind {
            profile.rotation_day = insight.rotation_day;
            profile.rotation_date = Some(today);
            self.store.upsert_profile(&profile).await?;
        }

        self.subscriptions
            .record_insight_delivered(insight.user_id, insight.id)
            .await
            .map_err(upstream("subscriptions"))?;
        Ok(())
    }

    pub async fn mark_insight_seen(&self, insight_id: InsightId) -> Result<Insight> {
        self.store.mark_insight_seen(insight_id).await
    }

    // ---------------------------------------------------------------------
    // Feedback, onboarding, lessons
    // ---------------------------------------------------------------------

    pub async fn submit_pattern_feedback(&self, pattern_id: PatternId, disputed: bool) -> Result<FeedbackOutcome> {
        self.submit_pattern_feedback_at(pattern_id, disputed, Utc::now()).await
    }

    /// Apply feedback; a dispute also drops the user's cached risk for the day
    pub async fn submit_pattern_feedback_at(
        &self,
        pattern_id: PatternId,
        disputed: bool,
        now: DateTime<Utc>,
    ) -> Result<FeedbackOutcome> {
        self.feedback.submit_at(pattern_id, disputed, now.date_naive()).await
    }

    /// Store the cold-start cluster derived from onboarding answers
    pub async fn assign_cluster(&self, user_id: UserId, answers: &[InterviewAnswer]) -> Result<UserProfile> {
        let cluster = assign_cluster(answers);
        let mut profile = self
            .store
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(user_id, None));
        profile.cluster_id = Some(cluster.to_string());
        self.store.upsert_profile(&profile).await?;
        info!("Assigned cluster {} to {}", cluster, user_id);
        Ok(profile)
    }

    pub async fn complete_lesson(&self, user_id: UserId, lesson_id: &str, at: DateTime<Utc>) -> Result<()> {
        if self.lesson_catalog().get(lesson_id).is_none() {
            return Err(PipelineError::InvalidInput(format!("unknown lesson {}", lesson_id)));
        }
        self.lessons.complete_lesson(user_id, lesson_id, at).await
    }

    // ---------------------------------------------------------------------
    // Batches
    // ---------------------------------------------------------------------

    async fn users(&self, limit: usize) -> Result<Vec<UserId>> {
        let mut users = self
            .events
            .list_users()
            .await
            .map_err(upstream("event store"))?;
        users.truncate(limit);
        Ok(users)
    }

    pub async fn run_daily_detection_for_all_users(&self) -> Result<BatchReport> {
        self.run_daily_detection_for_all_users_at(Utc::now(), self.config.jobs.detection.batch_size)
            .await
    }

    pub async fn run_daily_detection_for_all_users_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<BatchReport> {
        let users = self.users(limit).await?;
        info!("Daily detection over {} users", users.len());

        let mut report = BatchReport::default();
        for user_id in users {
            report.users_processed += 1;
            match with_retry(&self.config.retry, || self.detect_patterns_at(user_id, now)).await {
                Ok(DetectionRun::Completed(DetectionOutcome::Empty)) => {}
                Ok(DetectionRun::Completed(_)) => report.changes_made += 1,
                Ok(DetectionRun::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!("Detection failed for {}: {}", user_id, e);
                    report.errors.push(format!("{}: {}", user_id, e));
                }
            }
        }
        Ok(report)
    }

    pub async fn run_daily_insight_generation(&self) -> Result<BatchReport> {
        self.run_daily_insight_generation_at(Utc::now(), self.config.jobs.insights.batch_size)
            .await
    }

    pub async fn run_daily_insight_generation_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<BatchReport> {
        let users = self.users(limit).await?;
        info!("Daily insight generation over {} users", users.len());

        let mut report = BatchReport::default();
        for user_id in users {
            report.users_processed += 1;
            match with_retry(&self.config.retry, || self.generate_today_insight(user_id, now)).await {
                Ok((_, true)) => report.changes_made += 1,
                Ok((_, false)) => report.skipped += 1,
                Err(e) => {
                    error!("Insight generation failed for {}: {}", user_id, e);
                    report.errors.push(format!("{}: {}", user_id, e));
                }
            }
        }
        Ok(report)
    }

    pub async fn run_daily_risk_refresh(&self) -> Result<BatchReport> {
        self.run_daily_risk_refresh_at(Utc::now(), self.config.jobs.risk.batch_size)
            .await
    }

    pub async fn run_daily_risk_refresh_at(&self, now: DateTime<Utc>, limit: usize) -> Result<BatchReport> {
        let users = self.users(limit).await?;
        info!("Daily risk refresh over {} users", users.len());

        let mut report = BatchReport::default();
        for user_id in users {
            report.users_processed += 1;
            match with_retry(&self.config.retry, || self.refresh_risk(user_id, now)).await {
                Ok(_) => report.changes_made += 1,
                Err(e) => {
                    error!("Risk refresh failed for {}: {}", user_id, e);
                    report.errors.push(format!("{}: {}", user_id, e));
                }
            }
        }
        Ok(report)
    }
}
