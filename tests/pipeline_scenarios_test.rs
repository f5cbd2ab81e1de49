//! End-to-end pipeline scenarios over the in-memory store

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{at, evening_bad_mood_week, meal, memory_pipeline, seed, test_config};
use nutrimind_core::insight::{InsightPayload, InsightRenderer, RenderOutcome, UPGRADE_HINT};
use nutrimind_core::services::clusters::InterviewAnswer;
use nutrimind_core::services::SubscriptionService;
use nutrimind_core::types::{DeactivationReason, InsightKind, PatternSource};
use nutrimind_core::{
    DetectionOutcome, DetectionRun, EventStore, FoodEvent, Freshness, InsightId, MemoryStorage, Mood,
    PatternKind, Pipeline, PipelineError, RiskLevel, StorageBackend, UserId,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Event store that is always down
struct DownEventStore;

#[async_trait]
impl EventStore for DownEventStore {
    async fn append_event(&self, _event: &FoodEvent) -> nutrimind_core::Result<()> {
        Err(PipelineError::UpstreamUnavailable("event log offline".into()))
    }

    async fn list_events(
        &self,
        _user_id: UserId,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> nutrimind_core::Result<Vec<FoodEvent>> {
        Err(PipelineError::UpstreamUnavailable("event log offline".into()))
    }

    async fn count_events(&self, _user_id: UserId) -> nutrimind_core::Result<u64> {
        Err(PipelineError::UpstreamUnavailable("event log offline".into()))
    }

    async fn list_users(&self) -> nutrimind_core::Result<Vec<UserId>> {
        Err(PipelineError::UpstreamUnavailable("event log offline".into()))
    }
}

/// Fails the first `failures` reads, then delegates
struct FlakyEventStore {
    inner: Arc<MemoryStorage>,
    failures: AtomicUsize,
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn append_event(&self, event: &FoodEvent) -> nutrimind_core::Result<()> {
        self.inner.append_event(event).await
    }

    async fn list_events(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> nutrimind_core::Result<Vec<FoodEvent>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::UpstreamUnavailable("timeout".into()));
        }
        self.inner.list_events(user_id, since, until).await
    }

    async fn count_events(&self, user_id: UserId) -> nutrimind_core::Result<u64> {
        self.inner.count_events(user_id).await
    }

    async fn list_users(&self) -> nutrimind_core::Result<Vec<UserId>> {
        self.inner.list_users().await
    }
}

/// Subscription collaborator that is always down
struct DownSubscriptions;

#[async_trait]
impl SubscriptionService for DownSubscriptions {
    async fn insights_received_count(&self, _user_id: UserId) -> nutrimind_core::Result<u64> {
        Err(PipelineError::UpstreamUnavailable("billing offline".into()))
    }

    async fn is_premium(&self, _user_id: UserId) -> nutrimind_core::Result<bool> {
        Err(PipelineError::UpstreamUnavailable("billing offline".into()))
    }

    async fn record_insight_delivered(
        &self,
        _user_id: UserId,
        _insight_id: InsightId,
    ) -> nutrimind_core::Result<u64> {
        Err(PipelineError::UpstreamUnavailable("billing offline".into()))
    }

    async fn set_premium(&self, _user_id: UserId, _premium: bool) -> nutrimind_core::Result<()> {
        Err(PipelineError::UpstreamUnavailable("billing offline".into()))
    }
}

/// Fails the next delivery write, then delegates
struct FlakySubscriptions {
    inner: Arc<MemoryStorage>,
    fail_next_delivery: AtomicBool,
}

#[async_trait]
impl SubscriptionService for FlakySubscriptions {
    async fn insights_received_count(&self, user_id: UserId) -> nutrimind_core::Result<u64> {
        self.inner.insights_received_count(user_id).await
    }

    async fn is_premium(&self, user_id: UserId) -> nutrimind_core::Result<bool> {
        self.inner.is_premium(user_id).await
    }

    async fn record_insight_delivered(
        &self,
        user_id: UserId,
        insight_id: InsightId,
    ) -> nutrimind_core::Result<u64> {
        if self.fail_next_delivery.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::UpstreamUnavailable("billing timeout".into()));
        }
        self.inner.record_insight_delivered(user_id, insight_id).await
    }

    async fn set_premium(&self, user_id: UserId, premium: bool) -> nutrimind_core::Result<()> {
        self.inner.set_premium(user_id, premium).await
    }
}

/// Template renderer that takes a while, so concurrent callers overlap
struct SlowRenderer;

#[async_trait]
impl InsightRenderer for SlowRenderer {
    async fn render(&self, _payload: &InsightPayload) -> RenderOutcome {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        RenderOutcome::UseTemplate("slow path".into())
    }
}

fn completed(run: DetectionRun) -> DetectionOutcome {
    match run {
        DetectionRun::Completed(outcome) => outcome,
        DetectionRun::Skipped => panic!("detection unexpectedly skipped"),
    }
}

#[tokio::test]
async fn test_evening_skipper_gets_skip_pattern_and_high_risk() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    seed(store.as_ref(), &evening_bad_mood_week(user)).await;

    // Saturday evening
    let now = at(5, 19);
    let outcome = completed(pipeline.detect_patterns_at(user, now).await.unwrap());
    assert!(!outcome.is_preliminary());

    let skip = outcome
        .patterns()
        .iter()
        .find(|p| p.kind == PatternKind::Skip)
        .expect("skip pattern detected");
    assert!(skip.confidence >= 0.5);
    assert_eq!(skip.source, PatternSource::Detected);

    let risk = pipeline.get_risk_today_at(user, now).await.unwrap();
    assert_eq!(risk.level, RiskLevel::High);
    assert!(risk.contributing_patterns.contains(&skip.id));
    assert_eq!(risk.time_window.as_deref(), Some("18:00–22:00"));
    assert!(risk.recommendation.is_some());

    // Morning of the same day: the cached score is served
    let cached = pipeline.get_risk_today_at(user, now + Duration::hours(1)).await.unwrap();
    assert_eq!(cached, risk);
}

#[tokio::test]
async fn test_two_events_get_preliminary_cluster_patterns() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    seed(
        store.as_ref(),
        &[
            meal(user, at(0, 12), 500, Some(Mood::Ok), None),
            meal(user, at(0, 19), 900, Some(Mood::Bad), None),
        ],
    )
    .await;

    let outcome = completed(pipeline.detect_patterns_at(user, at(1, 9)).await.unwrap());
    assert!(outcome.is_preliminary());
    assert!(!outcome.patterns().is_empty());
    for pattern in outcome.patterns() {
        assert!(pattern.confidence <= 0.4);
        assert!(pattern.preliminary);
        assert!(pattern.active);
    }
    match &outcome {
        DetectionOutcome::ColdStart { cluster_id, .. } => assert_eq!(cluster_id, "general"),
        other => panic!("expected cold start, got {:?}", other),
    }
}

#[tokio::test]
async fn test_onboarding_cluster_drives_cold_start() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    pipeline
        .assign_cluster(
            user,
            &[InterviewAnswer {
                question_id: "biggest_challenge".to_string(),
                answer_id: "emotional_eating".to_string(),
            }],
        )
        .await
        .unwrap();
    seed(store.as_ref(), &[meal(user, at(0, 20), 800, Some(Mood::Awful), None)]).await;

    let outcome = completed(pipeline.detect_patterns_at(user, at(1, 9)).await.unwrap());
    match outcome {
        DetectionOutcome::ColdStart {
            cluster_id,
            patterns,
        } => {
            assert_eq!(cluster_id, "emotional_eater");
            assert_eq!(patterns[0].kind, PatternKind::Mood);
        }
        other => panic!("expected cold start, got {:?}", other),
    }
}

#[tokio::test]
async fn test_redetection_supersedes_previous_patterns() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    seed(store.as_ref(), &evening_bad_mood_week(user)).await;

    let first = completed(pipeline.detect_patterns_at(user, at(5, 9)).await.unwrap());
    let second = completed(pipeline.detect_patterns_at(user, at(6, 9)).await.unwrap());

    let active = pipeline.list_patterns(user, false).await.unwrap();
    assert_eq!(active.len(), second.patterns().len());
    assert!(active.iter().all(|p| second.patterns().iter().any(|s| s.id == p.id)));

    let all = pipeline.list_patterns(user, true).await.unwrap();
    assert_eq!(all.len(), first.patterns().len() + second.patterns().len());
    for old in first.patterns() {
        let stored = all.iter().find(|p| p.id == old.id).unwrap();
        assert!(!stored.active);
        assert_eq!(stored.deactivation, Some(DeactivationReason::Superseded));
    }
}

#[tokio::test]
async fn test_dispute_walks_confidence_down_and_deactivates() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    seed(store.as_ref(), &evening_bad_mood_week(user)).await;
    let outcome = completed(pipeline.detect_patterns_at(user, at(5, 9)).await.unwrap());

    let mut pattern = outcome.patterns()[0].clone();
    pattern.confidence = 0.5;
    store.update_pattern(&pattern).await.unwrap();

    let first = pipeline.submit_pattern_feedback(pattern.id, true).await.unwrap();
    assert_eq!(first.confidence, 0.3);
    assert!(first.active);

    let second = pipeline.submit_pattern_feedback(pattern.id, true).await.unwrap();
    assert!((second.confidence - 0.1).abs() < 1e-9);
    assert!(!second.active);

    let active = pipeline.list_patterns(user, false).await.unwrap();
    assert!(active.iter().all(|p| p.id != pattern.id));

    // Confirmation is a no-op
    let confirmed = pipeline.submit_pattern_feedback(pattern.id, false).await.unwrap();
    assert_eq!(confirmed, second);
}

#[tokio::test]
async fn test_risk_recomputed_after_patterns_change() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    seed(store.as_ref(), &evening_bad_mood_week(user)).await;
    pipeline.detect_patterns_at(user, at(5, 8)).await.unwrap();

    let before = pipeline.get_risk_today_at(user, at(5, 19)).await.unwrap();
    assert_eq!(before.level, RiskLevel::High);
    assert!(!before.contributing_patterns.is_empty());

    // Dispute everything until no pattern is left active
    let disputed_at = at(5, 19) + Duration::minutes(2);
    for pattern in pipeline.list_patterns(user, false).await.unwrap() {
        let mut active = true;
        while active {
            active = pipeline
                .submit_pattern_feedback_at(pattern.id, true, disputed_at)
                .await
                .unwrap()
                .active;
        }
    }
    assert!(pipeline.list_patterns(user, false).await.unwrap().is_empty());

    let after = pipeline
        .get_risk_today_at(user, at(5, 19) + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(after.level, RiskLevel::Low);
    assert!(after.contributing_patterns.is_empty());

    // Re-detection replaces the set, and the next read scores the new one
    pipeline.detect_patterns_at(user, at(5, 19) + Duration::minutes(10)).await.unwrap();
    let redetected: Vec<_> = pipeline
        .list_patterns(user, false)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    let rescored = pipeline
        .get_risk_today_at(user, at(5, 19) + Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(rescored.level, RiskLevel::High);
    assert!(rescored
        .contributing_patterns
        .iter()
        .all(|id| redetected.contains(id)));
}

#[tokio::test]
async fn test_fourth_insight_locked_for_free_user() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    seed(store.as_ref(), &evening_bad_mood_week(user)).await;
    pipeline.detect_patterns_at(user, at(5, 8)).await.unwrap();

    let mut insights = Vec::new();
    for day in 5..9 {
        let today = pipeline.get_today_insight_at(user, at(day, 9)).await.unwrap();
        assert_eq!(today.freshness, Freshness::Fresh);
        insights.push(today.insight);
    }

    for insight in &insights[..3] {
        assert!(!insight.locked);
        assert!(!insight.body.contains(UPGRADE_HINT));
    }

    let fourth = &insights[3];
    assert!(fourth.locked);
    assert!(fourth.body.ends_with(UPGRADE_HINT));
    assert!(fourth.action.is_none());
    assert_eq!(fourth.rotation_day, 4);
    assert_eq!(fourth.kind, InsightKind::Progress);
    assert_eq!(store.insights_received_count(user).await.unwrap(), 4);
}

#[tokio::test]
async fn test_upgrade_leaves_generated_insights_locked() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();

    for day in 0..3 {
        pipeline.get_today_insight_at(user, at(day, 9)).await.unwrap();
    }
    let locked = pipeline.get_today_insight_at(user, at(3, 9)).await.unwrap().insight;
    assert!(locked.locked);

    store.set_premium(user, true).await.unwrap();

    // Same day: the stored record is served as it was created
    let reread = pipeline.get_today_insight_at(user, at(3, 18)).await.unwrap();
    assert_eq!(reread.freshness, Freshness::Fresh);
    assert_eq!(reread.insight.id, locked.id);
    assert!(reread.insight.locked);
    assert_eq!(reread.insight.body, locked.body);
    assert_eq!(reread.insight.title, locked.title);

    // Next day uses the new status
    let next = pipeline.get_today_insight_at(user, at(4, 9)).await.unwrap().insight;
    assert_ne!(next.id, locked.id);
    assert!(!next.locked);
    assert!(!next.body.contains(UPGRADE_HINT));
    assert_eq!(store.insights_received_count(user).await.unwrap(), 5);
}

#[tokio::test]
async fn test_premium_user_never_locked() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();
    store.set_premium(user, true).await.unwrap();

    for day in 0..5 {
        let today = pipeline.get_today_insight_at(user, at(day, 9)).await.unwrap();
        assert!(!today.insight.locked);
    }
}

#[tokio::test]
async fn test_one_insight_per_day() {
    let (pipeline, store) = memory_pipeline();
    let user = UserId::new();

    let (first, created) = pipeline.generate_today_insight(user, at(0, 8)).await.unwrap();
    assert!(created);
    let (again, created) = pipeline.generate_today_insight(user, at(0, 21)).await.unwrap();
    assert!(!created);
    assert_eq!(first.id, again.id);
    assert_eq!(store.insights_received_count(user).await.unwrap(), 1);

    let seen = pipeline.mark_insight_seen(first.id).await.unwrap();
    assert!(seen.seen);
    let seen_again = pipeline.mark_insight_seen(first.id).await.unwrap();
    assert_eq!(seen, seen_again);
}

#[tokio::test]
async fn test_concurrent_reads_share_one_insight() {
    let store = Arc::new(MemoryStorage::new());
    let pipeline =
        Pipeline::new(test_config(), store.clone()).with_renderer(Arc::new(SlowRenderer));
    let user = UserId::new();

    let (a, b) = tokio::join!(
        pipeline.get_today_insight_at(user, at(0, 9)),
        pipeline.get_today_insight_at(user, at(0, 9)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.insight.id, b.insight.id);
    assert_eq!(store.insights_received_count(user).await.unwrap(), 1);
    let profile = store.get_profile(user).await.unwrap().unwrap();
    assert_eq!(profile.rotation_day, 1);

    let (next, created) = pipeline.generate_today_insight(user, at(1, 9)).await.unwrap();
    assert!(created);
    assert_eq!(next.rotation_day, 2);
    assert_eq!(store.insights_received_count(user).await.unwrap(), 2);
}

#[tokio::test]
async fn test_retry_finishes_interrupted_delivery() {
    let store = Arc::new(MemoryStorage::new());
    let subscriptions = Arc::new(FlakySubscriptions {
        inner: store.clone(),
        fail_next_delivery: AtomicBool::new(true),
    });
    let pipeline = Pipeline::new(test_config(), store.clone()).with_subscriptions(subscriptions);
    let user = UserId::new();

    // The insight is stored but the counter write fails
    let err = pipeline.generate_today_insight(user, at(0, 9)).await.unwrap_err();
    assert!(err.is_retryable());
    let stored = store.insight_for_day(user, at(0, 0).date_naive()).await.unwrap().unwrap();
    assert_eq!(store.insights_received_count(user).await.unwrap(), 0);

    let (retried, created) = pipeline.generate_today_insight(user, at(0, 9)).await.unwrap();
    assert!(!created);
    assert_eq!(retried.id, stored.id);
    assert_eq!(store.insights_received_count(user).await.unwrap(), 1);

    // Later reads the same day count nothing more
    pipeline.generate_today_insight(user, at(0, 20)).await.unwrap();
    assert_eq!(store.insights_received_count(user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_rotation_advances_once_per_generation_day() {
    let (pipeline, _) = memory_pipeline();
    let user = UserId::new();

    let (day_one, _) = pipeline.generate_today_insight(user, at(0, 9)).await.unwrap();
    assert_eq!(day_one.rotation_day, 1);
    assert_eq!(day_one.kind, InsightKind::General);

    // Three quiet days do not move the cursor three steps
    let (next, _) = pipeline.generate_today_insight(user, at(4, 9)).await.unwrap();
    assert_eq!(next.rotation_day, 2);
}

#[tokio::test]
async fn test_upstream_outage_surfaces_as_unavailable() {
    let store = Arc::new(MemoryStorage::new());
    let pipeline =
        Pipeline::new(test_config(), store.clone()).with_event_store(Arc::new(DownEventStore));

    let err = pipeline.detect_patterns(UserId::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_risk_falls_back_to_last_cached_score() {
    let (healthy, store) = memory_pipeline();
    let user = UserId::new();
    seed(store.as_ref(), &evening_bad_mood_week(user)).await;
    healthy.detect_patterns_at(user, at(5, 8)).await.unwrap();
    let saturday = healthy.get_risk_today_at(user, at(5, 19)).await.unwrap();

    let degraded =
        Pipeline::new(test_config(), store.clone()).with_event_store(Arc::new(DownEventStore));
    let sunday = degraded.get_risk_today_at(user, at(6, 19)).await.unwrap();
    assert_eq!(sunday, saturday);

    // No score at all to fall back on
    let err = degraded
        .get_risk_today_at(UserId::new(), at(6, 19))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_insight_falls_back_to_most_recent() {
    let (healthy, store) = memory_pipeline();
    let user = UserId::new();
    let (yesterday, _) = healthy.generate_today_insight(user, at(0, 9)).await.unwrap();

    let degraded =
        Pipeline::new(test_config(), store.clone()).with_subscriptions(Arc::new(DownSubscriptions));
    let today = degraded.get_today_insight_at(user, at(1, 9)).await.unwrap();
    assert_eq!(today.freshness, Freshness::MostRecent);
    assert_eq!(today.insight.id, yesterday.id);

    let err = degraded
        .get_today_insight_at(UserId::new(), at(1, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_batch_retries_transient_failures() {
    let store = Arc::new(MemoryStorage::new());
    let user = UserId::new();
    seed(store.as_ref(), &evening_bad_mood_week(user)).await;

    let flaky = Arc::new(FlakyEventStore {
        inner: store.clone(),
        failures: AtomicUsize::new(1),
    });
    let pipeline = Pipeline::new(test_config(), store.clone()).with_event_store(flaky);

    let report = pipeline
        .run_daily_detection_for_all_users_at(at(5, 3), 100)
        .await
        .unwrap();
    assert_eq!(report.users_processed, 1);
    assert_eq!(report.changes_made, 1);
    assert!(report.errors.is_empty());
    assert!(!pipeline.list_patterns(user, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_logging_tenth_event_triggers_detection() {
    let (pipeline, _) = memory_pipeline();
    let user = UserId::new();
    let start = Utc::now() - Duration::days(5);

    let mut runs = Vec::new();
    for i in 0..10 {
        let event = meal(user, start + Duration::hours(i * 11), 600, None, None);
        runs.push(pipeline.log_event(event).await.unwrap());
    }

    assert!(runs[..9].iter().all(Option::is_none));
    assert!(matches!(runs[9], Some(DetectionRun::Completed(_))));
}
