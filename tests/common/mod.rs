//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use nutrimind_core::jobs::retry::RetryConfig;
use nutrimind_core::{
    ConnectionMode, EatingContext, FoodEvent, LibsqlStorage, MemoryStorage, Mood, Pipeline,
    PipelineConfig, UserId,
};
use std::sync::Arc;

/// Create a file-backed LibSQL storage for testing
pub async fn create_test_storage() -> LibsqlStorage {
    // A temporary file rather than :memory: so every connection sees the
    // migrated schema
    let temp_file = format!("/tmp/nutrimind_test_{}.db", uuid::Uuid::new_v4());
    LibsqlStorage::new_with_validation(
        ConnectionMode::Local(temp_file),
        true, // create_if_missing - required for test databases
    )
    .await
    .expect("Failed to create test storage")
}

/// Config with fast retries so failure tests stay quick
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry = RetryConfig {
        max_retries: 2,
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

pub fn memory_pipeline() -> (Arc<Pipeline>, Arc<MemoryStorage>) {
    let store = Arc::new(MemoryStorage::new());
    (Arc::new(Pipeline::new(test_config(), store.clone())), store)
}

/// Monday 2024-05-06, 00:00 UTC
pub fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap()
}

pub fn at(day_offset: i64, hour: i64) -> DateTime<Utc> {
    monday() + Duration::days(day_offset) + Duration::hours(hour)
}

pub fn meal(
    user: UserId,
    when: DateTime<Utc>,
    calories: u32,
    mood: Option<Mood>,
    context: Option<EatingContext>,
) -> FoodEvent {
    FoodEvent::new(user, "meal", calories, mood, context, when)
}

/// Ten bad-mood dinners at 20:00, two per day Monday to Friday, no lunches
pub fn evening_bad_mood_week(user: UserId) -> Vec<FoodEvent> {
    (0..5)
        .flat_map(|day| {
            [
                meal(user, at(day, 20), 700, Some(Mood::Bad), Some(EatingContext::Home)),
                meal(user, at(day, 20) + Duration::minutes(30), 600, Some(Mood::Bad), None),
            ]
        })
        .collect()
}

/// Append events directly to the log without triggering detection
pub async fn seed(store: &impl nutrimind_core::EventStore, events: &[FoodEvent]) {
    for event in events {
        store.append_event(event).await.expect("Failed to append event");
    }
}
