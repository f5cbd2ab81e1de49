//! Performance benchmarks for detection and risk scoring
//!
//! Targets:
//! - Detection over a 30-day window: <5ms per user
//! - Risk prediction: <50µs per call

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nutrimind_core::risk::RiskInputs;
use nutrimind_core::{
    EatingContext, FoodEvent, Mood, PatternDetector, RiskPredictor, UserId,
};

/// `days` days of four meals with a heavy, low-mood dinner every third day
fn month_of_events(user: UserId, days: i64) -> Vec<FoodEvent> {
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let mut events = Vec::new();
    for day in 0..days {
        let base = start + Duration::days(day);
        let heavy = day % 3 == 0;
        events.push(FoodEvent::new(
            user,
            "oatmeal",
            350,
            Some(Mood::Ok),
            Some(EatingContext::Home),
            base + Duration::hours(8),
        ));
        if !heavy {
            events.push(FoodEvent::new(
                user,
                "sandwich",
                550,
                Some(Mood::Meh),
                Some(EatingContext::Work),
                base + Duration::hours(13),
            ));
        }
        events.push(FoodEvent::new(
            user,
            "dinner",
            if heavy { 1400 } else { 700 },
            Some(if heavy { Mood::Bad } else { Mood::Ok }),
            Some(if heavy { EatingContext::Street } else { EatingContext::Home }),
            base + Duration::hours(20),
        ));
        events.push(FoodEvent::new(
            user,
            "snack",
            200,
            None,
            None,
            base + Duration::hours(23),
        ));
    }
    events
}

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection");
    let detector = PatternDetector::default();
    let user = UserId::new();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    for days in [7i64, 30, 90] {
        let events = month_of_events(user, days);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(days), &events, |b, events| {
            b.iter(|| detector.detect(black_box(user), black_box(events), now));
        });
    }

    group.finish();
}

fn bench_risk(c: &mut Criterion) {
    let user = UserId::new();
    let events = month_of_events(user, 30);
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap();
    let patterns = PatternDetector::default().detect(user, &events, now);
    let predictor = RiskPredictor::default();

    c.bench_function("risk_predict", |b| {
        b.iter(|| {
            predictor.predict(black_box(&RiskInputs {
                user_id: user,
                now,
                patterns: &patterns,
                today_events: &[],
                lesson_completed_today: false,
                is_weekend: false,
            }))
        });
    });
}

criterion_group!(benches, bench_detection, bench_risk);
criterion_main!(benches);
