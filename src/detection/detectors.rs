//! The individual pattern detectors
//!
//! Each detector reads the shared aggregates (and the raw events where it
//! needs per-event data) and returns candidates with their raw confidence.
//! Filtering and ranking happen in [`super::PatternDetector`].

use super::buckets::{EventAggregates, TimeBucket, EVENING_WINDOW, NIGHT_WINDOW};
use crate::types::{
    EatingContext, EventId, Evidence, FoodEvent, Mood, PatternKind, PatternTrigger,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Evening mean must exceed the lunch mean by this factor
pub const SEQUENCE_RATIO: f64 = 2.0;

/// Negative-mood mean must exceed the positive-mood mean by this factor
pub const MOOD_RATIO: f64 = 1.5;

/// An entry above this multiple of the mean entry is a calorie spike
pub const SPIKE_FACTOR: f64 = 1.5;

/// Minimum phi coefficient between a context and spikes
pub const CONTEXT_CORRELATION_THRESHOLD: f64 = 0.3;

/// Evening share of the mean daily total that makes a skipped lunch count
pub const SKIP_EVENING_SHARE: f64 = 0.6;

/// Share of calories eaten late (evening and night) for a time pattern
pub const LATE_SHARE: f64 = 0.6;

/// A pattern candidate before filtering and identity assignment
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: PatternKind,
    pub description: String,
    pub confidence: f64,
    pub trigger: PatternTrigger,
    pub evidence: Evidence,
}

fn weekend_share(ids: &[EventId], weekend: &HashSet<EventId>) -> f64 {
    if ids.is_empty() {
        return 0.0;
    }
    let hits = ids.iter().filter(|id| weekend.contains(id)).count();
    hits as f64 / ids.len() as f64
}

fn evidence(
    event_ids: Vec<EventId>,
    metrics: impl IntoIterator<Item = (&'static str, f64)>,
    weekend: &HashSet<EventId>,
) -> Evidence {
    Evidence {
        weekend_share: weekend_share(&event_ids, weekend),
        event_ids,
        metrics: metrics
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn weekend_ids(events: &[FoodEvent]) -> HashSet<EventId> {
    events
        .iter()
        .filter(|e| e.is_weekend())
        .map(|e| e.id)
        .collect()
}

fn day_fraction(hits: usize, observed: usize) -> f64 {
    if observed == 0 {
        0.0
    } else {
        (hits as f64 / observed as f64).clamp(0.0, 1.0)
    }
}

/// Evening meals much larger than lunch
pub fn detect_sequence(agg: &EventAggregates, events: &[FoodEvent]) -> Option<Candidate> {
    let lunch = agg.bucket_mean(TimeBucket::Lunch)?;
    let evening = agg.bucket_mean(TimeBucket::Evening)?;
    if lunch <= 0.0 || evening <= SEQUENCE_RATIO * lunch {
        return None;
    }

    let mut supporting = Vec::new();
    let mut excess_days = 0;
    for day in agg.days.values() {
        let day_evening = day.bucket(TimeBucket::Evening);
        if day_evening > SEQUENCE_RATIO * day.bucket(TimeBucket::Lunch) {
            excess_days += 1;
            supporting.extend(day.evening_event_ids.iter().copied());
        }
    }

    let ratio = evening / lunch;
    Some(Candidate {
        kind: PatternKind::Sequence,
        description: format!(
            "Your evening meals average {:.1}x the calories of your lunches",
            ratio
        ),
        confidence: day_fraction(excess_days, agg.observed_days()),
        trigger: PatternTrigger::Window(EVENING_WINDOW),
        evidence: evidence(
            supporting,
            [
                ("avg_lunch_calories", lunch),
                ("avg_evening_calories", evening),
                ("ratio", ratio),
                ("excess_days", excess_days as f64),
                ("observed_days", agg.observed_days() as f64),
            ],
            &weekend_ids(events),
        ),
    })
}

/// Larger meals under negative moods
pub fn detect_mood(agg: &EventAggregates, events: &[FoodEvent]) -> Option<Candidate> {
    let mut negative = super::buckets::Tally::default();
    let mut positive = super::buckets::Tally::default();
    let mut negative_ids = Vec::new();
    let mut moods = BTreeSet::new();

    for event in events {
        match event.mood {
            Some(m) if m.is_negative() => {
                negative.add(f64::from(event.calories));
                negative_ids.push(event.id);
                moods.insert(m);
            }
            Some(m) if m.is_positive() => positive.add(f64::from(event.calories)),
            _ => {}
        }
    }

    let negative_mean = negative.mean()?;
    let positive_mean = positive.mean()?;
    if positive_mean <= 0.0 || negative_mean <= MOOD_RATIO * positive_mean {
        return None;
    }

    let negative_days = agg.days.values().filter(|d| d.has_negative_mood).count();
    let ratio = negative_mean / positive_mean;
    Some(Candidate {
        kind: PatternKind::Mood,
        description: format!(
            "On bad-mood days you eat {:.1}x more per meal than on good days",
            ratio
        ),
        confidence: day_fraction(negative_days, agg.observed_days()),
        trigger: PatternTrigger::Moods(moods.into_iter().collect::<Vec<Mood>>()),
        evidence: evidence(
            negative_ids,
            [
                ("avg_negative_calories", negative_mean),
                ("avg_positive_calories", positive_mean),
                ("ratio", ratio),
                ("negative_days", negative_days as f64),
                ("observed_days", agg.observed_days() as f64),
            ],
            &weekend_ids(events),
        ),
    })
}

/// Phi coefficient of two binary variables from their 2x2 table
fn phi(n11: f64, n10: f64, n01: f64, n00: f64) -> Option<f64> {
    let denominator = ((n11 + n10) * (n01 + n00) * (n11 + n01) * (n10 + n00)).sqrt();
    if denominator == 0.0 {
        None
    } else {
        Some((n11 * n00 - n10 * n01) / denominator)
    }
}

/// Contexts that co-occur with calorie spikes
pub fn detect_context(agg: &EventAggregates, events: &[FoodEvent]) -> Vec<Candidate> {
    let Some(mean) = agg.mean_per_event() else {
        return Vec::new();
    };
    let threshold = SPIKE_FACTOR * mean;
    let weekend = weekend_ids(events);

    let mut candidates = Vec::new();
    for context in EatingContext::ALL {
        let (mut n11, mut n10, mut n01, mut n00) = (0.0, 0.0, 0.0, 0.0);
        let mut spike_ids = Vec::new();

        for event in events {
            let in_context = event.context == Some(context);
            let spike = f64::from(event.calories) > threshold;
            match (in_context, spike) {
                (true, true) => {
                    n11 += 1.0;
                    spike_ids.push(event.id);
                }
                (true, false) => n10 += 1.0,
                (false, true) => n01 += 1.0,
                (false, false) => n00 += 1.0,
            }
        }

        let context_events = n11 + n10;
        if context_events < 2.0 {
            continue;
        }
        let Some(correlation) = phi(n11, n10, n01, n00) else {
            continue;
        };
        if correlation < CONTEXT_CORRELATION_THRESHOLD {
            continue;
        }

        candidates.push(Candidate {
            kind: PatternKind::Context,
            description: format!(
                "Your biggest meals tend to happen at {}",
                match context {
                    EatingContext::Home => "home",
                    EatingContext::Work => "work",
                    EatingContext::Street => "on the go",
                    EatingContext::Restaurant => "restaurants",
                }
            ),
            confidence: (n11 / context_events).clamp(0.0, 1.0),
            trigger: PatternTrigger::Context(context),
            evidence: evidence(
                spike_ids,
                [
                    ("correlation", correlation),
                    ("spike_threshold", threshold),
                    ("context_events", context_events),
                    ("context_spikes", n11),
                ],
                &weekend,
            ),
        });
    }

    candidates
}

/// Skipped lunch followed by a heavy evening
pub fn detect_skip(agg: &EventAggregates, events: &[FoodEvent]) -> Option<Candidate> {
    let mean_daily = agg.mean_daily()?;

    let mut supporting = Vec::new();
    let mut skip_days = 0;
    for day in agg.days.values() {
        if day.midday_entries == 0
            && day.evening_window_calories > SKIP_EVENING_SHARE * mean_daily
        {
            skip_days += 1;
            supporting.extend(day.evening_event_ids.iter().copied());
        }
    }

    if skip_days == 0 {
        return None;
    }

    Some(Candidate {
        kind: PatternKind::Skip,
        description: format!(
            "On {} of {} days you skipped lunch and made up for it in the evening",
            skip_days,
            agg.observed_days()
        ),
        confidence: day_fraction(skip_days, agg.observed_days()),
        trigger: PatternTrigger::Window(EVENING_WINDOW),
        evidence: evidence(
            supporting,
            [
                ("skip_days", skip_days as f64),
                ("observed_days", agg.observed_days() as f64),
                ("avg_daily_calories", mean_daily),
            ],
            &weekend_ids(events),
        ),
    })
}

/// Most of the day's calories eaten late
pub fn detect_time(agg: &EventAggregates, events: &[FoodEvent]) -> Option<Candidate> {
    let total = agg.per_event.sum;
    if total <= 0.0 {
        return None;
    }

    let evening = agg.bucket_total(TimeBucket::Evening);
    let night = agg.bucket_total(TimeBucket::Night);
    let late_share = (evening + night) / total;
    if late_share <= LATE_SHARE {
        return None;
    }

    let late_days = agg
        .days
        .values()
        .filter(|d| {
            d.total_calories > 0.0
                && d.bucket(TimeBucket::Evening) + d.bucket(TimeBucket::Night)
                    > LATE_SHARE * d.total_calories
        })
        .count();

    let (window, label) = if evening >= night {
        (EVENING_WINDOW, "evening")
    } else {
        (NIGHT_WINDOW, "late night")
    };

    let supporting = events
        .iter()
        .filter(|e| window.contains(e.hour))
        .map(|e| e.id)
        .collect();

    Some(Candidate {
        kind: PatternKind::Time,
        description: format!(
            "{:.0}% of your calories come in the {}",
            late_share * 100.0,
            label
        ),
        confidence: day_fraction(late_days, agg.observed_days()),
        trigger: PatternTrigger::Window(window),
        evidence: evidence(
            supporting,
            [
                ("late_share", late_share),
                ("late_days", late_days as f64),
                ("observed_days", agg.observed_days() as f64),
            ],
            &weekend_ids(events),
        ),
    })
}
