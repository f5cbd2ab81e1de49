//! Time-of-day buckets and per-day aggregates
//!
//! Every detector works off the same [`EventAggregates`], built in a single
//! pass over the (sorted) event window.

use crate::types::{EventId, FoodEvent, HourWindow};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// 11:00 to 14:00, the window a skipped lunch is judged against
pub const MIDDAY_WINDOW: HourWindow = HourWindow::new(11, 14);

/// 18:00 to 22:00
pub const EVENING_WINDOW: HourWindow = HourWindow::new(18, 22);

/// 22:00 to 06:00
pub const NIGHT_WINDOW: HourWindow = HourWindow::new(22, 6);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeBucket {
    Morning,
    Lunch,
    Afternoon,
    Evening,
    Night,
}

impl TimeBucket {
    pub const ALL: [TimeBucket; 5] = [
        TimeBucket::Morning,
        TimeBucket::Lunch,
        TimeBucket::Afternoon,
        TimeBucket::Evening,
        TimeBucket::Night,
    ];

    pub fn window(self) -> HourWindow {
        match self {
            TimeBucket::Morning => HourWindow::new(6, 11),
            TimeBucket::Lunch => HourWindow::new(11, 15),
            TimeBucket::Afternoon => HourWindow::new(15, 18),
            TimeBucket::Evening => EVENING_WINDOW,
            TimeBucket::Night => NIGHT_WINDOW,
        }
    }

    pub fn of_hour(hour: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|b| b.window().contains(hour))
            .unwrap_or(TimeBucket::Night)
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeBucket::Morning => "morning",
            TimeBucket::Lunch => "lunch",
            TimeBucket::Afternoon => "afternoon",
            TimeBucket::Evening => "evening",
            TimeBucket::Night => "night",
        }
    }
}

/// Running sum and count
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tally {
    pub sum: f64,
    pub count: usize,
}

impl Tally {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Everything that happened on one calendar day
#[derive(Debug, Clone, Default)]
pub struct DayAggregate {
    pub total_calories: f64,
    pub bucket_calories: [f64; 5],
    pub midday_entries: usize,
    pub evening_window_calories: f64,
    pub has_negative_mood: bool,
    pub event_ids: Vec<EventId>,
    pub evening_event_ids: Vec<EventId>,
}

impl DayAggregate {
    pub fn bucket(&self, bucket: TimeBucket) -> f64 {
        self.bucket_calories[bucket.index()]
    }
}

/// Window-wide aggregates shared by all detectors
#[derive(Debug, Clone, Default)]
pub struct EventAggregates {
    pub days: BTreeMap<NaiveDate, DayAggregate>,
    pub buckets: [Tally; 5],
    pub per_event: Tally,
}

impl EventAggregates {
    /// Build aggregates from events already sorted by (timestamp, id)
    pub fn build(events: &[FoodEvent]) -> Self {
        let mut agg = EventAggregates::default();

        for event in events {
            let calories = f64::from(event.calories);
            let bucket = TimeBucket::of_hour(event.hour);

            agg.per_event.add(calories);
            agg.buckets[bucket.index()].add(calories);

            let day = agg.days.entry(event.date()).or_default();
            day.total_calories += calories;
            day.bucket_calories[bucket.index()] += calories;
            day.event_ids.push(event.id);

            if MIDDAY_WINDOW.contains(event.hour) {
                day.midday_entries += 1;
            }
            if EVENING_WINDOW.contains(event.hour) {
                day.evening_window_calories += calories;
                day.evening_event_ids.push(event.id);
            }
            if event.mood.is_some_and(|m| m.is_negative()) {
                day.has_negative_mood = true;
            }
        }

        agg
    }

    pub fn observed_days(&self) -> usize {
        self.days.len()
    }

    pub fn bucket_mean(&self, bucket: TimeBucket) -> Option<f64> {
        self.buckets[bucket.index()].mean()
    }

    pub fn bucket_total(&self, bucket: TimeBucket) -> f64 {
        self.buckets[bucket.index()].sum
    }

    /// Mean calories per logged entry
    pub fn mean_per_event(&self) -> Option<f64> {
        self.per_event.mean()
    }

    /// Mean calories per observed day
    pub fn mean_daily(&self) -> Option<f64> {
        if self.days.is_empty() {
            None
        } else {
            Some(self.per_event.sum / self.days.len() as f64)
        }
    }
}
