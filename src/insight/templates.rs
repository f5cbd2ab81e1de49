//! Template drafts for each insight kind
//!
//! A draft carries the structured facts a renderer may rephrase plus a
//! finished template body that is used whenever rendering is skipped.

use crate::risk::{RiskTrend, WeeklyRiskSummary};
use crate::services::lessons::Lesson;
use crate::types::{FoodEvent, InsightKind, Pattern, PatternKind, PatternTrigger};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Structured input for the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightPayload {
    pub kind: InsightKind,
    pub pattern_kind: Option<PatternKind>,
    pub title: String,
    /// Template body, used verbatim when rendering falls back
    pub body: String,
    pub action: Option<String>,
    /// Evidence summary or deltas the text is based on
    pub facts: BTreeMap<String, f64>,
}

/// Aggregate numbers for one seven-day window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekStats {
    pub events: usize,
    pub mean_daily_calories: f64,
    pub mean_mood: Option<f64>,
}

impl WeekStats {
    /// Stats over `events`, averaging calories across the days that have
    /// at least one entry
    pub fn from_events(events: &[FoodEvent]) -> Self {
        if events.is_empty() {
            return Self::default();
        }

        let days: BTreeSet<_> = events.iter().map(FoodEvent::date).collect();
        let total: f64 = events.iter().map(|e| f64::from(e.calories)).sum();

        let moods: Vec<f64> = events.iter().filter_map(|e| e.mood.map(|m| m.score())).collect();
        let mean_mood = if moods.is_empty() {
            None
        } else {
            Some(moods.iter().sum::<f64>() / moods.len() as f64)
        };

        Self {
            events: events.len(),
            mean_daily_calories: total / days.len() as f64,
            mean_mood,
        }
    }
}

fn facts(entries: impl IntoIterator<Item = (&'static str, f64)>) -> BTreeMap<String, f64> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn trigger_phrase(trigger: &PatternTrigger) -> String {
    match trigger {
        PatternTrigger::Window(w) => format!("between {}", w.label()),
        PatternTrigger::Moods(moods) => {
            let names: Vec<&str> = moods.iter().map(|m| m.as_str()).collect();
            format!("when you feel {}", names.join(" or "))
        }
        PatternTrigger::Context(c) => format!("when eating at {}", c),
    }
}

pub fn pattern_draft(pattern: &Pattern) -> InsightPayload {
    let (title, action) = match pattern.kind {
        PatternKind::Time => (
            "When you eat matters",
            "Plan a light, satisfying snack for the hour before your usual late meal",
        ),
        PatternKind::Mood => (
            "Your mood and your plate",
            "Before the next meal on a tough day, pause for three slow breaths",
        ),
        PatternKind::Context => (
            "Where you eat shapes how much",
            "Next time, sit down at a table for that meal",
        ),
        PatternKind::Sequence => (
            "A light lunch, a heavy evening",
            "Add protein to lunch tomorrow and notice how the evening feels",
        ),
        PatternKind::Skip => (
            "Skipped meals catch up with you",
            "Put a lunch reminder in your calendar for tomorrow",
        ),
    };

    let mut body = format!(
        "{}. We noticed it {} ({:.0}% confidence).",
        pattern.description,
        trigger_phrase(&pattern.trigger),
        pattern.confidence * 100.0
    );
    if pattern.preliminary {
        body.push_str(" This is based on people with a similar profile and will sharpen as you log more meals.");
    }

    let mut summary = pattern.evidence.metrics.clone();
    summary.insert("confidence".to_string(), pattern.confidence);
    summary.insert("supporting_events".to_string(), pattern.evidence.event_ids.len() as f64);

    InsightPayload {
        kind: InsightKind::Pattern,
        pattern_kind: Some(pattern.kind),
        title: title.to_string(),
        body,
        action: Some(action.to_string()),
        facts: summary,
    }
}

pub fn general_draft() -> InsightPayload {
    InsightPayload {
        kind: InsightKind::General,
        pattern_kind: None,
        title: "Every entry tells a story".to_string(),
        body: "Keep logging your meals together with how you feel and where you are. \
               After a few more days we can start pointing out your personal patterns."
            .to_string(),
        action: Some("Log your next meal with a mood".to_string()),
        facts: BTreeMap::new(),
    }
}

pub fn progress_draft(current: &WeekStats, previous: &WeekStats) -> InsightPayload {
    let calorie_delta = current.mean_daily_calories - previous.mean_daily_calories;
    let events_delta = current.events as f64 - previous.events as f64;
    let mood_delta = match (current.mean_mood, previous.mean_mood) {
        (Some(now), Some(before)) => Some(now - before),
        _ => None,
    };

    let mut body = format!(
        "This week you logged {} meals ({:+.0} compared with last week).",
        current.events, events_delta
    );
    if previous.events > 0 {
        body.push_str(&format!(
            " Average daily intake moved by {:+.0} kcal.",
            calorie_delta
        ));
    }
    match mood_delta {
        Some(d) if d > 0.0 => body.push_str(" Your mood after meals improved."),
        Some(d) if d < 0.0 => body.push_str(" Your mood after meals dipped a little."),
        _ => {}
    }

    let mut summary = facts([
        ("events", current.events as f64),
        ("events_delta", events_delta),
        ("mean_daily_calories", current.mean_daily_calories),
        ("calorie_delta", calorie_delta),
    ]);
    if let Some(d) = mood_delta {
        summary.insert("mood_delta".to_string(), d);
    }

    InsightPayload {
        kind: InsightKind::Progress,
        pattern_kind: None,
        title: "Your week in numbers".to_string(),
        body,
        action: Some("Pick one thing that went well and repeat it tomorrow".to_string()),
        facts: summary,
    }
}

pub fn cbt_draft(lesson: &Lesson) -> InsightPayload {
    InsightPayload {
        kind: InsightKind::Cbt,
        pattern_kind: lesson.pattern_tags.first().copied(),
        title: lesson.title.clone(),
        body: format!(
            "{}. A short lesson that fits what we have seen in your log.",
            lesson.summary
        ),
        action: Some(format!("Open the lesson \"{}\"", lesson.title)),
        facts: facts([("lesson_order", f64::from(lesson.order))]),
    }
}

pub fn risk_draft(summary: Option<&WeeklyRiskSummary>, active_patterns: usize) -> InsightPayload {
    let body = match summary {
        Some(week) => {
            let trend = match week.trend {
                RiskTrend::Rising => "has been rising",
                RiskTrend::Falling => "has been falling",
                RiskTrend::Steady => "stayed steady",
            };
            format!(
                "Over the last {} days your overeating risk {}, with {} high-risk days. \
                 {} active patterns are shaping it.",
                week.days, trend, week.high_days, active_patterns
            )
        }
        None => format!(
            "We do not have a week of risk estimates yet. {} active patterns are being tracked.",
            active_patterns
        ),
    };

    let mut summary_facts = facts([("active_patterns", active_patterns as f64)]);
    if let Some(week) = summary {
        summary_facts.insert("average_risk".to_string(), week.average);
        summary_facts.insert("high_days".to_string(), week.high_days as f64);
    }

    InsightPayload {
        kind: InsightKind::Risk,
        pattern_kind: None,
        title: "Your risk this week".to_string(),
        body,
        action: Some("Check today's risk before the evening".to_string()),
        facts: summary_facts,
    }
}
