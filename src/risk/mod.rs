//! Daily overeating risk
//!
//! A pure function of the active patterns, today's events and two calendar
//! flags. Patterns are summed in id order so repeated calls with the same
//! inputs produce bit-identical scores.

use crate::config::RiskConfig;
use crate::detection::buckets::MIDDAY_WINDOW;
use crate::types::{
    FoodEvent, HourWindow, Pattern, PatternId, PatternKind, PatternTrigger, RiskLevel, RiskScore,
    UserId,
};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

const WINDOW_WEIGHT: f64 = 0.4;
const MOOD_WEIGHT: f64 = 0.3;
const SKIP_WEIGHT: f64 = 0.5;

const HIGH_CALORIE_DAMPING: f64 = 0.7;
const LESSON_DAMPING: f64 = 0.8;
const WEEKEND_BOOST: f64 = 1.3;

/// Skip patterns only count after this hour
const SKIP_AFTER_HOUR: u8 = 15;

/// Everything the predictor looks at
#[derive(Debug, Clone)]
pub struct RiskInputs<'a> {
    pub user_id: UserId,
    pub now: DateTime<Utc>,
    pub patterns: &'a [Pattern],
    pub today_events: &'a [FoodEvent],
    pub lesson_completed_today: bool,
    pub is_weekend: bool,
}

/// One pattern's share of the score
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub pattern_id: PatternId,
    pub kind: PatternKind,
    pub amount: f64,
    pub window: Option<HourWindow>,
}

#[derive(Debug, Clone)]
pub struct RiskPredictor {
    config: RiskConfig,
}

impl Default for RiskPredictor {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskPredictor {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn predict(&self, inputs: &RiskInputs<'_>) -> RiskScore {
        let contributions = self.contributions(inputs);

        let mut score: f64 = contributions.iter().map(|c| c.amount).sum();

        let high_calorie_logged = inputs
            .today_events
            .iter()
            .any(|e| e.calories >= self.config.high_calorie_threshold);
        if high_calorie_logged {
            score *= HIGH_CALORIE_DAMPING;
        }
        if inputs.lesson_completed_today {
            score *= LESSON_DAMPING;
        }
        if inputs.is_weekend
            && inputs
                .patterns
                .iter()
                .any(|p| p.active && p.is_weekend_flavored())
        {
            score *= WEEKEND_BOOST;
        }

        let score = score.clamp(0.0, 1.0);

        // First of equal contributions wins
        let top = contributions
            .iter()
            .fold(None::<&Contribution>, |best, c| match best {
                Some(b) if b.amount >= c.amount => Some(b),
                _ => Some(c),
            });

        RiskScore {
            user_id: inputs.user_id,
            date: inputs.now.date_naive(),
            level: RiskLevel::from_score(score),
            score,
            contributing_patterns: contributions.iter().map(|c| c.pattern_id).collect(),
            time_window: top.and_then(|c| c.window).map(|w| w.label()),
            recommendation: top.and_then(recommendation_for),
            computed_at: inputs.now,
        }
    }

    /// Per-pattern contributions in stable (id) order, zero-valued ones dropped
    pub fn contributions(&self, inputs: &RiskInputs<'_>) -> Vec<Contribution> {
        let hour = inputs.now.hour() as u8;

        let mut active: Vec<&Pattern> = inputs.patterns.iter().filter(|p| p.active).collect();
        active.sort_by_key(|p| p.id);

        let last_mood = inputs
            .today_events
            .iter()
            .filter(|e| e.mood.is_some())
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)))
            .and_then(|e| e.mood);

        let midday_logged = inputs
            .today_events
            .iter()
            .any(|e| MIDDAY_WINDOW.contains(e.hour));

        let mut contributions = Vec::new();
        for pattern in active {
            let amount = match (pattern.kind, &pattern.trigger) {
                (PatternKind::Time | PatternKind::Sequence, PatternTrigger::Window(window)) => {
                    if window.hours_until_start(hour) <= self.config.look_ahead_hours {
                        pattern.confidence * WINDOW_WEIGHT
                    } else {
                        0.0
                    }
                }
                (PatternKind::Mood, PatternTrigger::Moods(moods)) => match last_mood {
                    Some(mood) if moods.contains(&mood) => pattern.confidence * MOOD_WEIGHT,
                    _ => 0.0,
                },
                (PatternKind::Skip, _) => {
                    if !midday_logged && hour > SKIP_AFTER_HOUR {
                        pattern.confidence * SKIP_WEIGHT
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };

            if amount > 0.0 {
                contributions.push(Contribution {
                    pattern_id: pattern.id,
                    kind: pattern.kind,
                    amount,
                    window: pattern.trigger.window(),
                });
            }
        }

        contributions
    }
}

fn recommendation_for(top: &Contribution) -> Option<String> {
    let text = match top.kind {
        PatternKind::Time => match top.window {
            Some(w) => format!(
                "Plan a filling snack before {} so you don't reach it starving",
                w.label()
            ),
            None => "Plan a filling snack before your usual late meal".to_string(),
        },
        PatternKind::Sequence => {
            "Add protein to lunch so dinner doesn't have to make up for it".to_string()
        }
        PatternKind::Mood => {
            "Before eating, take three slow breaths and name what you're feeling".to_string()
        }
        PatternKind::Skip => "Have a proper lunch today, even a small one counts".to_string(),
        PatternKind::Context => return None,
    };
    Some(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTrend {
    Rising,
    Falling,
    Steady,
}

/// A week's cached scores, summarized for the weekly risk insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRiskSummary {
    pub days: usize,
    pub average: f64,
    pub high_days: usize,
    pub trend: RiskTrend,
}

impl WeeklyRiskSummary {
    /// Trend compares the mean of the later half of the week with the earlier
    pub fn from_scores(scores: &[RiskScore]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }

        let mut sorted: Vec<&RiskScore> = scores.iter().collect();
        sorted.sort_by_key(|s| s.date);

        let mean = |xs: &[&RiskScore]| xs.iter().map(|s| s.score).sum::<f64>() / xs.len() as f64;

        let trend = if sorted.len() < 2 {
            RiskTrend::Steady
        } else {
            let (early, late) = sorted.split_at(sorted.len() / 2);
            let delta = mean(late) - mean(early);
            if delta > 0.1 {
                RiskTrend::Rising
            } else if delta < -0.1 {
                RiskTrend::Falling
            } else {
                RiskTrend::Steady
            }
        };

        Some(Self {
            days: sorted.len(),
            average: mean(sorted.as_slice()),
            high_days: sorted.iter().filter(|s| s.level == RiskLevel::High).count(),
            trend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Evidence, Mood, PatternSource};
    use chrono::{NaiveDate, TimeZone};
    use proptest::prelude::*;

    fn pattern(kind: PatternKind, confidence: f64, trigger: PatternTrigger) -> Pattern {
        Pattern {
            id: PatternId::new(),
            user_id: UserId::new(),
            kind,
            description: String::new(),
            confidence,
            trigger,
            evidence: Evidence::default(),
            source: PatternSource::Detected,
            preliminary: false,
            active: true,
            deactivation: None,
            discovered_at: Utc::now(),
        }
    }

    fn evening() -> PatternTrigger {
        PatternTrigger::Window(HourWindow::new(18, 22))
    }

    // 2024-05-08 is a Wednesday
    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 8, hour, 0, 0).unwrap()
    }

    fn inputs<'a>(
        now: DateTime<Utc>,
        patterns: &'a [Pattern],
        events: &'a [FoodEvent],
    ) -> RiskInputs<'a> {
        RiskInputs {
            user_id: UserId::new(),
            now,
            patterns,
            today_events: events,
            lesson_completed_today: false,
            is_weekend: false,
        }
    }

    #[test]
    fn test_no_patterns_is_low_without_recommendation() {
        let score = RiskPredictor::default().predict(&inputs(at(19), &[], &[]));
        assert_eq!(score.level, RiskLevel::Low);
        assert_eq!(score.score, 0.0);
        assert!(score.recommendation.is_none());
        assert!(score.time_window.is_none());
        assert!(score.contributing_patterns.is_empty());
    }

    #[test]
    fn test_evening_scenario_is_high() {
        let patterns = vec![
            pattern(PatternKind::Time, 1.0, evening()),
            pattern(PatternKind::Skip, 1.0, evening()),
        ];
        let score = RiskPredictor::default().predict(&inputs(at(19), &patterns, &[]));

        assert!((score.score - 0.9).abs() < 1e-12);
        assert_eq!(score.level, RiskLevel::High);
        assert_eq!(score.contributing_patterns.len(), 2);
        // Skip contributes 0.5 against 0.4 for the window
        assert_eq!(
            score.recommendation.as_deref(),
            Some("Have a proper lunch today, even a small one counts")
        );
        assert_eq!(score.time_window.as_deref(), Some("18:00–22:00"));
    }

    #[test]
    fn test_window_look_ahead() {
        let patterns = vec![pattern(PatternKind::Sequence, 1.0, evening())];
        let predictor = RiskPredictor::default();

        assert_eq!(predictor.contributions(&inputs(at(16), &patterns, &[])).len(), 1);
        assert_eq!(predictor.contributions(&inputs(at(15), &patterns, &[])).len(), 0);
        assert_eq!(predictor.contributions(&inputs(at(23), &patterns, &[])).len(), 0);
    }

    #[test]
    fn test_mood_matches_last_logged_mood() {
        let user = UserId::new();
        let patterns = vec![pattern(
            PatternKind::Mood,
            0.8,
            PatternTrigger::Moods(vec![Mood::Bad, Mood::Awful]),
        )];
        let early = FoodEvent::new(user, "toast", 300, Some(Mood::Bad), None, at(8));
        let later = FoodEvent::new(user, "salad", 400, Some(Mood::Great), None, at(13));
        let predictor = RiskPredictor::default();

        let bad_only = [early.clone()];
        let score = predictor.predict(&inputs(at(14), &patterns, &bad_only));
        assert!((score.score - 0.24).abs() < 1e-12);

        let recovered = [early, later];
        let score = predictor.predict(&inputs(at(14), &patterns, &recovered));
        assert_eq!(score.score, 0.0);
    }

    #[test]
    fn test_skip_suppressed_by_midday_entry_or_early_hour() {
        let user = UserId::new();
        let patterns = vec![pattern(PatternKind::Skip, 0.8, evening())];
        let predictor = RiskPredictor::default();

        assert_eq!(predictor.predict(&inputs(at(15), &patterns, &[])).score, 0.0);

        let lunch = [FoodEvent::new(user, "wrap", 500, None, None, at(12))];
        assert_eq!(predictor.predict(&inputs(at(17), &patterns, &lunch)).score, 0.0);

        assert!((predictor.predict(&inputs(at(17), &patterns, &[])).score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_multipliers() {
        let user = UserId::new();
        let mut weekend_pattern = pattern(PatternKind::Skip, 1.0, evening());
        weekend_pattern.evidence.weekend_share = 0.75;
        let patterns = vec![weekend_pattern];
        let predictor = RiskPredictor::default();

        let big_breakfast = [FoodEvent::new(user, "fry-up", 900, None, None, at(9))];
        let score = predictor.predict(&inputs(at(17), &patterns, &big_breakfast));
        assert!((score.score - 0.35).abs() < 1e-12);

        let mut with_lesson = inputs(at(17), &patterns, &[]);
        with_lesson.lesson_completed_today = true;
        assert!((predictor.predict(&with_lesson).score - 0.4).abs() < 1e-12);

        let mut weekend = inputs(at(17), &patterns, &[]);
        weekend.is_weekend = true;
        assert!((predictor.predict(&weekend).score - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_score_clamped() {
        let patterns = vec![
            pattern(PatternKind::Time, 1.0, evening()),
            pattern(PatternKind::Sequence, 1.0, evening()),
            pattern(PatternKind::Skip, 1.0, evening()),
        ];
        let score = RiskPredictor::default().predict(&inputs(at(19), &patterns, &[]));
        assert_eq!(score.score, 1.0);
        assert_eq!(score.level, RiskLevel::High);
    }

    #[test]
    fn test_inactive_patterns_ignored() {
        let mut disputed = pattern(PatternKind::Skip, 1.0, evening());
        disputed.active = false;
        let score = RiskPredictor::default().predict(&inputs(at(19), &[disputed], &[]));
        assert_eq!(score.score, 0.0);
    }

    #[test]
    fn test_context_patterns_contribute_nothing() {
        let patterns = vec![pattern(
            PatternKind::Context,
            0.9,
            PatternTrigger::Context(crate::types::EatingContext::Restaurant),
        )];
        let score = RiskPredictor::default().predict(&inputs(at(19), &patterns, &[]));
        assert_eq!(score.score, 0.0);
        assert!(score.recommendation.is_none());
    }

    #[test]
    fn test_weekly_summary_trend() {
        let user = UserId::new();
        let make = |day: u32, score: f64| RiskScore {
            user_id: user,
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            level: RiskLevel::from_score(score),
            score,
            contributing_patterns: vec![],
            time_window: None,
            recommendation: None,
            computed_at: Utc::now(),
        };

        let rising = vec![make(6, 0.1), make(7, 0.2), make(8, 0.7), make(9, 0.8)];
        let summary = WeeklyRiskSummary::from_scores(&rising).unwrap();
        assert_eq!(summary.trend, RiskTrend::Rising);
        assert_eq!(summary.high_days, 2);
        assert_eq!(summary.days, 4);

        let falling = vec![make(9, 0.1), make(6, 0.9)];
        assert_eq!(
            WeeklyRiskSummary::from_scores(&falling).unwrap().trend,
            RiskTrend::Falling
        );
        assert!(WeeklyRiskSummary::from_scores(&[]).is_none());
    }

    proptest! {
        #[test]
        fn prop_prediction_is_deterministic(
            confidences in proptest::collection::vec(0.0f64..=1.0, 0..6),
            hour in 0u32..24,
            lesson in any::<bool>(),
            weekend in any::<bool>(),
        ) {
            let kinds = [PatternKind::Time, PatternKind::Skip, PatternKind::Sequence];
            let patterns: Vec<Pattern> = confidences
                .iter()
                .enumerate()
                .map(|(i, c)| pattern(kinds[i % kinds.len()], *c, evening()))
                .collect();

            let mut shuffled = patterns.clone();
            shuffled.reverse();

            let mut a = inputs(at(hour), &patterns, &[]);
            a.lesson_completed_today = lesson;
            a.is_weekend = weekend;
            let mut b = inputs(at(hour), &shuffled, &[]);
            b.user_id = a.user_id;
            b.lesson_completed_today = lesson;
            b.is_weekend = weekend;

            let predictor = RiskPredictor::default();
            let first = predictor.predict(&a);
            let second = predictor.predict(&b);
            prop_assert_eq!(first.score.to_bits(), second.score.to_bits());
            prop_assert_eq!(first.level, second.level);
            prop_assert!((0.0..=1.0).contains(&first.score));
        }
    }
}
