//! Pattern detection
//!
//! [`PatternDetector`] is pure: it takes an already-fetched event window and
//! returns ranked patterns. With too little data the caller takes the
//! cold-start path instead (see [`cold_start`]).

pub mod buckets;
pub mod cold_start;
pub mod detectors;

use crate::config::DetectionConfig;
use crate::types::{FoodEvent, Pattern, PatternId, PatternSource, UserId};
use buckets::EventAggregates;
use chrono::{DateTime, Utc};
use detectors::Candidate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of one detection run for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectionOutcome {
    /// No events in the window
    Empty,
    /// Too few events; templates from the user's onboarding cluster
    ColdStart {
        cluster_id: String,
        patterns: Vec<Pattern>,
    },
    /// Full algorithm ran
    Detected { patterns: Vec<Pattern> },
}

impl DetectionOutcome {
    pub fn patterns(&self) -> &[Pattern] {
        match self {
            DetectionOutcome::Empty => &[],
            DetectionOutcome::ColdStart { patterns, .. }
            | DetectionOutcome::Detected { patterns } => patterns,
        }
    }

    pub fn into_patterns(self) -> Vec<Pattern> {
        match self {
            DetectionOutcome::Empty => Vec::new(),
            DetectionOutcome::ColdStart { patterns, .. }
            | DetectionOutcome::Detected { patterns } => patterns,
        }
    }

    /// Callers must show a disclaimer when this is set
    pub fn is_preliminary(&self) -> bool {
        matches!(self, DetectionOutcome::ColdStart { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PatternDetector {
    config: DetectionConfig,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl PatternDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Whether a window with `event_count` events takes the cold-start path
    pub fn needs_cold_start(&self, event_count: usize) -> bool {
        event_count < self.config.cold_start_threshold
    }

    /// Run every detector over the window and return the ranked survivors.
    ///
    /// Input order does not matter; events are sorted by (timestamp, id)
    /// first so identical windows always produce identical output.
    pub fn detect(&self, user_id: UserId, events: &[FoodEvent], now: DateTime<Utc>) -> Vec<Pattern> {
        if events.is_empty() {
            return Vec::new();
        }

        let mut sorted = events.to_vec();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let candidates = self.candidates(&sorted);
        debug!(
            "Detection for {}: {} candidates from {} events",
            user_id,
            candidates.len(),
            sorted.len()
        );

        self.rank(candidates)
            .into_iter()
            .map(|c| into_pattern(c, user_id, now))
            .collect()
    }

    fn candidates(&self, events: &[FoodEvent]) -> Vec<Candidate> {
        let agg = EventAggregates::build(events);

        let mut candidates = Vec::new();
        candidates.extend(detectors::detect_sequence(&agg, events));
        candidates.extend(detectors::detect_mood(&agg, events));
        candidates.extend(detectors::detect_context(&agg, events));
        candidates.extend(detectors::detect_skip(&agg, events));
        candidates.extend(detectors::detect_time(&agg, events));
        candidates
    }

    /// Drop weak candidates, sort by confidence descending, keep the top N
    fn rank(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.confidence >= self.config.min_confidence)
            .collect();

        kept.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.kind.cmp(&b.kind))
                .then(a.trigger.cmp(&b.trigger))
        });
        kept.truncate(self.config.max_patterns);
        kept
    }
}

fn into_pattern(candidate: Candidate, user_id: UserId, now: DateTime<Utc>) -> Pattern {
    Pattern {
        id: PatternId::new(),
        user_id,
        kind: candidate.kind,
        description: candidate.description,
        confidence: candidate.confidence.clamp(0.0, 1.0),
        trigger: candidate.trigger,
        evidence: candidate.evidence,
        source: PatternSource::Detected,
        preliminary: false,
        active: true,
        deactivation: None,
        discovered_at: now,
    }
}
