//! Cold-start patterns from the onboarding cluster templates

use crate::types::{
    Evidence, Pattern, PatternId, PatternSource, PatternTemplate, UserId,
};
use chrono::{DateTime, Utc};

/// Template confidence never exceeds this
pub const COLD_START_CONFIDENCE_CAP: f64 = 0.4;

/// Cluster used when the user has none or it is unknown
pub const FALLBACK_CLUSTER: &str = "general";

/// Turn cluster templates into preliminary, active patterns for one user
pub fn patterns_from_templates(
    user_id: UserId,
    cluster_id: &str,
    templates: &[PatternTemplate],
    now: DateTime<Utc>,
) -> Vec<Pattern> {
    templates
        .iter()
        .map(|template| Pattern {
            id: PatternId::new(),
            user_id,
            kind: template.kind,
            description: template.description.clone(),
            confidence: template.confidence.clamp(0.0, COLD_START_CONFIDENCE_CAP),
            trigger: template.trigger.clone(),
            evidence: Evidence::default(),
            source: PatternSource::ColdStart {
                cluster_id: cluster_id.to_string(),
            },
            preliminary: true,
            active: true,
            deactivation: None,
            discovered_at: now,
        })
        .collect()
}
