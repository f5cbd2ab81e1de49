//! Cold-start cluster table and onboarding cluster assignment
//!
//! Clusters are computed offline; the built-in table mirrors the published
//! cluster set. A remote table can be swapped in behind [`ClusterTable`].

use crate::detection::buckets::EVENING_WINDOW;
use crate::detection::cold_start::FALLBACK_CLUSTER;
use crate::error::{PipelineError, Result};
use crate::types::{EatingContext, Mood, PatternKind, PatternTemplate, PatternTrigger};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source of cold-start pattern templates
#[async_trait]
pub trait ClusterTable: Send + Sync {
    /// Templates for a cluster. Unknown clusters are `NotFound`; an
    /// unreachable table is `UpstreamUnavailable`.
    async fn get_cluster_patterns(&self, cluster_id: &str) -> Result<Vec<PatternTemplate>>;
}

static BUILTIN_CLUSTERS: Lazy<HashMap<String, Vec<PatternTemplate>>> = Lazy::new(|| {
    let template = |kind, description: &str, confidence, trigger| PatternTemplate {
        kind,
        description: description.to_string(),
        confidence,
        trigger,
    };

    HashMap::from([
        (
            "emotional_eater".to_string(),
            vec![template(
                PatternKind::Mood,
                "People with a profile like yours often eat more when stressed or low",
                0.3,
                PatternTrigger::Moods(vec![Mood::Bad, Mood::Awful]),
            )],
        ),
        (
            "chaotic_eater".to_string(),
            vec![template(
                PatternKind::Skip,
                "People with a profile like yours often skip meals and overeat later",
                0.3,
                PatternTrigger::Window(EVENING_WINDOW),
            )],
        ),
        (
            "unstructured_eater".to_string(),
            vec![template(
                PatternKind::Time,
                "People with a profile like yours often eat at irregular times",
                0.3,
                PatternTrigger::Window(EVENING_WINDOW),
            )],
        ),
        (
            "mindless_eater".to_string(),
            vec![template(
                PatternKind::Context,
                "People with a profile like yours often eat on the go or in front of a screen",
                0.3,
                PatternTrigger::Context(EatingContext::Street),
            )],
        ),
        (
            FALLBACK_CLUSTER.to_string(),
            vec![template(
                PatternKind::Time,
                "Many people eat most of their food in the evening",
                0.25,
                PatternTrigger::Window(EVENING_WINDOW),
            )],
        ),
    ])
});

/// In-process cluster table
#[derive(Debug, Clone)]
pub struct StaticClusterTable {
    clusters: HashMap<String, Vec<PatternTemplate>>,
}

impl Default for StaticClusterTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StaticClusterTable {
    pub fn builtin() -> Self {
        Self {
            clusters: BUILTIN_CLUSTERS.clone(),
        }
    }

    pub fn new(clusters: HashMap<String, Vec<PatternTemplate>>) -> Self {
        Self { clusters }
    }

    pub fn cluster_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.clusters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl ClusterTable for StaticClusterTable {
    async fn get_cluster_patterns(&self, cluster_id: &str) -> Result<Vec<PatternTemplate>> {
        self.clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("cluster {}", cluster_id)))
    }
}

/// Onboarding interview answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewAnswer {
    pub question_id: String,
    pub answer_id: String,
}

/// Map the two onboarding answers to a cluster id
pub fn assign_cluster(answers: &[InterviewAnswer]) -> &'static str {
    let answer = |question: &str| {
        answers
            .iter()
            .find(|a| a.question_id == question)
            .map(|a| a.answer_id.as_str())
    };

    match (answer("biggest_challenge"), answer("eating_schedule")) {
        (Some("emotional_eating"), _) => "emotional_eater",
        (Some("overeating"), Some("irregular" | "restrictive")) => "chaotic_eater",
        (Some("lack_of_structure"), _) => "unstructured_eater",
        (Some("unhealthy_choices"), _) => "mindless_eater",
        _ => FALLBACK_CLUSTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::cold_start::COLD_START_CONFIDENCE_CAP;

    fn answers(challenge: &str, schedule: &str) -> Vec<InterviewAnswer> {
        vec![
            InterviewAnswer {
                question_id: "biggest_challenge".to_string(),
                answer_id: challenge.to_string(),
            },
            InterviewAnswer {
                question_id: "eating_schedule".to_string(),
                answer_id: schedule.to_string(),
            },
        ]
    }

    #[test]
    fn test_assign_cluster() {
        assert_eq!(assign_cluster(&answers("emotional_eating", "regular")), "emotional_eater");
        assert_eq!(assign_cluster(&answers("overeating", "irregular")), "chaotic_eater");
        assert_eq!(assign_cluster(&answers("overeating", "restrictive")), "chaotic_eater");
        assert_eq!(assign_cluster(&answers("overeating", "regular")), "general");
        assert_eq!(assign_cluster(&answers("lack_of_structure", "regular")), "unstructured_eater");
        assert_eq!(assign_cluster(&answers("unhealthy_choices", "regular")), "mindless_eater");
        assert_eq!(assign_cluster(&[]), "general");
    }

    #[tokio::test]
    async fn test_builtin_templates_within_cap() {
        let table = StaticClusterTable::builtin();
        assert_eq!(table.cluster_ids().len(), 5);

        for id in table.cluster_ids() {
            let templates = table.get_cluster_patterns(id).await.unwrap();
            assert!(!templates.is_empty());
            assert!(templates
                .iter()
                .all(|t| t.confidence <= COLD_START_CONFIDENCE_CAP));
        }
    }

    #[tokio::test]
    async fn test_unknown_cluster_not_found() {
        let table = StaticClusterTable::builtin();
        let err = table.get_cluster_patterns("night_owl").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
