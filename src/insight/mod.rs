//! Daily insight generation
//!
//! The generator is pure apart from the renderer call: the pipeline loads
//! the profile, patterns, weekly stats and subscription state, builds an
//! [`InsightContext`] and persists whatever comes back.

pub mod render;
pub mod rotation;
pub mod templates;

use crate::config::InsightConfig;
use crate::risk::WeeklyRiskSummary;
use crate::services::lessons::LessonCatalog;
use crate::services::subscriptions::should_lock;
use crate::types::{Insight, InsightId, InsightKind, Pattern, PatternKind, TextSource, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

pub use render::{InsightRenderer, RenderOutcome, TemplateRenderer};
pub use rotation::RotationCursor;
pub use templates::{InsightPayload, WeekStats};

pub const UPGRADE_HINT: &str = "Upgrade to premium to read the full insight.";

/// Everything the generator needs for one user and day
#[derive(Debug, Clone)]
pub struct InsightContext<'a> {
    pub user_id: UserId,
    pub now: DateTime<Utc>,
    /// Rotation day after the day-boundary advance
    pub rotation_day: u8,
    pub active_patterns: &'a [Pattern],
    pub current_week: WeekStats,
    pub previous_week: WeekStats,
    pub completed_lessons: &'a HashSet<String>,
    pub weekly_risk: Option<WeeklyRiskSummary>,
    /// Delivered insights before this one
    pub received_so_far: u64,
    pub premium: bool,
}

/// First `chars` characters of `body`, an ellipsis and the upgrade hint
pub fn teaser(body: &str, chars: usize) -> String {
    let head: String = body.chars().take(chars).collect();
    format!("{}…\n\n{}", head.trim_end(), UPGRADE_HINT)
}

pub struct InsightGenerator {
    config: InsightConfig,
    catalog: LessonCatalog,
}

impl Default for InsightGenerator {
    fn default() -> Self {
        Self::new(InsightConfig::default(), LessonCatalog::builtin())
    }
}

impl InsightGenerator {
    pub fn new(config: InsightConfig, catalog: LessonCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn catalog(&self) -> &LessonCatalog {
        &self.catalog
    }

    fn top_pattern<'p>(patterns: &'p [Pattern]) -> Option<&'p Pattern> {
        patterns
            .iter()
            .filter(|p| p.active)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence).then(b.id.cmp(&a.id)))
    }

    /// Pick the draft for the rotation day
    pub fn draft<'a>(&self, ctx: &InsightContext<'a>) -> (InsightPayload, Option<&'a Pattern>) {
        match RotationCursor::kind_for_day(ctx.rotation_day) {
            InsightKind::Progress => (
                templates::progress_draft(&ctx.current_week, &ctx.previous_week),
                None,
            ),
            InsightKind::Cbt => {
                let kinds: HashSet<PatternKind> = ctx
                    .active_patterns
                    .iter()
                    .filter(|p| p.active)
                    .map(|p| p.kind)
                    .collect();
                match self.catalog.recommend(&kinds, ctx.completed_lessons) {
                    Some(lesson) => (templates::cbt_draft(lesson), None),
                    None => (templates::general_draft(), None),
                }
            }
            InsightKind::Risk => {
                let active = ctx.active_patterns.iter().filter(|p| p.active).count();
                (templates::risk_draft(ctx.weekly_risk.as_ref(), active), None)
            }
            InsightKind::Pattern | InsightKind::General => {
                match Self::top_pattern(ctx.active_patterns) {
                    Some(pattern) => (templates::pattern_draft(pattern), Some(pattern)),
                    None => (templates::general_draft(), None),
                }
            }
        }
    }

    /// Build the day's insight. Never fails: rendering problems keep the
    /// template body.
    pub async fn generate(
        &self,
        ctx: &InsightContext<'_>,
        renderer: &dyn InsightRenderer,
    ) -> Insight {
        let (payload, pattern) = self.draft(ctx);

        let (body, text_source) = match renderer.render(&payload).await {
            RenderOutcome::Rendered(text) if !text.trim().is_empty() => (text, TextSource::Rendered),
            RenderOutcome::Rendered(_) => {
                debug!("Renderer returned empty text, keeping template");
                (payload.body.clone(), TextSource::Template)
            }
            RenderOutcome::UseTemplate(reason) => {
                debug!("Using template for {} insight: {}", payload.kind.as_str(), reason);
                (payload.body.clone(), TextSource::Template)
            }
        };

        let locked = should_lock(ctx.received_so_far, ctx.premium, self.config.free_tier_limit);
        let body = if locked {
            teaser(&body, self.config.teaser_chars)
        } else {
            body
        };

        Insight {
            id: InsightId::new(),
            user_id: ctx.user_id,
            pattern_id: pattern.map(|p| p.id),
            title: payload.title,
            body,
            action: if locked { None } else { payload.action },
            kind: payload.kind,
            seen: false,
            locked,
            rotation_day: ctx.rotation_day,
            text_source,
            created_at: ctx.now,
        }
    }
}
