//! Insight text rendering seam
//!
//! Rendering never fails the insight request: every problem turns into
//! [`RenderOutcome::UseTemplate`] and the template body is kept.

use crate::insight::templates::InsightPayload;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Rephrased body
    Rendered(String),
    /// Keep the template body; carries the reason for logs
    UseTemplate(String),
}

#[async_trait]
pub trait InsightRenderer: Send + Sync {
    async fn render(&self, payload: &InsightPayload) -> RenderOutcome;
}

/// Renderer that always keeps the template
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

#[async_trait]
impl InsightRenderer for TemplateRenderer {
    async fn render(&self, _payload: &InsightPayload) -> RenderOutcome {
        RenderOutcome::UseTemplate("text generation disabled".to_string())
    }
}
