//! HTTP API over the pipeline
//!
//! Provides:
//! - Event logging with the detection trigger
//! - Pattern listing, manual detection and dispute feedback
//! - Today's risk and today's insight

pub mod server;

pub use server::{build_router, serve, ApiError, ApiServerConfig, AppState};
