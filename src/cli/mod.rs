//! CLI command handlers
//!
//! This module contains the command handlers for the nutrimind CLI.

pub mod helpers;
pub mod jobs;
pub mod user;
