//! cogcheck-core — Cognitive test session engine.
//!
//! This crate defines the question model, the per-question runtime, scoring,
//! cooldown gating and the session controller that ties them to the external
//! test API.

pub mod cooldown;
pub mod error;
pub mod history;
pub mod model;
pub mod parser;
pub mod question;
pub mod report;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod traits;
