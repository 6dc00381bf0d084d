//! HTTP API: forward-auth and session endpoints over the orchestrator.

pub mod app;
pub mod middleware;
pub mod settings;
