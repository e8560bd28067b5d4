//! Axum HTTP/WS API server.
//!
//! This crate provides:
//! - REST endpoints for uploads, projects, translation, export and glossary
//! - WebSocket job progress
//! - Supabase JWT verification
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
