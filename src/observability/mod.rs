//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing (text or JSON)
//! - Prometheus metrics for allocations, engine events and leadership
//! - HTTP endpoints for scraping and readiness probes

pub mod http;
pub mod metrics;
pub mod tracing;
