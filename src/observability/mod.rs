//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging through `tracing`; see [`tracing::init_tracing`]
//! - OpenTelemetry metrics for queries, submits and accepts

pub mod metrics;
pub mod tracing;
