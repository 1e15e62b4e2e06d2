//! Observability for termpool: logging setup, in-process metrics, and
//! per-call trace spans.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`,
//!   always on stderr so stdout stays free for tool results
//! - **Metrics**: thread-safe counters, gauges, and duration totals that
//!   tests and log lines read back
//! - **Tracing**: trace/span ID generation for correlating one tool call's
//!   log lines

pub mod logging;
pub mod metrics;
pub mod tracing_setup;
