//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoints, acceptors and connection workers produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges, labelled by endpoint)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Metric updates are no-ops until a recorder is installed
//! - Every event carries the endpoint name

pub mod logging;
pub mod metrics;
