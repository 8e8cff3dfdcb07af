//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! config service, watcher, remote clients
//!     → logging.rs (tracing subscriber, runtime level changes)
//!     → metrics.rs (resolution cycle counters)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event; secret values never reach a log line
//! - Metrics go through the `metrics` facade; the host process installs the
//!   exporter, if any

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogHandle};
