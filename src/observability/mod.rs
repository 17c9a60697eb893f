//! Telemetry & Health
//!
//! Principles:
//! - Observability is read-only; it never changes a result
//! - Logs are JSON lines, one event per line
//! - A logging failure never fails a request
//!
//! ```ignore
//! use rulesbrain::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::FactsLoaded, &[("admitted", "42")]);
//! let metrics = MetricsRegistry::new();
//! metrics.record_query("valid_card", 3);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot, PredicateLatency};
pub use scope::{ObservationScope, Timer};

/// Logs `event` at its own severity.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
