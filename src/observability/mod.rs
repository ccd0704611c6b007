//! Observability module
//!
//! Logging, metrics, and structured event infrastructure for following a
//! session from the outside.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter, RunSummary};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
