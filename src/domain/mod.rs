//! Domain layer for rask-metrics-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `Metric`: one time-series point (measurement, tags, fields, timestamp)
//! - `FieldValue`: typed field payloads as understood by line protocol
//! - `ForwarderError`: Top-level error type for the host binary

pub mod error;
pub mod metric;

pub use error::ForwarderError;
pub use metric::{FieldValue, Metric};
