//! Observability setup for RidePool
//!
//! - Structured logging via tracing
//! - Prometheus exporter for the `pool_*` metrics recorded by the matching core
//!
//! ```ignore
//! use observability::{init_logging, init_metrics, LogFormat};
//!
//! init_logging("ridepool", LogFormat::Pretty)?;
//! init_metrics(9100)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{describe_pool_metrics, init_metrics};
