//! Request-level middleware: access logging and endpoint metrics.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
