pub mod logging;
pub mod metrics;
pub mod session;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
pub use session::SessionMiddleware;
