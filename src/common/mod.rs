pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod middleware;

pub use logging::init as setup_logging;
