pub mod adaptive;
pub mod config;
pub mod executor;
pub mod metrics;

pub use adaptive::{AdaptivePhase, AdaptiveSummary};
pub use config::{NormalizedLoadConfig, parse_duration_ms};
pub use executor::{LoadRunner, LoadTestExecutor};
pub use metrics::{LoadTestMetrics, LoadTestResults};
