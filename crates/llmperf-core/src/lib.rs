//! Core domain types, configuration and metrics for the LLMPerf load harness.

pub mod config;
pub mod error;
pub mod metrics;
pub mod result;
pub mod scenario;
pub mod transport;

pub use config::{
    HarnessConfig, LoggingConfig, MockConfig, PerfConfig, ResilienceConfig, ThresholdConfig,
};
pub use error::{CoreError, CoreResult};
pub use result::{Phase, RequestResult};
pub use scenario::{Category, LoadConfig, LoadMode, RequestTemplate, Scenario, Segmentation, Thresholds};
pub use transport::{Transport, TransportError, TransportResponse};
