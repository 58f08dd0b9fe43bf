//! Vigil Common - risk analysis and remediation core
//!
//! Rolling metric histories feed a failure predictor and a capacity
//! planner; rule conditions over live values drive the remediation engine.

pub mod alerts;
pub mod anomaly;
pub mod capacity;
pub mod config;
pub mod error;
pub mod history;
pub mod predictor;
pub mod remediation;
pub mod shutdown;
pub mod trend;

pub use alerts::{Alert, AlertSink, MetricsSink, Severity, SinkError, TracingSink};
pub use capacity::{CapacityPlanner, CapacityReport, Forecast, Measurement};
pub use config::VigilConfig;
pub use error::{Result, VigilError};
pub use history::{HistoryStore, Observation, Sample};
pub use predictor::{FailurePredictor, Prediction, RiskLevel};
pub use remediation::{RemediationEngine, RemediationRecord, RemediationRule};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use trend::{Trend, TrendAnalysis};
