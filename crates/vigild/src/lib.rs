//! Vigil Daemon library - host sampling and the agent loop

pub mod agent;
pub mod collector;

pub use agent::{Agent, CycleOutcome, SharedCollector, Sinks};
pub use collector::{DiskUsage, SnapshotProvider, SystemCollector, SystemSnapshot};
