//! Error types for Vigil.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Insufficient data: need {need} samples, have {have}")]
    InsufficientData { need: usize, have: usize },

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Action execution failed: {0}")]
    ActionExecution(String),

    #[error("Unknown action kind: {0}")]
    UnknownActionKind(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl VigilError {
    /// True for errors a caller can expect to clear up on its own
    /// (more samples arriving), as opposed to policy or I/O problems.
    pub fn is_transient(&self) -> bool {
        matches!(self, VigilError::InsufficientData { .. })
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
