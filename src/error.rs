//! Error taxonomy shared by backup, restore and drill runs

use crate::config::ConfigError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Command '{command}' failed with exit code {code:?}: {stderr}")]
    ToolFailure {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command '{command}' timed out after {timeout:?}")]
    ProcessTimeout { command: String, timeout: Duration },

    #[error("Integrity check failed for '{file}': {reason}")]
    Integrity { file: String, reason: String },

    #[error("Failed to decrypt '{file}': authentication tag mismatch or corrupted data")]
    Decryption { file: String },

    #[error("Object storage request failed: {0}")]
    Network(String),

    #[error("Schema drift detected (missing: [{}], unexpected: [{}])", missing.join(", "), unexpected.join(", "))]
    SchemaDrift {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Smoke test failed: {0}")]
    SmokeTest(String),

    #[error("Failed to restore key '{key}': {reason}")]
    KeyRestore { key: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Fleet store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Label this error with the step that produced it
    pub fn at_step(self, step: &'static str) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The underlying error with any step labels removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost step label, if any
    pub fn step(&self) -> Option<&'static str> {
        match self {
            Error::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Attach a step label to a fallible result
pub trait StepContext<T> {
    fn step(self, step: &'static str) -> Result<T>;
}

impl<T, E: Into<Error>> StepContext<T> for std::result::Result<T, E> {
    fn step(self, step: &'static str) -> Result<T> {
        self.map_err(|e| e.into().at_step(step))
    }
}
