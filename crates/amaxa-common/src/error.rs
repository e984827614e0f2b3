//! Error types for Amaxa

use thiserror::Error;

/// Result type alias for Amaxa operations
pub type Result<T> = std::result::Result<T, AmaxaError>;

/// Main error type for Amaxa
#[derive(Error, Debug)]
pub enum AmaxaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid Salesforce Id '{0}': Salesforce Ids must be 15 or 18 characters")]
    InvalidId(String),

    #[error("Invalid Boolean value '{0}'")]
    InvalidBoolean(String),

    #[error("Unable to determine sObject type for Id {0}")]
    UnknownKeyPrefix(String),

    #[error("No describe information loaded for sObject {0}")]
    SchemaNotLoaded(String),

    #[error("Salesforce API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Errors took place during {phase} of {sobject}:\n{}", .errors.join("\n"))]
    StepFailed {
        sobject: String,
        phase: String,
        errors: Vec<String>,
    },
}

impl AmaxaError {
    /// Create an API error
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a step failure carrying every error string collected on the step
    pub fn step_failed(
        sobject: impl Into<String>,
        phase: impl Into<String>,
        errors: Vec<String>,
    ) -> Self {
        Self::StepFailed {
            sobject: sobject.into(),
            phase: phase.into(),
            errors,
        }
    }
}
