//! Error types for the Amaxa CLI
//!
//! Every variant carries a user-facing message that says what went wrong and,
//! where possible, how to fix it.

use amaxa_common::AmaxaError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// The operation definition failed validation
    #[error("The operation definition is not valid:\n{}", .0.join("\n"))]
    InvalidDefinition(Vec<String>),

    /// The credentials file failed validation
    #[error("Invalid credentials: {0}. Provide either access-token and instance-url, or username and password.")]
    InvalidCredentials(String),

    /// Authentication against Salesforce failed
    #[error("Unable to authenticate to Salesforce: {0}")]
    Authentication(String),

    /// The load state file could not be used
    #[error("Invalid state file: {0}. Remove the file to start the load from the beginning.")]
    InvalidState(String),

    /// Required file is missing
    #[error("File not found: '{0}'. Verify the file path exists and you have read permissions.")]
    FileNotFound(String),

    /// Extraction or load failed
    #[error(transparent)]
    Core(#[from] AmaxaError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables.")]
    Config(String),

    /// YAML parsing failed
    #[error("Failed to parse YAML: {0}. Check the file syntax at the indicated line/column.")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid credentials error
    pub fn invalid_credentials(msg: impl Into<String>) -> Self {
        Self::InvalidCredentials(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_definition_lists_every_error() {
        let err = CliError::InvalidDefinition(vec![
            "version: required field".to_string(),
            "sObject Foo does not exist or is not visible.".to_string(),
        ]);

        assert_eq!(
            err.to_string(),
            "The operation definition is not valid:\nversion: required field\nsObject Foo does not exist or is not visible."
        );
    }

    #[test]
    fn test_core_errors_are_transparent() {
        let err: CliError = AmaxaError::step_failed("Account", "load", vec!["bad".into()]).into();

        assert_eq!(err.to_string(), "Errors took place during load of Account:\nbad");
    }
}
