//! Configuration for the Amaxa CLI
//!
//! Connection settings come from the environment (and `.env`, loaded by the
//! binary). Definition, credential and state documents are YAML unless the
//! file extension says JSON.

use crate::error::{CliError, Result};
use amaxa_core::salesforce::SalesforceConfig;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// CLI configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Salesforce connection settings
    pub salesforce: SalesforceConfig,
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        Self {
            salesforce: SalesforceConfig::from_env(),
        }
    }

    pub fn salesforce(&self) -> &SalesforceConfig {
        &self.salesforce
    }
}

/// Whether a document path names a JSON file
pub fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Read a YAML or JSON document, choosing the parser by file extension.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path)?;
    if is_json(path) {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}
