//! Credentials file
//!
//! ```yaml
//! version: 1
//! credentials:
//!   username: admin@example.com
//!   password: hunter2
//!   security-token: abc123
//!   sandbox: true
//! ```
//!
//! or, with a session obtained elsewhere:
//!
//! ```yaml
//! version: 1
//! credentials:
//!   access-token: 00D...
//!   instance-url: https://example.my.salesforce.com
//! ```

use crate::config::{read_document, Config};
use crate::error::{CliError, Result};
use amaxa_core::salesforce::{connect, Credentials, RestClient};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Only supported credentials file version
pub const CREDENTIALS_VERSION: u32 = 1;

/// Parsed credentials file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsFile {
    pub version: Option<u32>,
    pub credentials: Option<CredentialsEntry>,
}

/// The `credentials` section of a credentials file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CredentialsEntry {
    pub access_token: Option<String>,
    pub instance_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub security_token: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
}

impl CredentialsFile {
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path)
    }

    /// Check the file and turn it into connection credentials.
    pub fn validate(self) -> Result<Credentials> {
        match self.version {
            None => return Err(CliError::invalid_credentials("version: required field")),
            Some(CREDENTIALS_VERSION) => {},
            Some(other) => {
                return Err(CliError::invalid_credentials(format!(
                    "version: unsupported version {}",
                    other
                )))
            },
        }

        let entry = self
            .credentials
            .ok_or_else(|| CliError::invalid_credentials("credentials: required field"))?;

        let token_flow = entry.access_token.is_some() || entry.instance_url.is_some();
        let password_flow = entry.username.is_some()
            || entry.password.is_some()
            || entry.security_token.is_some();

        match (token_flow, password_flow) {
            (true, true) => Err(CliError::invalid_credentials(
                "access-token and username/password credentials cannot be combined",
            )),
            (false, false) => Err(CliError::invalid_credentials("no credentials were provided")),
            (true, false) => match (entry.access_token, entry.instance_url) {
                (Some(access_token), Some(instance_url)) => Ok(Credentials::AccessToken {
                    instance_url,
                    access_token,
                }),
                _ => Err(CliError::invalid_credentials(
                    "access-token and instance-url must be provided together",
                )),
            },
            (false, true) => match (entry.username, entry.password) {
                (Some(username), Some(password)) => Ok(Credentials::UsernamePassword {
                    username,
                    password,
                    security_token: entry.security_token,
                    sandbox: entry.sandbox,
                }),
                _ => Err(CliError::invalid_credentials(
                    "username and password must be provided together",
                )),
            },
        }
    }
}

/// Load a credentials file and authenticate with it.
pub async fn connect_with_file(path: &Path, config: &Config) -> Result<RestClient> {
    let credentials = CredentialsFile::load(path)?.validate()?;

    let client = connect(&credentials, config.salesforce())
        .await
        .map_err(|e| CliError::Authentication(e.to_string()))?;

    info!("Connected to {}", client.instance_url());
    Ok(client)
}
