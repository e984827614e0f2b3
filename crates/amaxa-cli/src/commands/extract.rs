//! `amaxa extract` command implementation
//!
//! Extracts the records described by an operation definition into one CSV
//! file per sObject.

use crate::config::Config;
use crate::credentials::connect_with_file;
use crate::definition::{base_dir, build_extract_operation, OperationDefinition};
use crate::error::Result;
use amaxa_core::client::SalesforceClient;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Run an extraction
pub async fn run(definition_path: &Path, credentials_path: &Path, config: &Config) -> Result<()> {
    let definition = OperationDefinition::load(definition_path)?;
    let client = connect_with_file(credentials_path, config).await?;

    execute(definition_path, &definition, Arc::new(client)).await
}

/// Run an extraction against an already connected client
pub async fn execute(
    definition_path: &Path,
    definition: &OperationDefinition,
    client: Arc<dyn SalesforceClient>,
) -> Result<()> {
    let mut operation =
        build_extract_operation(definition, &base_dir(definition_path), client).await?;

    info!(
        "Starting extraction with {} sObjects",
        operation.steps().len()
    );
    operation.execute().await?;

    for step in operation.steps() {
        println!(
            "{}: {} records extracted",
            step.sobject(),
            operation.ledger().extracted_count(step.sobject())
        );
    }

    Ok(())
}
