//! `amaxa load` command implementation
//!
//! Loads CSV files described by an operation definition. A failed load leaves
//! a state file behind that `--use-state` resumes from.

use crate::config::Config;
use crate::credentials::connect_with_file;
use crate::definition::{base_dir, build_load_operation, OperationDefinition};
use crate::error::Result;
use crate::state::{state_path_for, StateFile};
use amaxa_core::client::SalesforceClient;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Run a load
pub async fn run(
    definition_path: &Path,
    credentials_path: &Path,
    use_state: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let definition = OperationDefinition::load(definition_path)?;
    let state = use_state.map(StateFile::load).transpose()?;
    let client = connect_with_file(credentials_path, config).await?;

    execute(definition_path, &definition, state.as_ref(), Arc::new(client)).await
}

/// Run a load against an already connected client
pub async fn execute(
    definition_path: &Path,
    definition: &OperationDefinition,
    state: Option<&StateFile>,
    client: Arc<dyn SalesforceClient>,
) -> Result<()> {
    let mut operation = build_load_operation(
        definition,
        &base_dir(definition_path),
        client,
        state.is_some(),
    )
    .await?;

    if let Some(state) = state {
        state.restore_into(&mut operation)?;
    }

    info!("Starting load with {} sObjects", operation.steps().len());

    if let Err(e) = operation.execute().await {
        let state_path = state_path_for(definition_path);
        match StateFile::from_operation(&operation).save(&state_path) {
            Ok(()) => error!(
                "Load failed at stage {}. Saved state to {}; pass --use-state to resume.",
                operation.stage(),
                state_path.display()
            ),
            Err(save_error) => error!(
                "Load failed and state could not be saved to {}: {}",
                state_path.display(),
                save_error
            ),
        }
        return Err(e.into());
    }

    println!("{} records loaded", operation.id_map().len());
    Ok(())
}
