//! Load state files
//!
//! When a load fails, its stage and the Ids created so far are written next to
//! the definition so the load can be resumed with `--use-state`:
//!
//! ```yaml
//! version: 1
//! state:
//!   stage: inserts
//!   id-map:
//!     001000000000001AAA: 001000000000002AAA
//! ```

use crate::config::read_document;
use crate::error::{CliError, Result};
use amaxa_core::id::SalesforceId;
use amaxa_core::load::{LoadOperation, LoadStage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Only supported state file version
pub const STATE_VERSION: u32 = 1;

/// Parsed state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub state: SavedState,
}

/// Progress of an interrupted load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SavedState {
    pub stage: LoadStage,
    #[serde(default)]
    pub id_map: BTreeMap<String, String>,
}

impl StateFile {
    /// Capture the progress of a load operation
    pub fn from_operation(operation: &LoadOperation) -> Self {
        Self {
            version: STATE_VERSION,
            state: SavedState {
                stage: operation.stage(),
                id_map: operation
                    .id_map()
                    .iter()
                    .map(|(old, new)| (old.to_string(), new.to_string()))
                    .collect(),
            },
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file: Self = read_document(path)?;
        if file.version != STATE_VERSION {
            return Err(CliError::invalid_state(format!(
                "version: unsupported version {}",
                file.version
            )));
        }
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// The Id map with both sides parsed
    pub fn id_map(&self) -> Result<HashMap<SalesforceId, SalesforceId>> {
        self.state
            .id_map
            .iter()
            .map(|(old, new)| {
                let old = SalesforceId::new(old).map_err(|e| CliError::invalid_state(e.to_string()))?;
                let new = SalesforceId::new(new).map_err(|e| CliError::invalid_state(e.to_string()))?;
                Ok((old, new))
            })
            .collect()
    }

    /// Restore this state into an operation that has not run yet
    pub fn restore_into(&self, operation: &mut LoadOperation) -> Result<()> {
        let id_map = self.id_map()?;
        info!(
            stage = %self.state.stage,
            ids = id_map.len(),
            "Resuming load from saved state"
        );
        operation.restore(self.state.stage, id_map);
        Ok(())
    }
}

/// `<definition-stem>.state.yaml` next to the definition
pub fn state_path_for(definition_path: &Path) -> PathBuf {
    let stem = definition_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "amaxa".to_string());

    definition_path.with_file_name(format!("{}.state.yaml", stem))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_path_for_definition() {
        assert_eq!(
            state_path_for(Path::new("/data/extraction.yaml")),
            PathBuf::from("/data/extraction.state.yaml")
        );
        assert_eq!(
            state_path_for(Path::new("load.json")),
            PathBuf::from("load.state.yaml")
        );
    }

    #[test]
    fn test_state_file_format() {
        let state = StateFile {
            version: 1,
            state: SavedState {
                stage: LoadStage::DependentUpdates,
                id_map: BTreeMap::from([(
                    "001000000000001AAA".to_string(),
                    "001000000000002AAA".to_string(),
                )]),
            },
        };

        let yaml = serde_yaml::to_string(&state).unwrap();

        assert!(yaml.contains("stage: dependent-updates"));
        assert!(yaml.contains("id-map:"));
        let reparsed: StateFile = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed, state);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("load.state.yaml");
        fs::write(
            &path,
            "version: 1\nstate:\n  stage: inserts\n  id-map:\n    '001000000000001': '001000000000002AAA'\n",
        )
        .unwrap();

        let state = StateFile::load(&path).unwrap();
        let id_map = state.id_map().unwrap();

        assert_eq!(state.state.stage, LoadStage::Inserts);
        assert_eq!(
            id_map[&SalesforceId::new("001000000000001AAA").unwrap()].as_str(),
            "001000000000002AAA"
        );

        state.save(&path).unwrap();
        assert_eq!(StateFile::load(&path).unwrap(), state);
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        let state = StateFile {
            version: 1,
            state: SavedState {
                stage: LoadStage::Inserts,
                id_map: BTreeMap::from([("bogus".to_string(), "001000000000002AAA".to_string())]),
            },
        };

        assert!(matches!(state.id_map(), Err(CliError::InvalidState(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("load.state.yaml");
        fs::write(&path, "version: 2\nstate:\n  stage: inserts\n").unwrap();

        assert!(matches!(StateFile::load(&path), Err(CliError::InvalidState(_))));
    }
}
