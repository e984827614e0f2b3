//! Load engine
//!
//! Loads run in two phases. The insert phase walks the steps in order and
//! inserts every record with its descendent lookups already remapped to the
//! Ids created earlier in the run. Dependent lookups and self lookups cannot
//! be populated yet, so their values are kept aside and written by the
//! dependent-update phase once every record exists.

use crate::client::{SalesforceClient, WriteResult};
use crate::id::SalesforceId;
use crate::io::{Record, RecordSource, ResultLedger};
use crate::mapper::DataMapper;
use crate::operation::OperationContext;
use crate::schema::{FieldMap, SoapType};
use crate::step::{LookupClassification, OutsideLookupBehavior, ID_FIELD};
use amaxa_common::{AmaxaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Phase a load has reached; persisted so a failed load can be resumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStage {
    #[default]
    Inserts,
    DependentUpdates,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStage::Inserts => f.write_str("inserts"),
            LoadStage::DependentUpdates => f.write_str("dependent-updates"),
        }
    }
}

/// Normalize a Boolean literal to `true`/`false`
pub fn parse_boolean(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "no" | "false" | "n" | "f" | "0" | "" => Ok(false),
        "yes" | "true" | "y" | "t" | "1" => Ok(true),
        _ => Err(AmaxaError::InvalidBoolean(value.to_string())),
    }
}

/// Convert a raw value to what the insert API expects for the field's type.
/// `None` means the field is left out of the record.
pub fn coerce_value(soap_type: &SoapType, value: &str) -> Result<Option<String>> {
    match soap_type {
        SoapType::Boolean => parse_boolean(value).map(|b| Some(b.to_string())),
        _ if value.is_empty() => Ok(None),
        SoapType::Id
        | SoapType::String
        | SoapType::Date
        | SoapType::DateTime
        | SoapType::Time
        | SoapType::Int
        | SoapType::Long
        | SoapType::Double => Ok(Some(value.to_string())),
        SoapType::Other(_) => Ok(None),
    }
}

/// State shared by every step of a load
pub struct LoadState {
    context: OperationContext,
    id_map: HashMap<SalesforceId, SalesforceId>,
    inputs: HashMap<String, Box<dyn RecordSource>>,
    result_ledgers: HashMap<String, Box<dyn ResultLedger>>,
    mappers: HashMap<String, DataMapper>,
    stage: LoadStage,
}

impl LoadState {
    fn new(client: Arc<dyn SalesforceClient>) -> Self {
        Self {
            context: OperationContext::new(client),
            id_map: HashMap::new(),
            inputs: HashMap::new(),
            result_ledgers: HashMap::new(),
            mappers: HashMap::new(),
            stage: LoadStage::Inserts,
        }
    }

    /// Record the Id assigned to a loaded record. The first registration for
    /// an old Id wins.
    fn register_new_id(
        &mut self,
        sobject: &str,
        old_id: SalesforceId,
        new_id: SalesforceId,
    ) -> Result<()> {
        if let Some(existing) = self.id_map.get(&old_id) {
            warn!(
                "{}: {} is already mapped to {}; ignoring new Id {}",
                sobject, old_id, existing, new_id
            );
            return Ok(());
        }

        if let Some(ledger) = self.result_ledgers.get_mut(sobject) {
            ledger.write_result(&old_id, &new_id)?;
        }
        debug!(sobject, old_id = %old_id, new_id = %new_id, "Registered new Id");
        self.id_map.insert(old_id, new_id);
        Ok(())
    }

    fn get_new_id(&self, old_id: &SalesforceId) -> Option<&SalesforceId> {
        self.id_map.get(old_id)
    }

    fn flush_ledgers(&mut self) -> Result<()> {
        for ledger in self.result_ledgers.values_mut() {
            ledger.flush()?;
        }
        Ok(())
    }
}

/// An ordered set of load steps over distinct sObjects
pub struct LoadOperation {
    steps: Vec<LoadStep>,
    state: LoadState,
}

impl LoadOperation {
    pub fn new(client: Arc<dyn SalesforceClient>) -> Self {
        Self {
            steps: Vec::new(),
            state: LoadState::new(client),
        }
    }

    pub fn add_step(&mut self, step: LoadStep) -> Result<()> {
        self.state.context.add_sobject(&step.sobject)?;
        self.steps.push(step);
        Ok(())
    }

    pub fn steps(&self) -> &[LoadStep] {
        &self.steps
    }

    pub fn context(&self) -> &OperationContext {
        &self.state.context
    }

    pub fn context_mut(&mut self) -> &mut OperationContext {
        &mut self.state.context
    }

    pub fn set_input(&mut self, sobject: &str, source: Box<dyn RecordSource>) {
        self.state.inputs.insert(sobject.to_string(), source);
    }

    pub fn set_result_ledger(&mut self, sobject: &str, ledger: Box<dyn ResultLedger>) {
        self.state.result_ledgers.insert(sobject.to_string(), ledger);
    }

    pub fn set_mapper(&mut self, sobject: &str, mapper: DataMapper) {
        self.state.mappers.insert(sobject.to_string(), mapper);
    }

    pub fn mapper(&self, sobject: &str) -> Option<&DataMapper> {
        self.state.mappers.get(sobject)
    }

    pub fn register_new_id(
        &mut self,
        sobject: &str,
        old_id: SalesforceId,
        new_id: SalesforceId,
    ) -> Result<()> {
        self.state.register_new_id(sobject, old_id, new_id)
    }

    pub fn get_new_id(&self, old_id: &SalesforceId) -> Option<&SalesforceId> {
        self.state.get_new_id(old_id)
    }

    pub fn id_map(&self) -> &HashMap<SalesforceId, SalesforceId> {
        &self.state.id_map
    }

    pub fn stage(&self) -> LoadStage {
        self.state.stage
    }

    /// Restore the progress of an earlier, failed run of the same load.
    pub fn restore(&mut self, stage: LoadStage, id_map: HashMap<SalesforceId, SalesforceId>) {
        info!(
            "Resuming load at stage {} with {} mapped Ids",
            stage,
            id_map.len()
        );
        self.state.stage = stage;
        self.state.id_map = id_map;
    }

    /// Run both phases, stopping at the first step with errors.
    pub async fn execute(&mut self) -> Result<()> {
        info!(
            "Starting load of {}",
            self.state.context.sobject_list().join(", ")
        );
        self.state.context.prepare().await?;
        for step in self.steps.iter_mut() {
            step.scan_fields(&self.state.context)?;
        }

        for step in self.steps.iter_mut() {
            info!("{}: loading records", step.sobject);
            let result = step.execute_inserts(&mut self.state).await;
            self.state.flush_ledgers()?;
            result?;
            step.check_errors("load")?;
        }
        self.state.stage = LoadStage::DependentUpdates;

        for step in self.steps.iter_mut() {
            info!("{}: populating dependent and self-lookups", step.sobject);
            step.execute_dependent_updates(&mut self.state).await?;
            step.check_errors("dependent updates")?;
        }

        info!("Load complete");
        Ok(())
    }
}

impl fmt::Debug for LoadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOperation")
            .field("steps", &self.steps)
            .field("stage", &self.state.stage)
            .field("mapped_ids", &self.state.id_map.len())
            .finish()
    }
}

/// Load of a single sObject
#[derive(Debug, Clone)]
pub struct LoadStep {
    sobject: String,
    field_scope: BTreeSet<String>,
    outside_lookup_behavior: OutsideLookupBehavior,
    outside_lookup_overrides: HashMap<String, OutsideLookupBehavior>,
    lookups: LookupClassification,
    dependent_lookup_records: Vec<Record>,
    errors: Vec<String>,
}

impl LoadStep {
    pub fn new<I, S>(sobject: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut field_scope: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        field_scope.insert(ID_FIELD.to_string());

        Self {
            sobject: sobject.into(),
            field_scope,
            outside_lookup_behavior: OutsideLookupBehavior::Include,
            outside_lookup_overrides: HashMap::new(),
            lookups: LookupClassification::default(),
            dependent_lookup_records: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_outside_lookup_behavior(mut self, behavior: OutsideLookupBehavior) -> Self {
        self.outside_lookup_behavior = behavior;
        self
    }

    pub fn set_outside_lookup_behavior_for_field(
        &mut self,
        field: &str,
        behavior: OutsideLookupBehavior,
    ) {
        self.outside_lookup_overrides
            .insert(field.to_string(), behavior);
    }

    pub fn outside_lookup_behavior_for_field(&self, field: &str) -> OutsideLookupBehavior {
        self.outside_lookup_overrides
            .get(field)
            .copied()
            .unwrap_or(self.outside_lookup_behavior)
    }

    pub fn sobject(&self) -> &str {
        &self.sobject
    }

    pub fn field_scope(&self) -> &BTreeSet<String> {
        &self.field_scope
    }

    pub fn lookups(&self) -> &LookupClassification {
        &self.lookups
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Records queued for the dependent-update phase
    pub fn dependent_lookup_records(&self) -> &[Record] {
        &self.dependent_lookup_records
    }

    pub fn scan_fields(&mut self, context: &OperationContext) -> Result<()> {
        self.lookups = context.classify(&self.sobject, &self.field_scope)?;
        Ok(())
    }

    fn check_errors(&self, phase: &str) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        for message in &self.errors {
            error!(sobject = %self.sobject, "{}", message);
        }
        Err(AmaxaError::step_failed(
            &self.sobject,
            phase,
            self.errors.clone(),
        ))
    }

    /// Remap a lookup value through the old -> new Id map. `Ok(None)` drops
    /// the field.
    fn value_for_lookup(
        &self,
        state: &LoadState,
        field: &str,
        value: &str,
        record_id: &SalesforceId,
    ) -> std::result::Result<Option<String>, String> {
        if value.trim().is_empty() {
            return Ok(None);
        }
        let old_id = SalesforceId::new(value)
            .map_err(|e| format!("Bad data in record {}: {}", record_id, e))?;

        if let Some(new_id) = state.get_new_id(&old_id) {
            return Ok(Some(new_id.to_string()));
        }

        match self.outside_lookup_behavior_for_field(field) {
            OutsideLookupBehavior::Include => Ok(Some(value.to_string())),
            OutsideLookupBehavior::DropField => Ok(None),
            OutsideLookupBehavior::Error => Err(format!(
                "{} {} has an outside reference in field {} ({}), which is not allowed by the extraction configuration.",
                self.sobject, record_id, field, value
            )),
        }
    }

    /// Turn one input record into the record to insert.
    fn prepare_insert(
        &self,
        state: &LoadState,
        field_map: &FieldMap,
        deferred: &BTreeSet<String>,
        original_id: &SalesforceId,
        record: Record,
    ) -> std::result::Result<Record, String> {
        let mut prepared = Record::new();

        for (field, value) in record {
            if field == ID_FIELD || deferred.contains(&field) || !self.field_scope.contains(&field)
            {
                continue;
            }

            let value = if self.lookups.descendent_lookups.contains(&field) {
                match self.value_for_lookup(state, &field, &value, original_id)? {
                    Some(value) => value,
                    None => continue,
                }
            } else {
                value
            };

            let descriptor = field_map.get(&field).ok_or_else(|| {
                format!(
                    "Field {}.{} does not exist or is not visible.",
                    self.sobject, field
                )
            })?;
            match coerce_value(&descriptor.soap_type, &value) {
                Ok(Some(value)) => {
                    prepared.insert(field, value);
                },
                Ok(None) => {},
                Err(e) => return Err(format!("Bad data in record {}: {}", original_id, e)),
            }
        }

        Ok(prepared)
    }

    async fn execute_inserts(&mut self, state: &mut LoadState) -> Result<()> {
        let records = state
            .inputs
            .get_mut(&self.sobject)
            .ok_or_else(|| {
                AmaxaError::config(format!("No input configured for sObject {}", self.sobject))
            })?
            .read_records()?;
        let field_map = state.context.schema().field_map(&self.sobject)?.clone();
        let deferred = self.lookups.deferred_lookups();

        let mut to_insert = Vec::new();
        let mut original_ids = Vec::new();
        let mut skipped = 0usize;

        for record in records {
            let record = match state.mappers.get(&self.sobject) {
                Some(mapper) => mapper.transform_record(record),
                None => record,
            };
            let raw_id = record.get(ID_FIELD).cloned().unwrap_or_default();
            let original_id = match SalesforceId::new(&raw_id) {
                Ok(id) => id,
                Err(e) => {
                    self.errors
                        .push(format!("Bad data in record {}: {}", raw_id, e));
                    continue;
                },
            };

            let has_deferred_values = deferred
                .iter()
                .any(|f| record.get(f).is_some_and(|v| !v.trim().is_empty()));
            if has_deferred_values {
                let mut snapshot: Record = deferred
                    .iter()
                    .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                snapshot.insert(ID_FIELD.to_string(), original_id.to_string());
                self.dependent_lookup_records.push(snapshot);
            }

            if state.stage == LoadStage::DependentUpdates || state.get_new_id(&original_id).is_some()
            {
                skipped += 1;
                continue;
            }

            match self.prepare_insert(state, &field_map, &deferred, &original_id, record) {
                Ok(prepared) => {
                    to_insert.push(prepared);
                    original_ids.push(original_id);
                },
                Err(message) => self.errors.push(message),
            }
        }

        if skipped > 0 {
            info!("{}: {} records were loaded by an earlier run", self.sobject, skipped);
        }
        if !self.errors.is_empty() || to_insert.is_empty() {
            return Ok(());
        }

        debug!(sobject = %self.sobject, count = to_insert.len(), "Inserting records");
        let results = state.context.proxy(&self.sobject).insert(to_insert).await?;
        let unanswered = unanswered_ids(&original_ids, results.len());

        for (original_id, result) in original_ids.into_iter().zip(results) {
            match new_id_from(&result) {
                Some(new_id) => state.register_new_id(&self.sobject, original_id, new_id)?,
                None => self.errors.push(format!(
                    "Failed to load {} {}: {}",
                    self.sobject,
                    original_id,
                    describe_failure(&result)
                )),
            }
        }
        for original_id in unanswered {
            self.errors.push(format!(
                "Failed to load {} {}: no result was returned for the record",
                self.sobject, original_id
            ));
        }

        Ok(())
    }

    async fn execute_dependent_updates(&mut self, state: &mut LoadState) -> Result<()> {
        if self.dependent_lookup_records.is_empty() {
            return Ok(());
        }

        let mut to_update = Vec::new();
        let mut original_ids = Vec::new();

        for snapshot in &self.dependent_lookup_records {
            let raw_id = snapshot.get(ID_FIELD).cloned().unwrap_or_default();
            let original_id = match SalesforceId::new(&raw_id) {
                Ok(id) => id,
                Err(e) => {
                    self.errors
                        .push(format!("Bad data in record {}: {}", raw_id, e));
                    continue;
                },
            };

            let mut update = Record::new();
            for (field, value) in snapshot {
                if field == ID_FIELD {
                    continue;
                }
                match self.value_for_lookup(state, field, value, &original_id) {
                    Ok(Some(value)) => {
                        update.insert(field.clone(), value);
                    },
                    Ok(None) => {},
                    Err(message) => self.errors.push(message),
                }
            }

            if update.is_empty() {
                continue;
            }

            match state.get_new_id(&original_id) {
                Some(new_id) => {
                    update.insert(ID_FIELD.to_string(), new_id.to_string());
                    to_update.push(update);
                    original_ids.push(original_id);
                },
                None => self.errors.push(format!(
                    "Failed to execute dependent updates for {} {}: the record was not loaded",
                    self.sobject, original_id
                )),
            }
        }

        if !self.errors.is_empty() || to_update.is_empty() {
            return Ok(());
        }

        debug!(sobject = %self.sobject, count = to_update.len(), "Updating records");
        let results = state.context.proxy(&self.sobject).update(to_update).await?;
        let unanswered = unanswered_ids(&original_ids, results.len());

        for (original_id, result) in original_ids.into_iter().zip(results) {
            if !result.success {
                self.errors.push(format!(
                    "Failed to execute dependent updates for {} {}: {}",
                    self.sobject,
                    original_id,
                    describe_failure(&result)
                ));
            }
        }
        for original_id in unanswered {
            self.errors.push(format!(
                "Failed to execute dependent updates for {} {}: no result was returned for the record",
                self.sobject, original_id
            ));
        }

        Ok(())
    }
}

/// Submitted Ids past the end of a short result list
fn unanswered_ids(submitted: &[SalesforceId], returned: usize) -> Vec<SalesforceId> {
    submitted.get(returned..).map(<[_]>::to_vec).unwrap_or_default()
}

fn new_id_from(result: &WriteResult) -> Option<SalesforceId> {
    if !result.success {
        return None;
    }
    result
        .id
        .as_deref()
        .and_then(|id| SalesforceId::new(id).ok())
}

fn describe_failure(result: &WriteResult) -> String {
    if result.errors.is_empty() {
        "no error details returned".to_string()
    } else {
        result.errors.join("; ")
    }
}
