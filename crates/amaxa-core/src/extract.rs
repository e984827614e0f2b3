//! Extraction engine
//!
//! An [`ExtractOperation`] runs its steps in order. Each step pulls the records
//! its scope selects, follows the step's lookups, and hands every record to a
//! shared store that writes it to the sObject's sink exactly once. Records
//! referenced by later sObjects are registered as dependencies and picked up
//! when those sObjects' steps run.

use crate::client::SalesforceClient;
use crate::id::SalesforceId;
use crate::io::{Record, RecordSink};
use crate::mapper::DataMapper;
use crate::operation::OperationContext;
use crate::step::{
    ExtractionScope, LookupClassification, OutsideLookupBehavior, SelfLookupBehavior, ID_FIELD,
};
use amaxa_common::{AmaxaError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upper bound on the length of a generated `IN (...)` filter clause
pub const MAX_FILTER_LENGTH: usize = 4000;

/// Build `field IN ('id', ...)` clauses that each fit in [`MAX_FILTER_LENGTH`].
///
/// Ids are packed greedily in iteration order.
pub fn id_filter_clauses<'a, I>(field: &str, ids: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a SalesforceId>,
{
    let prefix = format!("{} IN (", field);
    let budget = MAX_FILTER_LENGTH.saturating_sub(prefix.len() + 1);
    let mut clauses = Vec::new();
    let mut current = String::new();

    for id in ids {
        let quoted = format!("'{}'", id);
        let separator = if current.is_empty() { 0 } else { 2 };

        if !current.is_empty() && current.len() + separator + quoted.len() > budget {
            clauses.push(format!("{}{})", prefix, current));
            current.clear();
        }
        if !current.is_empty() {
            current.push_str(", ");
        }
        current.push_str(&quoted);
    }

    if !current.is_empty() {
        clauses.push(format!("{}{})", prefix, current));
    }

    clauses
}

/// Per-sObject sets of extracted and still-required Ids.
///
/// After every store the two sets of an sObject are disjoint.
#[derive(Debug, Default)]
pub struct ExtractionLedger {
    extracted: HashMap<String, HashSet<SalesforceId>>,
    required: HashMap<String, HashSet<SalesforceId>>,
}

impl ExtractionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an Id as required. Returns false if it was already extracted or
    /// already required.
    pub fn add_dependency(&mut self, sobject: &str, id: SalesforceId) -> bool {
        if self.is_extracted(sobject, &id) {
            return false;
        }
        self.required
            .entry(sobject.to_string())
            .or_default()
            .insert(id)
    }

    /// Ids registered for `sobject` and not yet extracted
    pub fn dependencies(&self, sobject: &str) -> HashSet<SalesforceId> {
        self.required.get(sobject).cloned().unwrap_or_default()
    }

    pub fn is_extracted(&self, sobject: &str, id: &SalesforceId) -> bool {
        self.extracted
            .get(sobject)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Move an Id into the extracted set. Returns true the first time only.
    pub fn record_extracted(&mut self, sobject: &str, id: SalesforceId) -> bool {
        if let Some(required) = self.required.get_mut(sobject) {
            required.remove(&id);
        }
        self.extracted
            .entry(sobject.to_string())
            .or_default()
            .insert(id)
    }

    pub fn extracted_count(&self, sobject: &str) -> usize {
        self.extracted.get(sobject).map_or(0, HashSet::len)
    }

    pub fn extracted_ids(&self, sobject: &str) -> HashSet<SalesforceId> {
        self.extracted.get(sobject).cloned().unwrap_or_default()
    }

    /// Union of the extracted Ids of every target of a reference field
    pub fn ids_for_reference(&self, targets: &[String]) -> HashSet<SalesforceId> {
        targets
            .iter()
            .filter_map(|t| self.extracted.get(t))
            .flat_map(|ids| ids.iter().cloned())
            .collect()
    }
}

/// State shared by every step of an extraction
pub struct ExtractionState {
    context: OperationContext,
    ledger: ExtractionLedger,
    outputs: HashMap<String, Box<dyn RecordSink>>,
    mappers: HashMap<String, DataMapper>,
}

impl ExtractionState {
    fn new(client: Arc<dyn SalesforceClient>) -> Self {
        Self {
            context: OperationContext::new(client),
            ledger: ExtractionLedger::new(),
            outputs: HashMap::new(),
            mappers: HashMap::new(),
        }
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn ledger(&self) -> &ExtractionLedger {
        &self.ledger
    }

    /// Write a record once per Id, clearing the Id from the required set.
    fn store_result(&mut self, sobject: &str, id: SalesforceId, record: Record) -> Result<()> {
        if !self.ledger.record_extracted(sobject, id.clone()) {
            return Ok(());
        }
        debug!(sobject, id = %id, "Storing record");

        let record = match self.mappers.get(sobject) {
            Some(mapper) => mapper.transform_record(record),
            None => record,
        };
        let sink = self.outputs.get_mut(sobject).ok_or_else(|| {
            AmaxaError::config(format!("No output configured for sObject {}", sobject))
        })?;
        sink.write_record(&record)
    }

    fn flush_outputs(&mut self) -> Result<()> {
        for sink in self.outputs.values_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}

/// An ordered set of extraction steps over distinct sObjects
pub struct ExtractOperation {
    steps: Vec<ExtractionStep>,
    state: ExtractionState,
}

impl ExtractOperation {
    pub fn new(client: Arc<dyn SalesforceClient>) -> Self {
        Self {
            steps: Vec::new(),
            state: ExtractionState::new(client),
        }
    }

    pub fn add_step(&mut self, step: ExtractionStep) -> Result<()> {
        self.state.context.add_sobject(&step.sobject)?;
        self.steps.push(step);
        Ok(())
    }

    pub fn steps(&self) -> &[ExtractionStep] {
        &self.steps
    }

    pub fn context(&self) -> &OperationContext {
        &self.state.context
    }

    pub fn context_mut(&mut self) -> &mut OperationContext {
        &mut self.state.context
    }

    pub fn ledger(&self) -> &ExtractionLedger {
        &self.state.ledger
    }

    pub fn set_output(&mut self, sobject: &str, sink: Box<dyn RecordSink>) {
        self.state.outputs.insert(sobject.to_string(), sink);
    }

    pub fn set_mapper(&mut self, sobject: &str, mapper: DataMapper) {
        self.state.mappers.insert(sobject.to_string(), mapper);
    }

    pub fn mapper(&self, sobject: &str) -> Option<&DataMapper> {
        self.state.mappers.get(sobject)
    }

    /// Require a record to be extracted when its sObject's step runs
    pub fn add_dependency(&mut self, sobject: &str, id: SalesforceId) {
        self.state.ledger.add_dependency(sobject, id);
    }

    pub fn dependencies(&self, sobject: &str) -> HashSet<SalesforceId> {
        self.state.ledger.dependencies(sobject)
    }

    pub fn extracted_ids(&self, sobject: &str) -> HashSet<SalesforceId> {
        self.state.ledger.extracted_ids(sobject)
    }

    /// Run every step in order, stopping at the first step with errors.
    pub async fn execute(&mut self) -> Result<()> {
        info!(
            "Starting extraction of {}",
            self.state.context.sobject_list().join(", ")
        );
        self.state.context.prepare().await?;

        for step in self.steps.iter_mut() {
            info!("{}: extracting", step.sobject);
            let result = step.execute(&mut self.state).await;
            self.state.flush_outputs()?;
            result?;

            if !step.errors.is_empty() {
                for message in &step.errors {
                    error!(sobject = %step.sobject, "{}", message);
                }
                return Err(AmaxaError::step_failed(
                    &step.sobject,
                    "extraction",
                    step.errors.clone(),
                ));
            }

            info!(
                "{}: extracted {} records",
                step.sobject,
                self.state.ledger.extracted_count(&step.sobject)
            );
        }

        info!("Extraction complete");
        Ok(())
    }
}

impl std::fmt::Debug for ExtractOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractOperation")
            .field("steps", &self.steps)
            .field("context", &self.state.context)
            .finish()
    }
}

/// Extraction of a single sObject
#[derive(Debug, Clone)]
pub struct ExtractionStep {
    sobject: String,
    scope: ExtractionScope,
    field_scope: BTreeSet<String>,
    where_clause: Option<String>,
    self_lookup_behavior: SelfLookupBehavior,
    outside_lookup_behavior: OutsideLookupBehavior,
    self_lookup_overrides: HashMap<String, SelfLookupBehavior>,
    outside_lookup_overrides: HashMap<String, OutsideLookupBehavior>,
    lookups: LookupClassification,
    queried_parents: HashMap<String, HashSet<SalesforceId>>,
    errors: Vec<String>,
}

impl ExtractionStep {
    pub fn new<I, S>(sobject: impl Into<String>, scope: ExtractionScope, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut field_scope: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        field_scope.insert(ID_FIELD.to_string());

        Self {
            sobject: sobject.into(),
            scope,
            field_scope,
            where_clause: None,
            self_lookup_behavior: SelfLookupBehavior::TraceAll,
            outside_lookup_behavior: OutsideLookupBehavior::Include,
            self_lookup_overrides: HashMap::new(),
            outside_lookup_overrides: HashMap::new(),
            lookups: LookupClassification::default(),
            queried_parents: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_where_clause(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = Some(where_clause.into());
        self
    }

    pub fn with_self_lookup_behavior(mut self, behavior: SelfLookupBehavior) -> Self {
        self.self_lookup_behavior = behavior;
        self
    }

    pub fn with_outside_lookup_behavior(mut self, behavior: OutsideLookupBehavior) -> Self {
        self.outside_lookup_behavior = behavior;
        self
    }

    pub fn set_self_lookup_behavior_for_field(&mut self, field: &str, behavior: SelfLookupBehavior) {
        self.self_lookup_overrides.insert(field.to_string(), behavior);
    }

    pub fn set_outside_lookup_behavior_for_field(
        &mut self,
        field: &str,
        behavior: OutsideLookupBehavior,
    ) {
        self.outside_lookup_overrides
            .insert(field.to_string(), behavior);
    }

    pub fn self_lookup_behavior_for_field(&self, field: &str) -> SelfLookupBehavior {
        self.self_lookup_overrides
            .get(field)
            .copied()
            .unwrap_or(self.self_lookup_behavior)
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

    pub fn scope(&self) -> ExtractionScope {
        self.scope
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

    fn field_list(&self) -> String {
        self.field_scope
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn traced_self_lookups(&self) -> Vec<String> {
        self.lookups
            .self_lookups
            .iter()
            .filter(|f| self.self_lookup_behavior_for_field(f) == SelfLookupBehavior::TraceAll)
            .cloned()
            .collect()
    }

    /// Classify this step's lookups against the operation.
    pub fn scan_fields(&mut self, context: &OperationContext) -> Result<()> {
        self.lookups = context.classify(&self.sobject, &self.field_scope)?;
        Ok(())
    }

    async fn execute(&mut self, state: &mut ExtractionState) -> Result<()> {
        self.scan_fields(&state.context)?;

        match self.scope {
            ExtractionScope::AllRecords => {
                let query = format!("SELECT {} FROM {}", self.field_list(), self.sobject);
                return self.perform_bulk_api_pass(state, &query).await;
            },
            ExtractionScope::Query => {
                let where_clause = self.where_clause.as_deref().ok_or_else(|| {
                    AmaxaError::config(format!(
                        "A query extraction of {} requires a filter clause",
                        self.sobject
                    ))
                })?;
                let query = format!(
                    "SELECT {} FROM {} WHERE {}",
                    self.field_list(),
                    self.sobject,
                    where_clause
                );
                self.perform_bulk_api_pass(state, &query).await?;
            },
            ExtractionScope::Descendents => {
                let fields: Vec<String> = self.lookups.descendent_lookups.iter().cloned().collect();
                for field in fields {
                    self.perform_lookup_pass(state, &field).await?;
                }
            },
            ExtractionScope::SelectedRecords => {},
        }

        self.resolve_registered_dependencies(state).await?;

        let traced = self.traced_self_lookups();
        if traced.is_empty() {
            return Ok(());
        }

        loop {
            if !self.errors.is_empty() {
                break;
            }
            let before = state.ledger.extracted_count(&self.sobject);

            for field in &traced {
                self.perform_lookup_pass(state, field).await?;
            }
            self.resolve_registered_dependencies(state).await?;

            let after = state.ledger.extracted_count(&self.sobject);
            debug!(sobject = %self.sobject, before, after, "Self-lookup iteration");
            if after == before {
                break;
            }
        }

        Ok(())
    }

    async fn perform_bulk_api_pass(&mut self, state: &mut ExtractionState, query: &str) -> Result<()> {
        debug!(sobject = %self.sobject, query, "Bulk query");
        let records = state.context.proxy(&self.sobject).bulk_query(query).await?;
        for record in records {
            self.store_result(state, record)?;
        }
        Ok(())
    }

    async fn perform_id_field_pass(
        &mut self,
        state: &mut ExtractionState,
        id_field: &str,
        ids: &HashSet<SalesforceId>,
    ) -> Result<()> {
        let mut ids: Vec<&SalesforceId> = ids.iter().collect();
        ids.sort();

        for clause in id_filter_clauses(id_field, ids) {
            let query = format!(
                "SELECT {} FROM {} WHERE {}",
                self.field_list(),
                self.sobject,
                clause
            );
            let records = state.context.query_all(&query).await?;
            for record in records {
                self.store_result(state, record)?;
            }
        }
        Ok(())
    }

    /// Query records whose `field` points at an extracted record not yet used
    /// for this field.
    async fn perform_lookup_pass(&mut self, state: &mut ExtractionState, field: &str) -> Result<()> {
        let candidates = state.ledger.ids_for_reference(self.lookups.targets(field));
        let queried = self.queried_parents.entry(field.to_string()).or_default();
        let frontier: HashSet<SalesforceId> = candidates
            .into_iter()
            .filter(|id| queried.insert(id.clone()))
            .collect();

        if frontier.is_empty() {
            return Ok(());
        }
        self.perform_id_field_pass(state, field, &frontier).await
    }

    async fn resolve_registered_dependencies(&mut self, state: &mut ExtractionState) -> Result<()> {
        let pending = state.ledger.dependencies(&self.sobject);
        if pending.is_empty() {
            return Ok(());
        }

        self.perform_id_field_pass(state, ID_FIELD, &pending).await?;

        let remaining = state.ledger.dependencies(&self.sobject);
        let mut missing: Vec<String> = pending
            .intersection(&remaining)
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            self.errors.push(format!(
                "Unable to resolve dependencies for sObject {}. The following Ids could not be found: {}",
                self.sobject,
                missing.join(", ")
            ));
        }
        Ok(())
    }

    /// Resolve which sObject a reference value points at
    fn reference_target(
        &self,
        context: &OperationContext,
        field: &str,
        id: &SalesforceId,
    ) -> std::result::Result<String, String> {
        let targets = self.lookups.targets(field);
        if targets.len() == 1 {
            return Ok(targets[0].clone());
        }
        context
            .sobject_for_id(id)
            .map(str::to_string)
            .map_err(|e| format!("{} {}: field {}: {}", self.sobject, id, field, e))
    }

    fn store_result(&mut self, state: &mut ExtractionState, mut record: Record) -> Result<()> {
        let raw_id = record.get(ID_FIELD).cloned().unwrap_or_default();
        let id = match SalesforceId::new(&raw_id) {
            Ok(id) => id,
            Err(e) => {
                self.errors
                    .push(format!("{} record has an invalid Id: {}", self.sobject, e));
                return Ok(());
            },
        };
        let own_position = state.context.position(&self.sobject);
        let mut errors = Vec::new();

        for field in &self.lookups.self_lookups {
            if self.self_lookup_behavior_for_field(field) == SelfLookupBehavior::TraceNone {
                continue;
            }
            let Some(target_id) = lookup_value(&record, field, &self.sobject, &id, &mut errors)
            else {
                continue;
            };
            match self.reference_target(&state.context, field, &target_id) {
                Ok(target) if target == self.sobject => {
                    state.ledger.add_dependency(&self.sobject, target_id);
                },
                Ok(_) => {},
                Err(message) => errors.push(message),
            }
        }

        for field in &self.lookups.dependent_lookups {
            let Some(target_id) = lookup_value(&record, field, &self.sobject, &id, &mut errors)
            else {
                continue;
            };
            match self.reference_target(&state.context, field, &target_id) {
                Ok(target) => {
                    let position = state.context.position(&target);
                    if position.is_some() && position > own_position {
                        state.ledger.add_dependency(&target, target_id);
                    }
                },
                Err(message) => errors.push(message),
            }
        }

        let mut dropped = Vec::new();
        for field in &self.lookups.descendent_lookups {
            let Some(target_id) = lookup_value(&record, field, &self.sobject, &id, &mut errors)
            else {
                continue;
            };
            let target = match self.reference_target(&state.context, field, &target_id) {
                Ok(target) => target,
                Err(message) => {
                    errors.push(message);
                    continue;
                },
            };
            match state.context.position(&target) {
                None => {
                    warn!(
                        "{} {}: field {} references {} {}, which is not part of this extraction",
                        self.sobject, id, field, target, target_id
                    );
                    continue;
                },
                Some(position) if Some(position) >= own_position => continue,
                Some(_) => {},
            }

            if state.ledger.is_extracted(&target, &target_id) {
                continue;
            }
            match self.outside_lookup_behavior_for_field(field) {
                OutsideLookupBehavior::DropField => dropped.push(field.clone()),
                OutsideLookupBehavior::Include => {},
                OutsideLookupBehavior::Error => {
                    errors.push(format!(
                        "{} {} has an outside reference in field {} ({}), which is not allowed by the extraction configuration.",
                        self.sobject, id, field, target_id
                    ));
                },
            }
        }

        if !errors.is_empty() {
            self.errors.extend(errors);
            return Ok(());
        }

        for field in dropped {
            record.remove(&field);
        }
        state.store_result(&self.sobject, id, record)
    }
}

/// Parse a non-empty lookup value, recording a per-record error if it is
/// not a valid Id.
fn lookup_value(
    record: &Record,
    field: &str,
    sobject: &str,
    id: &SalesforceId,
    errors: &mut Vec<String>,
) -> Option<SalesforceId> {
    let value = record.get(field).map(|v| v.trim()).filter(|v| !v.is_empty())?;
    match SalesforceId::new(value) {
        Ok(target) => Some(target),
        Err(e) => {
            errors.push(format!("Bad data in record {} {}: field {}: {}", sobject, id, field, e));
            None
        },
    }
}
