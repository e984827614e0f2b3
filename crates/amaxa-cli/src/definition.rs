//! Operation definition files
//!
//! A definition lists the sObjects of an operation in order, the fields of
//! each, and how each is extracted:
//!
//! ```yaml
//! version: 1
//! operation:
//!   - sobject: Account
//!     field-group: readable
//!     extract:
//!       all: true
//!   - sobject: Contact
//!     fields:
//!       - LastName
//!       - field: ReportsToId
//!         column: Reports To
//!         self-lookup-behavior: trace-none
//!     extract:
//!       descendents: true
//! ```
//!
//! Validation collects every problem it finds before failing, so a single run
//! reports all of them.

use crate::config::read_document;
use crate::error::{CliError, Result};
use amaxa_core::client::SalesforceClient;
use amaxa_core::extract::{ExtractOperation, ExtractionStep};
use amaxa_core::id::SalesforceId;
use amaxa_core::io::{CsvRecordSink, CsvRecordSource, CsvResultLedger};
use amaxa_core::load::{LoadOperation, LoadStep};
use amaxa_core::mapper::{DataMapper, Transform};
use amaxa_core::operation::OperationContext;
use amaxa_core::schema::{FieldDescriptor, FieldMap, FieldType};
use amaxa_core::step::{
    ExtractionScope, LookupClassification, OutsideLookupBehavior, SelfLookupBehavior, ID_FIELD,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Only supported definition file version
pub const DEFINITION_VERSION: u32 = 1;

// ============================================================================
// File Format
// ============================================================================

/// Parsed operation definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDefinition {
    pub version: Option<u32>,
    #[serde(default)]
    pub operation: Vec<StepDefinition>,
}

/// One sObject of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StepDefinition {
    pub sobject: String,
    pub fields: Option<Vec<FieldEntry>>,
    pub field_group: Option<FieldGroup>,
    pub extract: Option<ExtractDefinition>,
    pub self_lookup_behavior: Option<SelfLookupBehavior>,
    pub outside_lookup_behavior: Option<OutsideLookupBehavior>,
    pub file: Option<PathBuf>,
    pub result_file: Option<PathBuf>,
}

/// A field given by name alone or with column mapping and options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldEntry {
    Name(String),
    Detailed(FieldDefinition),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FieldDefinition {
    pub field: String,
    pub column: Option<String>,
    #[serde(default)]
    pub transforms: Vec<String>,
    pub self_lookup_behavior: Option<String>,
    pub outside_lookup_behavior: Option<String>,
}

impl FieldEntry {
    pub fn definition(&self) -> FieldDefinition {
        match self {
            FieldEntry::Name(field) => FieldDefinition {
                field: field.clone(),
                ..FieldDefinition::default()
            },
            FieldEntry::Detailed(definition) => definition.clone(),
        }
    }
}

/// Named sets of fields taken from describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldGroup {
    Readable,
    Writeable,
}

impl FieldGroup {
    pub fn includes(self, field: &FieldDescriptor) -> bool {
        if field.field_type.is_compound() || field.field_type == FieldType::Base64 {
            return false;
        }
        match self {
            FieldGroup::Readable => true,
            FieldGroup::Writeable => field.createable || field.name == ID_FIELD,
        }
    }
}

/// How an extraction step selects records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractDefinition {
    pub all: Option<bool>,
    pub query: Option<String>,
    pub descendents: Option<bool>,
    pub ids: Option<Vec<String>>,
}

impl ExtractDefinition {
    /// The single selected mode, if exactly one is set
    pub fn scope(&self) -> Option<ExtractionScope> {
        let mut modes = Vec::new();
        if self.all == Some(true) {
            modes.push(ExtractionScope::AllRecords);
        }
        if self.query.is_some() {
            modes.push(ExtractionScope::Query);
        }
        if self.descendents == Some(true) {
            modes.push(ExtractionScope::Descendents);
        }
        if self.ids.is_some() {
            modes.push(ExtractionScope::SelectedRecords);
        }

        match modes.as_slice() {
            [scope] => Some(*scope),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Extract,
    Load,
}

impl OperationDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path)
    }

    /// Checks that need no org access
    pub fn structural_errors(&self, kind: OperationKind) -> Vec<String> {
        let mut errors = Vec::new();

        match self.version {
            None => errors.push("version: required field".to_string()),
            Some(DEFINITION_VERSION) => {},
            Some(other) => errors.push(format!("version: unsupported version {}", other)),
        }

        if self.operation.is_empty() {
            errors.push("operation: at least one step is required".to_string());
        }

        let mut seen = HashSet::new();
        for step in &self.operation {
            if !seen.insert(step.sobject.as_str()) {
                errors.push(format!(
                    "sObject {} is present more than once in the operation definition.",
                    step.sobject
                ));
            }

            if step.fields.is_some() == step.field_group.is_some() {
                errors.push(format!(
                    "Step for sObject {} must specify exactly one of fields or field-group.",
                    step.sobject
                ));
            }

            if kind == OperationKind::Extract
                && step.extract.as_ref().and_then(ExtractDefinition::scope).is_none()
            {
                errors.push(format!(
                    "Step for sObject {} must specify exactly one extraction mode: all, query, descendents or ids.",
                    step.sobject
                ));
            }
        }

        errors
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// A validated step with its field scope and file locations
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    pub sobject: String,
    pub field_scope: BTreeSet<String>,
    /// field -> column
    pub columns: BTreeMap<String, String>,
    /// Transforms keyed by field
    pub transforms: HashMap<String, Vec<Transform>>,
    pub scope: Option<ExtractionScope>,
    pub where_clause: Option<String>,
    pub ids: Vec<SalesforceId>,
    pub self_lookup_behavior: SelfLookupBehavior,
    pub outside_lookup_behavior: OutsideLookupBehavior,
    pub field_self_behaviors: BTreeMap<String, SelfLookupBehavior>,
    pub field_outside_behaviors: BTreeMap<String, OutsideLookupBehavior>,
    pub file: PathBuf,
    pub result_file: PathBuf,
    pub warnings: Vec<String>,
}

impl ResolvedStep {
    pub fn column_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }

    /// CSV columns in field order
    pub fn output_columns(&self) -> Vec<String> {
        self.field_scope
            .iter()
            .map(|f| self.column_for(f).to_string())
            .collect()
    }

    /// Renames fields to columns on the way out
    pub fn extract_mapper(&self) -> DataMapper {
        let renames = self
            .columns
            .iter()
            .filter(|(field, column)| field != column)
            .map(|(field, column)| (field.clone(), column.clone()))
            .collect();

        DataMapper::new(renames, self.transforms.clone())
    }

    /// Renames columns to fields on the way in; transforms are keyed by column
    pub fn load_mapper(&self) -> DataMapper {
        let renames = self
            .columns
            .iter()
            .filter(|(field, column)| field != column)
            .map(|(field, column)| (column.clone(), field.clone()))
            .collect();
        let transforms = self
            .transforms
            .iter()
            .map(|(field, t)| (self.column_for(field).to_string(), t.clone()))
            .collect();

        DataMapper::new(renames, transforms)
    }
}

/// Field entry awaiting lookup behavior validation
struct PendingBehaviors {
    field: String,
    self_lookup_behavior: Option<String>,
    outside_lookup_behavior: Option<String>,
}

/// Validate a definition against the org and resolve every step.
///
/// Describes are loaded into `context`, so the operation built afterwards
/// does not fetch them again.
pub async fn resolve_steps(
    definition: &OperationDefinition,
    kind: OperationKind,
    base_dir: &Path,
    context: &mut OperationContext,
) -> Result<Vec<ResolvedStep>> {
    let mut errors = definition.structural_errors(kind);
    if !errors.is_empty() {
        return Err(CliError::InvalidDefinition(errors));
    }

    context.load_global_describe().await?;

    let mut sobjects = Vec::new();
    for step in &definition.operation {
        if context.schema().sobject_exists(&step.sobject) {
            context.describe(&step.sobject).await?;
            sobjects.push(step.sobject.clone());
        } else {
            errors.push(format!(
                "sObject {} does not exist or is not visible.",
                step.sobject
            ));
        }
    }

    let mut resolved = Vec::new();
    for step in definition
        .operation
        .iter()
        .filter(|s| sobjects.contains(&s.sobject))
    {
        let field_map = context.schema().field_map(&step.sobject)?;
        resolved.push(resolve_step(
            step,
            kind,
            base_dir,
            field_map,
            &sobjects,
            &mut errors,
        ));
    }

    if !errors.is_empty() {
        return Err(CliError::InvalidDefinition(errors));
    }

    for warning in resolved.iter().flat_map(|s| &s.warnings) {
        warn!("{}", warning);
    }

    Ok(resolved)
}

fn resolve_step(
    step: &StepDefinition,
    kind: OperationKind,
    base_dir: &Path,
    field_map: &FieldMap,
    sobjects: &[String],
    errors: &mut Vec<String>,
) -> ResolvedStep {
    let sobject = step.sobject.as_str();
    let mut field_scope = BTreeSet::new();
    let mut columns = BTreeMap::new();
    let mut transforms = HashMap::new();
    let mut pending = Vec::new();

    if let Some(entries) = &step.fields {
        let mut seen = HashSet::new();
        let mut used_columns = HashSet::new();

        for entry in entries {
            let definition = entry.definition();
            let field = definition.field;

            if !seen.insert(field.clone()) {
                errors.push(format!(
                    "Field {}.{} is present more than once in the operation definition.",
                    sobject, field
                ));
                continue;
            }

            let Some(descriptor) = field_map.get(&field) else {
                errors.push(format!(
                    "Field {}.{} does not exist or is not visible.",
                    sobject, field
                ));
                continue;
            };

            if descriptor.field_type == FieldType::Base64 {
                errors.push(format!(
                    "Field {}.{} is a base64 field, which is not supported.",
                    sobject, field
                ));
                continue;
            }

            let column = definition.column.unwrap_or_else(|| field.clone());
            if !used_columns.insert(column.clone()) {
                errors.push(format!(
                    "Field {}.{} is mapped to column {}, but this column is already mapped.",
                    sobject, field, column
                ));
                continue;
            }

            let mut parsed = Vec::new();
            for name in &definition.transforms {
                match name.parse::<Transform>() {
                    Ok(transform) => parsed.push(transform),
                    Err(_) => errors.push(format!(
                        "Transform '{}' specified for field {}.{} is not supported.",
                        name, sobject, field
                    )),
                }
            }
            if !parsed.is_empty() {
                transforms.insert(field.clone(), parsed);
            }

            if definition.self_lookup_behavior.is_some()
                || definition.outside_lookup_behavior.is_some()
            {
                pending.push(PendingBehaviors {
                    field: field.clone(),
                    self_lookup_behavior: definition.self_lookup_behavior,
                    outside_lookup_behavior: definition.outside_lookup_behavior,
                });
            }

            field_scope.insert(field.clone());
            columns.insert(field, column);
        }

        if !field_scope.contains(ID_FIELD) {
            if used_columns.contains(ID_FIELD) {
                errors.push(format!(
                    "Field {}.{} is mapped to column {}, but this column is already mapped.",
                    sobject, ID_FIELD, ID_FIELD
                ));
            }
            field_scope.insert(ID_FIELD.to_string());
            columns.insert(ID_FIELD.to_string(), ID_FIELD.to_string());
        }
    } else if let Some(group) = step.field_group {
        for (name, descriptor) in field_map {
            if group.includes(descriptor) {
                field_scope.insert(name.clone());
                columns.insert(name.clone(), name.clone());
            }
        }
        field_scope.insert(ID_FIELD.to_string());
        columns.insert(ID_FIELD.to_string(), ID_FIELD.to_string());
    }

    let lookups = LookupClassification::classify(sobject, &field_scope, field_map, sobjects)
        .unwrap_or_else(|e| {
            errors.push(e.to_string());
            LookupClassification::default()
        });

    let mut warnings = Vec::new();
    for field in &field_scope {
        if let Some(descriptor) = field_map.get(field) {
            if descriptor.is_reference() && !lookups.all_lookups.contains(field) {
                warnings.push(format!(
                    "Field {}.{} is a reference none of whose targets ({}) are included in the operation. Reference handlers will be inactive for references to non-included sObjects.",
                    sobject,
                    field,
                    descriptor.reference_to.join(", ")
                ));
            }
        }
    }

    let mut field_self_behaviors = BTreeMap::new();
    let mut field_outside_behaviors = BTreeMap::new();
    for request in pending {
        let field = request.field;

        if let Some(value) = request.self_lookup_behavior {
            match value.parse::<SelfLookupBehavior>() {
                Ok(behavior) if lookups.self_lookups.contains(&field) => {
                    field_self_behaviors.insert(field.clone(), behavior);
                },
                _ => errors.push(invalid_behavior(&value, sobject, &field)),
            }
        }

        if let Some(value) = request.outside_lookup_behavior {
            let applies = lookups.descendent_lookups.contains(&field)
                || lookups.dependent_lookups.contains(&field);
            match value.parse::<OutsideLookupBehavior>() {
                Ok(behavior) if applies => {
                    field_outside_behaviors.insert(field.clone(), behavior);
                },
                _ => errors.push(invalid_behavior(&value, sobject, &field)),
            }
        }
    }

    let extract = step.extract.clone().unwrap_or_default();
    let scope = match kind {
        OperationKind::Extract => extract.scope(),
        OperationKind::Load => None,
    };

    let mut ids = Vec::new();
    if scope == Some(ExtractionScope::SelectedRecords) {
        let parsed: std::result::Result<Vec<SalesforceId>, _> = extract
            .ids
            .iter()
            .flatten()
            .map(|id| SalesforceId::new(id))
            .collect();
        match parsed {
            Ok(parsed) => ids = parsed,
            Err(_) => errors.push(format!(
                "One or more invalid Id values provided for sObject {}",
                sobject
            )),
        }
    }

    let file = base_dir.join(
        step.file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.csv", sobject))),
    );
    let result_file = base_dir.join(
        step.result_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}-results.csv", sobject))),
    );

    debug!(
        sobject,
        fields = field_scope.len(),
        file = %file.display(),
        "Resolved step"
    );

    ResolvedStep {
        sobject: sobject.to_string(),
        field_scope,
        columns,
        transforms,
        scope,
        where_clause: extract.query.filter(|_| scope == Some(ExtractionScope::Query)),
        ids,
        self_lookup_behavior: step
            .self_lookup_behavior
            .unwrap_or(SelfLookupBehavior::TraceAll),
        outside_lookup_behavior: step
            .outside_lookup_behavior
            .unwrap_or(OutsideLookupBehavior::Include),
        field_self_behaviors,
        field_outside_behaviors,
        file,
        result_file,
        warnings,
    }
}

fn invalid_behavior(value: &str, sobject: &str, field: &str) -> String {
    format!(
        "Lookup behavior '{}' specified for field {}.{} is not valid for this lookup type.",
        value, sobject, field
    )
}

/// Directory that relative paths in a definition are resolved against
pub fn base_dir(definition_path: &Path) -> PathBuf {
    definition_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

// ============================================================================
// Operation Construction
// ============================================================================

/// Validate a definition and build an extraction writing one CSV per sObject.
pub async fn build_extract_operation(
    definition: &OperationDefinition,
    base_dir: &Path,
    client: Arc<dyn SalesforceClient>,
) -> Result<ExtractOperation> {
    let mut operation = ExtractOperation::new(client);
    let steps = resolve_steps(
        definition,
        OperationKind::Extract,
        base_dir,
        operation.context_mut(),
    )
    .await?;

    for resolved in &steps {
        let scope = resolved.scope.unwrap_or(ExtractionScope::AllRecords);
        let mut step = ExtractionStep::new(&resolved.sobject, scope, resolved.field_scope.iter())
            .with_self_lookup_behavior(resolved.self_lookup_behavior)
            .with_outside_lookup_behavior(resolved.outside_lookup_behavior);
        if let Some(where_clause) = &resolved.where_clause {
            step = step.with_where_clause(where_clause.clone());
        }
        for (field, behavior) in &resolved.field_self_behaviors {
            step.set_self_lookup_behavior_for_field(field, *behavior);
        }
        for (field, behavior) in &resolved.field_outside_behaviors {
            step.set_outside_lookup_behavior_for_field(field, *behavior);
        }
        operation.add_step(step)?;

        for id in &resolved.ids {
            operation.add_dependency(&resolved.sobject, id.clone());
        }

        let mapper = resolved.extract_mapper();
        if !mapper.is_empty() {
            operation.set_mapper(&resolved.sobject, mapper);
        }

        let sink = CsvRecordSink::create(&resolved.file, resolved.output_columns())?;
        operation.set_output(&resolved.sobject, Box::new(sink));
    }

    Ok(operation)
}

/// Validate a definition and build a load reading one CSV per sObject.
///
/// When `resuming`, result files are appended to so rows written by the
/// interrupted run are kept.
pub async fn build_load_operation(
    definition: &OperationDefinition,
    base_dir: &Path,
    client: Arc<dyn SalesforceClient>,
    resuming: bool,
) -> Result<LoadOperation> {
    let mut operation = LoadOperation::new(client);
    let steps = resolve_steps(
        definition,
        OperationKind::Load,
        base_dir,
        operation.context_mut(),
    )
    .await?;

    let mut errors = Vec::new();
    let mut sources = Vec::new();
    for resolved in &steps {
        match open_input(resolved) {
            Ok(source) => sources.push(source),
            Err(message) => errors.push(message),
        }
    }
    if !errors.is_empty() {
        return Err(CliError::InvalidDefinition(errors));
    }

    for (resolved, source) in steps.iter().zip(sources) {
        let mut step = LoadStep::new(&resolved.sobject, resolved.field_scope.iter())
            .with_outside_lookup_behavior(resolved.outside_lookup_behavior);
        for (field, behavior) in &resolved.field_outside_behaviors {
            step.set_outside_lookup_behavior_for_field(field, *behavior);
        }
        operation.add_step(step)?;

        let mapper = resolved.load_mapper();
        if !mapper.is_empty() {
            operation.set_mapper(&resolved.sobject, mapper);
        }

        operation.set_input(&resolved.sobject, Box::new(source));
        let ledger = if resuming {
            CsvResultLedger::append(&resolved.result_file)?
        } else {
            CsvResultLedger::create(&resolved.result_file)?
        };
        operation.set_result_ledger(&resolved.sobject, Box::new(ledger));
    }

    Ok(operation)
}

/// Open an input file and check its columns against the field scope.
fn open_input(resolved: &ResolvedStep) -> std::result::Result<CsvRecordSource<File>, String> {
    if !resolved.file.exists() {
        return Err(format!(
            "Input file {} for sObject {} does not exist.",
            resolved.file.display(),
            resolved.sobject
        ));
    }

    let mut source = CsvRecordSource::open(&resolved.file).map_err(|e| e.to_string())?;
    let headers = source.headers().map_err(|e| e.to_string())?;

    let field_for_column: HashMap<&str, &str> = resolved
        .columns
        .iter()
        .map(|(field, column)| (column.as_str(), field.as_str()))
        .collect();
    let file_fields: BTreeSet<String> = headers
        .iter()
        .map(|h| {
            field_for_column
                .get(h.as_str())
                .map(|f| f.to_string())
                .unwrap_or_else(|| h.clone())
        })
        .collect();

    if file_fields != resolved.field_scope {
        return Err(format!(
            "Input file for sObject {} does not match the specified field scope.\nScope: {}\nFile Columns: {}",
            resolved.sobject,
            resolved.output_columns().join(", "),
            headers.join(", ")
        ));
    }

    Ok(source)
}
