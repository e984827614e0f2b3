//! In-memory org used by the engine integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use amaxa_common::{AmaxaError, Result};
use amaxa_core::client::{SalesforceClient, WriteResult};
use amaxa_core::id::SalesforceId;
use amaxa_core::io::{Record, RecordSink, RecordSource, ResultLedger};
use amaxa_core::schema::{FieldDescriptor, FieldType, GlobalSObject, SObjectDescribe, SoapType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Build a record from field/value pairs
pub fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Deterministic 18-character Id with the given key prefix
pub fn sf_id(prefix: &str, n: usize) -> String {
    SalesforceId::new(&format!("{}{:012}", prefix, n))
        .unwrap()
        .to_string()
}

fn field(name: &str, field_type: &str, soap_type: &str, reference_to: &[&str]) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_string(),
        field_type: FieldType::from(field_type.to_string()),
        reference_to: reference_to.iter().map(|s| s.to_string()).collect(),
        createable: name != "Id",
        soap_type: SoapType::from(soap_type.to_string()),
    }
}

pub fn id_field() -> FieldDescriptor {
    field("Id", "id", "tns:ID", &[])
}

pub fn string_field(name: &str) -> FieldDescriptor {
    field(name, "string", "xsd:string", &[])
}

pub fn boolean_field(name: &str) -> FieldDescriptor {
    field(name, "boolean", "xsd:boolean", &[])
}

pub fn reference_field(name: &str, targets: &[&str]) -> FieldDescriptor {
    field(name, "reference", "tns:ID", targets)
}

/// Describes for Account, Contact, Opportunity, Lead and Task
pub fn standard_describes() -> Vec<SObjectDescribe> {
    vec![
        SObjectDescribe {
            name: "Account".to_string(),
            key_prefix: Some("001".to_string()),
            fields: vec![
                id_field(),
                string_field("Name"),
                reference_field("ParentId", &["Account"]),
                boolean_field("IsPartner"),
            ],
        },
        SObjectDescribe {
            name: "Contact".to_string(),
            key_prefix: Some("003".to_string()),
            fields: vec![
                id_field(),
                string_field("FirstName"),
                string_field("LastName"),
                reference_field("AccountId", &["Account"]),
                reference_field("ReportsToId", &["Contact"]),
                boolean_field("DoNotCall"),
            ],
        },
        SObjectDescribe {
            name: "Opportunity".to_string(),
            key_prefix: Some("006".to_string()),
            fields: vec![
                id_field(),
                string_field("Name"),
                string_field("StageName"),
                reference_field("AccountId", &["Account"]),
                reference_field("ContactId", &["Contact"]),
            ],
        },
        SObjectDescribe {
            name: "Lead".to_string(),
            key_prefix: Some("00Q".to_string()),
            fields: vec![id_field(), string_field("LastName")],
        },
        SObjectDescribe {
            name: "Task".to_string(),
            key_prefix: Some("00T".to_string()),
            fields: vec![
                id_field(),
                string_field("Subject"),
                reference_field("WhoId", &["Contact", "Lead"]),
                reference_field("WhatId", &["Account", "Opportunity"]),
            ],
        },
    ]
}

#[derive(Default)]
struct OrgState {
    describes: HashMap<String, SObjectDescribe>,
    records: HashMap<String, Vec<Record>>,
    queries: Vec<String>,
    inserts: Vec<(String, Vec<Record>)>,
    updates: Vec<(String, Vec<Record>)>,
    next_id: usize,
    insert_failures: Vec<(String, String)>,
    insert_result_limit: Option<usize>,
    update_result_limit: Option<usize>,
}

/// A tiny org that understands the SOQL shapes the engines generate:
/// no filter, `Field IN ('a', 'b')` and `Field = 'a'`.
#[derive(Default)]
pub struct MockClient {
    state: Mutex<OrgState>,
}

impl MockClient {
    pub fn new(describes: Vec<SObjectDescribe>) -> Self {
        let client = Self::default();
        {
            let mut state = client.state.lock().unwrap();
            state.next_id = 9000;
            for describe in describes {
                state.describes.insert(describe.name.clone(), describe);
            }
        }
        client
    }

    pub fn standard() -> Self {
        Self::new(standard_describes())
    }

    pub fn add_record(&self, sobject: &str, record: Record) {
        self.state
            .lock()
            .unwrap()
            .records
            .entry(sobject.to_string())
            .or_default()
            .push(record);
    }

    /// Make inserts of records whose `field` equals `value` fail
    pub fn fail_inserts_where(&self, field: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .insert_failures
            .push((field.to_string(), value.to_string()));
    }

    /// Return at most `limit` results from each insert call
    pub fn limit_insert_results(&self, limit: usize) {
        self.state.lock().unwrap().insert_result_limit = Some(limit);
    }

    /// Return at most `limit` results from each update call
    pub fn limit_update_results(&self, limit: usize) {
        self.state.lock().unwrap().update_result_limit = Some(limit);
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn inserts(&self) -> Vec<(String, Vec<Record>)> {
        self.state.lock().unwrap().inserts.clone()
    }

    pub fn updates(&self) -> Vec<(String, Vec<Record>)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn records(&self, sobject: &str) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(sobject)
            .cloned()
            .unwrap_or_default()
    }

    fn run_query(&self, soql: &str) -> Result<Vec<Record>> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(soql.to_string());

        let rest = soql
            .strip_prefix("SELECT ")
            .ok_or_else(|| AmaxaError::api(400, format!("MALFORMED_QUERY: {}", soql)))?;
        let (fields, rest) = rest
            .split_once(" FROM ")
            .ok_or_else(|| AmaxaError::api(400, format!("MALFORMED_QUERY: {}", soql)))?;
        let (sobject, filter) = match rest.split_once(" WHERE ") {
            Some((sobject, filter)) => (sobject, Some(filter)),
            None => (rest, None),
        };
        let fields: Vec<&str> = fields.split(", ").collect();

        let matches = |record: &Record| -> bool {
            let Some(filter) = filter else {
                return true;
            };
            if let Some((field, list)) = filter.split_once(" IN (") {
                let value = normalize(record.get(field).map(String::as_str).unwrap_or(""));
                return list
                    .trim_end_matches(')')
                    .split(", ")
                    .map(|v| normalize(v.trim_matches('\'')))
                    .any(|v| !v.is_empty() && v == value);
            }
            if let Some((field, value)) = filter.split_once(" = ") {
                return record.get(field).map(String::as_str) == Some(value.trim_matches('\''));
            }
            false
        };

        Ok(state
            .records
            .get(sobject)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| matches(r))
                    .map(|r| {
                        fields
                            .iter()
                            .map(|f| (f.to_string(), r.get(*f).cloned().unwrap_or_default()))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn normalize(value: &str) -> String {
    SalesforceId::new(value)
        .map(|id| id.to_string())
        .unwrap_or_else(|_| value.to_string())
}

#[async_trait]
impl SalesforceClient for MockClient {
    async fn describe_global(&self) -> Result<Vec<GlobalSObject>> {
        let state = self.state.lock().unwrap();
        let mut sobjects: Vec<GlobalSObject> = state
            .describes
            .values()
            .map(|d| GlobalSObject {
                name: d.name.clone(),
                key_prefix: d.key_prefix.clone(),
            })
            .collect();
        sobjects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sobjects)
    }

    async fn describe(&self, sobject: &str) -> Result<SObjectDescribe> {
        self.state
            .lock()
            .unwrap()
            .describes
            .get(sobject)
            .cloned()
            .ok_or_else(|| AmaxaError::api(404, format!("NOT_FOUND: {}", sobject)))
    }

    async fn bulk_query(&self, _sobject: &str, soql: &str) -> Result<Vec<Record>> {
        self.run_query(soql)
    }

    async fn query_all(&self, soql: &str) -> Result<Vec<Record>> {
        self.run_query(soql)
    }

    async fn insert(&self, sobject: &str, records: Vec<Record>) -> Result<Vec<WriteResult>> {
        let mut state = self.state.lock().unwrap();
        state.inserts.push((sobject.to_string(), records.clone()));
        let prefix = state
            .describes
            .get(sobject)
            .and_then(|d| d.key_prefix.clone())
            .unwrap_or_else(|| "a00".to_string());

        let mut results = Vec::new();
        for mut record in records {
            let failure = state
                .insert_failures
                .iter()
                .find(|(f, v)| record.get(f) == Some(v))
                .cloned();
            if let Some((field, _)) = failure {
                results.push(WriteResult::failed(format!(
                    "FIELD_CUSTOM_VALIDATION_EXCEPTION: bad {}",
                    field
                )));
                continue;
            }

            state.next_id += 1;
            let id = sf_id(&prefix, state.next_id);
            record.insert("Id".to_string(), id.clone());
            state
                .records
                .entry(sobject.to_string())
                .or_default()
                .push(record);
            results.push(WriteResult::created(id));
        }
        if let Some(limit) = state.insert_result_limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn update(&self, sobject: &str, records: Vec<Record>) -> Result<Vec<WriteResult>> {
        let mut state = self.state.lock().unwrap();
        state.updates.push((sobject.to_string(), records.clone()));

        let mut results = Vec::new();
        for update in records {
            let id = update.get("Id").cloned().unwrap_or_default();
            let existing = state
                .records
                .get_mut(sobject)
                .and_then(|rs| rs.iter_mut().find(|r| r.get("Id") == Some(&id)));
            match existing {
                Some(existing) => {
                    existing.extend(update);
                    results.push(WriteResult::created(id));
                },
                None => results.push(WriteResult::failed("ENTITY_IS_DELETED: entity is deleted")),
            }
        }
        if let Some(limit) = state.update_result_limit {
            results.truncate(limit);
        }
        Ok(results)
    }
}

/// Sink that keeps written records for inspection
#[derive(Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn rows(&self) -> Vec<Record> {
        self.rows.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rows()
            .iter()
            .map(|r| r.get("Id").cloned().unwrap_or_default())
            .collect();
        ids.sort();
        ids
    }
}

impl RecordSink for MemorySink {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Source over a fixed list of records
pub struct MemorySource(pub Vec<Record>);

impl RecordSource for MemorySource {
    fn read_records(&mut self) -> Result<Vec<Record>> {
        Ok(self.0.clone())
    }
}

/// Ledger that keeps old/new Id pairs for inspection
#[derive(Clone, Default)]
pub struct MemoryLedger {
    rows: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryLedger {
    pub fn rows(&self) -> Vec<(String, String)> {
        self.rows.lock().unwrap().clone()
    }
}

impl ResultLedger for MemoryLedger {
    fn write_result(&mut self, original_id: &SalesforceId, new_id: &SalesforceId) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .push((original_id.to_string(), new_id.to_string()));
        Ok(())
    }
}
