//! Client interface to the Salesforce org
//!
//! The engines depend only on [`SalesforceClient`]. The REST implementation
//! lives in [`crate::salesforce`]; tests provide an in-memory one.

use crate::io::Record;
use crate::schema::{GlobalSObject, SObjectDescribe};
use amaxa_common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of inserting or updating a single record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub success: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl WriteResult {
    pub fn created(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            errors: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            errors: vec![message.into()],
        }
    }
}

/// Data access to a Salesforce org
#[async_trait]
pub trait SalesforceClient: Send + Sync {
    /// Every sObject visible to the user, with its key prefix
    async fn describe_global(&self) -> Result<Vec<GlobalSObject>>;

    /// Field metadata for one sObject
    async fn describe(&self, sobject: &str) -> Result<SObjectDescribe>;

    /// Run a (potentially large) query for one sObject and return every row
    async fn bulk_query(&self, sobject: &str, soql: &str) -> Result<Vec<Record>>;

    /// Run a synchronous query, including deleted and archived rows
    async fn query_all(&self, soql: &str) -> Result<Vec<Record>>;

    /// Insert records; one result per input record, in input order
    async fn insert(&self, sobject: &str, records: Vec<Record>) -> Result<Vec<WriteResult>>;

    /// Update records by `Id`; one result per input record, in input order
    async fn update(&self, sobject: &str, records: Vec<Record>) -> Result<Vec<WriteResult>>;
}

/// Client handle bound to one sObject
#[derive(Clone)]
pub struct SObjectProxy {
    sobject: String,
    client: Arc<dyn SalesforceClient>,
}

impl SObjectProxy {
    pub fn new(sobject: impl Into<String>, client: Arc<dyn SalesforceClient>) -> Self {
        Self {
            sobject: sobject.into(),
            client,
        }
    }

    pub fn sobject(&self) -> &str {
        &self.sobject
    }

    pub async fn describe(&self) -> Result<SObjectDescribe> {
        self.client.describe(&self.sobject).await
    }

    pub async fn bulk_query(&self, soql: &str) -> Result<Vec<Record>> {
        self.client.bulk_query(&self.sobject, soql).await
    }

    pub async fn insert(&self, records: Vec<Record>) -> Result<Vec<WriteResult>> {
        self.client.insert(&self.sobject, records).await
    }

    pub async fn update(&self, records: Vec<Record>) -> Result<Vec<WriteResult>> {
        self.client.update(&self.sobject, records).await
    }
}

impl std::fmt::Debug for SObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SObjectProxy")
            .field("sobject", &self.sobject)
            .finish()
    }
}
