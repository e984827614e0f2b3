//! Shared state of one extract or load operation

use crate::client::{SObjectProxy, SalesforceClient};
use crate::id::SalesforceId;
use crate::io::Record;
use crate::schema::{FieldMap, SObjectDescribe, SchemaCache};
use crate::step::LookupClassification;
use amaxa_common::{AmaxaError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Owns the org connection, describe cache and ordered sObject list that every
/// step of an operation consults.
pub struct OperationContext {
    client: Arc<dyn SalesforceClient>,
    schema: SchemaCache,
    proxies: HashMap<String, SObjectProxy>,
    sobjects: Vec<String>,
}

impl OperationContext {
    pub fn new(client: Arc<dyn SalesforceClient>) -> Self {
        Self {
            client,
            schema: SchemaCache::new(),
            proxies: HashMap::new(),
            sobjects: Vec::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn SalesforceClient> {
        &self.client
    }

    /// Append an sObject to the operation order. Each sObject appears once.
    pub fn add_sobject(&mut self, sobject: &str) -> Result<()> {
        if self.position(sobject).is_some() {
            return Err(AmaxaError::config(format!(
                "sObject {} is present more than once in the operation",
                sobject
            )));
        }
        self.sobjects.push(sobject.to_string());
        Ok(())
    }

    pub fn sobject_list(&self) -> &[String] {
        &self.sobjects
    }

    pub fn position(&self, sobject: &str) -> Option<usize> {
        self.sobjects.iter().position(|s| s == sobject)
    }

    /// Client handle for one sObject, created on first use
    pub fn proxy(&mut self, sobject: &str) -> SObjectProxy {
        let client = &self.client;
        self.proxies
            .entry(sobject.to_string())
            .or_insert_with(|| SObjectProxy::new(sobject, Arc::clone(client)))
            .clone()
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    pub async fn load_global_describe(&mut self) -> Result<()> {
        if !self.schema.has_global_describe() {
            debug!("Loading global describe");
            let sobjects = self.client.describe_global().await?;
            self.schema.set_global_describe(sobjects);
        }
        Ok(())
    }

    /// Describe for one sObject, fetched on first use
    pub async fn describe(&mut self, sobject: &str) -> Result<&SObjectDescribe> {
        if !self.schema.contains(sobject) {
            debug!(sobject, "Loading describe");
            let describe = self.proxy(sobject).describe().await?;
            self.schema.insert(describe);
        }
        self.schema.describe(sobject)
    }

    pub async fn field_map(&mut self, sobject: &str) -> Result<&FieldMap> {
        self.describe(sobject).await?;
        self.schema.field_map(sobject)
    }

    /// Load the global describe and the describe of every sObject in the
    /// operation.
    pub async fn prepare(&mut self) -> Result<()> {
        self.load_global_describe().await?;
        for sobject in self.sobjects.clone() {
            self.describe(&sobject).await?;
        }
        Ok(())
    }

    pub fn sobject_for_id(&self, id: &SalesforceId) -> Result<&str> {
        self.schema.sobject_for_id(id)
    }

    /// Classify the reference fields of `sobject` against the operation order.
    /// The sObject must already be described.
    pub fn classify(
        &self,
        sobject: &str,
        field_scope: &BTreeSet<String>,
    ) -> Result<LookupClassification> {
        LookupClassification::classify(
            sobject,
            field_scope,
            self.schema.field_map(sobject)?,
            &self.sobjects,
        )
    }

    pub async fn query_all(&self, soql: &str) -> Result<Vec<Record>> {
        debug!(soql, "Running query");
        self.client.query_all(soql).await
    }
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("sobjects", &self.sobjects)
            .finish()
    }
}
