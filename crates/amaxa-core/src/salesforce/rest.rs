//! REST implementation of [`SalesforceClient`]

use super::endpoints;
use crate::client::{SalesforceClient, WriteResult};
use crate::io::Record;
use crate::schema::{GlobalSObject, SObjectDescribe};
use amaxa_common::{AmaxaError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Client Constants
// ============================================================================

/// API version used when `AMAXA_API_VERSION` is not set
pub const DEFAULT_API_VERSION: &str = "52.0";

/// Default request timeout in seconds.
/// Can be overridden via AMAXA_API_TIMEOUT_SECS environment variable.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

/// Largest batch accepted by the sObject Collections API
pub const MAX_COLLECTION_SIZE: usize = 200;

/// Connection settings shared by authentication and the REST client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesforceConfig {
    pub api_version: String,
    pub timeout_secs: u64,
    /// Overrides the production/sandbox login host
    pub login_url: Option<String>,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            login_url: None,
        }
    }
}

impl SalesforceConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(version) = std::env::var("AMAXA_API_VERSION") {
            config.api_version = version;
        }

        if let Some(timeout) = std::env::var("AMAXA_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_secs = timeout;
        }

        if let Ok(url) = std::env::var("AMAXA_LOGIN_URL") {
            config.login_url = Some(url);
        }

        config
    }

    pub(crate) fn http_client(&self) -> Result<Client> {
        Ok(Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?)
    }
}

#[derive(Debug, Deserialize)]
struct GlobalDescribe {
    sobjects: Vec<GlobalSObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    records: Vec<Map<String, Value>>,
    #[serde(default)]
    next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    message: String,
    #[serde(default, alias = "statusCode")]
    error_code: Option<String>,
}

impl std::fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectionResult {
    #[serde(default)]
    id: Option<String>,
    success: bool,
    #[serde(default)]
    errors: Vec<ApiErrorBody>,
}

impl From<CollectionResult> for WriteResult {
    fn from(result: CollectionResult) -> Self {
        Self {
            success: result.success,
            id: result.id,
            errors: result.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionRequest {
    all_or_none: bool,
    records: Vec<Map<String, Value>>,
}

/// Flatten a JSON record into a string map. `attributes` is dropped and
/// nulls become empty strings.
pub fn flatten_record(record: Map<String, Value>) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| key != "attributes")
        .map(|(key, value)| {
            let value = match value {
                Value::Null => String::new(),
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

fn to_collection_record(sobject: &str, record: Record) -> Map<String, Value> {
    let mut json = Map::new();
    json.insert(
        "attributes".to_string(),
        serde_json::json!({ "type": sobject }),
    );
    for (key, value) in record {
        json.insert(key, Value::String(value));
    }
    json
}

/// Salesforce REST API client bound to one authenticated session
pub struct RestClient {
    client: Client,
    instance_url: String,
    access_token: String,
    api_version: String,
}

impl RestClient {
    pub fn new(
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        config: &SalesforceConfig,
    ) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            api_version: config.api_version.clone(),
        })
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    async fn send(&self, method: Method, url: &str, body: Option<&CollectionRequest>) -> Result<Response> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.access_token);
        if let Some(body) = body {
            request = request.json(body);
        }
        check_status(request.send().await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        Ok(self.send(Method::GET, url, None).await?.json().await?)
    }

    async fn query_pages(&self, soql: &str) -> Result<Vec<Record>> {
        let mut url = endpoints::query_all_url(&self.instance_url, &self.api_version, soql);
        let mut records = Vec::new();

        loop {
            let page: QueryPage = self.get_json(&url).await?;
            records.extend(page.records.into_iter().map(flatten_record));

            match page.next_records_url {
                Some(next) => url = endpoints::next_records_url(&self.instance_url, &next),
                None => break,
            }
        }

        debug!(soql, count = records.len(), "Query complete");
        Ok(records)
    }

    async fn write_collection(
        &self,
        method: Method,
        sobject: &str,
        records: Vec<Record>,
    ) -> Result<Vec<WriteResult>> {
        let url = endpoints::composite_sobjects_url(&self.instance_url, &self.api_version);
        let mut results = Vec::with_capacity(records.len());
        let mut records = records.into_iter().peekable();

        while records.peek().is_some() {
            let chunk: Vec<Map<String, Value>> = records
                .by_ref()
                .take(MAX_COLLECTION_SIZE)
                .map(|r| to_collection_record(sobject, r))
                .collect();
            let request = CollectionRequest {
                all_or_none: false,
                records: chunk,
            };

            debug!(sobject, %method, count = request.records.len(), "Writing records");
            let response: Vec<CollectionResult> = self
                .send(method.clone(), &url, Some(&request))
                .await?
                .json()
                .await?;
            results.extend(response.into_iter().map(WriteResult::from));
        }

        Ok(results)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<Vec<ApiErrorBody>>(&body) {
        Ok(errors) if !errors.is_empty() => errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
        _ => body,
    };

    Err(AmaxaError::api(status.as_u16(), message))
}

#[async_trait]
impl SalesforceClient for RestClient {
    async fn describe_global(&self) -> Result<Vec<GlobalSObject>> {
        let url = endpoints::sobjects_url(&self.instance_url, &self.api_version);
        let describe: GlobalDescribe = self.get_json(&url).await?;
        Ok(describe.sobjects)
    }

    async fn describe(&self, sobject: &str) -> Result<SObjectDescribe> {
        let url = endpoints::describe_url(&self.instance_url, &self.api_version, sobject);
        self.get_json(&url).await
    }

    async fn bulk_query(&self, _sobject: &str, soql: &str) -> Result<Vec<Record>> {
        self.query_pages(soql).await
    }

    async fn query_all(&self, soql: &str) -> Result<Vec<Record>> {
        self.query_pages(soql).await
    }

    async fn insert(&self, sobject: &str, records: Vec<Record>) -> Result<Vec<WriteResult>> {
        self.write_collection(Method::POST, sobject, records).await
    }

    async fn update(&self, sobject: &str, records: Vec<Record>) -> Result<Vec<WriteResult>> {
        self.write_collection(Method::PATCH, sobject, records).await
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}
