//! sObject describe metadata and the per-operation describe cache

use crate::id::SalesforceId;
use amaxa_common::{AmaxaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Storage type of a field, as reported by describe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Reference,
    Base64,
    Address,
    Location,
    Other(String),
}

impl FieldType {
    /// Compound fields cannot be queried alongside their components in bulk.
    pub fn is_compound(&self) -> bool {
        matches!(self, FieldType::Address | FieldType::Location)
    }
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "reference" => FieldType::Reference,
            "base64" => FieldType::Base64,
            "address" => FieldType::Address,
            "location" => FieldType::Location,
            _ => FieldType::Other(value),
        }
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        match value {
            FieldType::Reference => "reference".to_string(),
            FieldType::Base64 => "base64".to_string(),
            FieldType::Address => "address".to_string(),
            FieldType::Location => "location".to_string(),
            FieldType::Other(other) => other,
        }
    }
}

/// Wire type of a field, used to coerce values before insert
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SoapType {
    Boolean,
    Id,
    #[default]
    String,
    Date,
    DateTime,
    Time,
    Int,
    Long,
    Double,
    Other(String),
}

impl From<String> for SoapType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "xsd:boolean" => SoapType::Boolean,
            "tns:ID" => SoapType::Id,
            "xsd:string" => SoapType::String,
            "xsd:date" => SoapType::Date,
            "xsd:dateTime" => SoapType::DateTime,
            "xsd:time" => SoapType::Time,
            "xsd:int" => SoapType::Int,
            "xsd:long" => SoapType::Long,
            "xsd:double" => SoapType::Double,
            _ => SoapType::Other(value),
        }
    }
}

impl From<SoapType> for String {
    fn from(value: SoapType) -> Self {
        match value {
            SoapType::Boolean => "xsd:boolean".to_string(),
            SoapType::Id => "tns:ID".to_string(),
            SoapType::String => "xsd:string".to_string(),
            SoapType::Date => "xsd:date".to_string(),
            SoapType::DateTime => "xsd:dateTime".to_string(),
            SoapType::Time => "xsd:time".to_string(),
            SoapType::Int => "xsd:int".to_string(),
            SoapType::Long => "xsd:long".to_string(),
            SoapType::Double => "xsd:double".to_string(),
            SoapType::Other(other) => other,
        }
    }
}

/// Describe metadata for a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub reference_to: Vec<String>,
    #[serde(default)]
    pub createable: bool,
    #[serde(default)]
    pub soap_type: SoapType,
}

impl FieldDescriptor {
    pub fn is_reference(&self) -> bool {
        self.field_type == FieldType::Reference
    }

    pub fn is_polymorphic(&self) -> bool {
        self.reference_to.len() > 1
    }
}

/// Describe metadata for a single sObject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SObjectDescribe {
    pub name: String,
    #[serde(default)]
    pub key_prefix: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

/// One entry of the global describe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSObject {
    pub name: String,
    #[serde(default)]
    pub key_prefix: Option<String>,
}

/// Field name -> descriptor for one sObject
pub type FieldMap = BTreeMap<String, FieldDescriptor>;

/// Describe results for the sObjects of one operation, plus the key prefix
/// index derived from the global describe.
#[derive(Debug, Default)]
pub struct SchemaCache {
    describes: HashMap<String, SObjectDescribe>,
    field_maps: HashMap<String, FieldMap>,
    global: Option<Vec<GlobalSObject>>,
    key_prefixes: HashMap<String, String>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, describe: SObjectDescribe) {
        let field_map = describe
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.clone()))
            .collect();

        self.field_maps.insert(describe.name.clone(), field_map);
        self.describes.insert(describe.name.clone(), describe);
    }

    pub fn contains(&self, sobject: &str) -> bool {
        self.describes.contains_key(sobject)
    }

    pub fn describe(&self, sobject: &str) -> Result<&SObjectDescribe> {
        self.describes
            .get(sobject)
            .ok_or_else(|| AmaxaError::SchemaNotLoaded(sobject.to_string()))
    }

    pub fn field_map(&self, sobject: &str) -> Result<&FieldMap> {
        self.field_maps
            .get(sobject)
            .ok_or_else(|| AmaxaError::SchemaNotLoaded(sobject.to_string()))
    }

    pub fn filtered_field_map<F>(&self, sobject: &str, predicate: F) -> Result<FieldMap>
    where
        F: Fn(&FieldDescriptor) -> bool,
    {
        Ok(self
            .field_map(sobject)?
            .iter()
            .filter(|(_, f)| predicate(f))
            .map(|(k, f)| (k.clone(), f.clone()))
            .collect())
    }

    /// Store the global describe and rebuild the key prefix index from it.
    pub fn set_global_describe(&mut self, sobjects: Vec<GlobalSObject>) {
        self.key_prefixes = sobjects
            .iter()
            .filter_map(|s| s.key_prefix.clone().map(|p| (p, s.name.clone())))
            .collect();
        self.global = Some(sobjects);
    }

    pub fn has_global_describe(&self) -> bool {
        self.global.is_some()
    }

    /// Whether the org exposes an sObject with this name
    pub fn sobject_exists(&self, sobject: &str) -> bool {
        self.global
            .as_ref()
            .is_some_and(|g| g.iter().any(|s| s.name == sobject))
    }

    /// Resolve the sObject an Id belongs to through its key prefix.
    pub fn sobject_for_id(&self, id: &SalesforceId) -> Result<&str> {
        self.key_prefixes
            .get(id.key_prefix())
            .map(String::as_str)
            .ok_or_else(|| AmaxaError::UnknownKeyPrefix(id.to_string()))
    }
}
