//! Per-record field renaming and value transforms

use crate::io::Record;
use amaxa_common::AmaxaError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// A value transform applied to a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Strip,
    Lowercase,
    Uppercase,
}

impl Transform {
    pub fn apply(self, value: String) -> String {
        match self {
            Transform::Strip => value.trim().to_string(),
            Transform::Lowercase => value.to_lowercase(),
            Transform::Uppercase => value.to_uppercase(),
        }
    }
}

impl FromStr for Transform {
    type Err = AmaxaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strip" => Ok(Transform::Strip),
            "lowercase" => Ok(Transform::Lowercase),
            "uppercase" => Ok(Transform::Uppercase),
            other => Err(AmaxaError::config(format!("Unknown transform '{}'", other))),
        }
    }
}

/// Renames keys and applies ordered transforms to values.
///
/// Transforms are keyed by the *incoming* key, before renaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataMapper {
    field_name_mapping: HashMap<String, String>,
    field_transforms: HashMap<String, Vec<Transform>>,
}

impl DataMapper {
    pub fn new(
        field_name_mapping: HashMap<String, String>,
        field_transforms: HashMap<String, Vec<Transform>>,
    ) -> Self {
        Self {
            field_name_mapping,
            field_transforms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.field_name_mapping.is_empty() && self.field_transforms.is_empty()
    }

    pub fn transform_record(&self, record: Record) -> Record {
        record
            .into_iter()
            .map(|(k, v)| {
                let value = self.transform_value(&k, v);
                (self.transform_key(&k).to_string(), value)
            })
            .collect()
    }

    pub fn transform_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.field_name_mapping
            .get(key)
            .map(String::as_str)
            .unwrap_or(key)
    }

    pub fn transform_value(&self, key: &str, value: String) -> String {
        match self.field_transforms.get(key) {
            Some(transforms) => transforms.iter().fold(value, |v, t| t.apply(v)),
            None => value,
        }
    }
}
