//! Step-level vocabulary shared by extraction and load
//!
//! Every step is bound to one sObject. Its position in the operation's sObject
//! list decides how each of its reference fields is treated: a reference to an
//! earlier sObject is a *descendent* lookup (it finds children of records that
//! were already processed), a reference to a later sObject is a *dependent*
//! lookup (its target is picked up when that sObject's step runs), and a
//! reference to the step's own sObject is a *self* lookup.

use crate::schema::FieldMap;
use amaxa_common::{AmaxaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// The primary identifier field present in every step's field scope
pub const ID_FIELD: &str = "Id";

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }

            pub fn all_values() -> Vec<&'static str> {
                vec![$($value),+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AmaxaError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($value => Ok($name::$variant),)+
                    other => Err(AmaxaError::config(format!(
                        "'{}' is not a valid {} (expected one of: {})",
                        other,
                        stringify!($name),
                        $name::all_values().join(", ")
                    ))),
                }
            }
        }
    };
}

/// Which records an extraction step pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionScope {
    #[serde(rename = "all")]
    AllRecords,
    #[serde(rename = "query")]
    Query,
    #[serde(rename = "some")]
    SelectedRecords,
    #[serde(rename = "children")]
    Descendents,
}

string_enum!(ExtractionScope {
    AllRecords => "all",
    Query => "query",
    SelectedRecords => "some",
    Descendents => "children",
});

/// Whether a self lookup drives further traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelfLookupBehavior {
    TraceAll,
    TraceNone,
}

string_enum!(SelfLookupBehavior {
    TraceAll => "trace-all",
    TraceNone => "trace-none",
});

/// What to do with a reference to a record outside the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutsideLookupBehavior {
    DropField,
    Include,
    Error,
}

string_enum!(OutsideLookupBehavior {
    DropField => "drop-field",
    Include => "include",
    Error => "error",
});

/// Reference fields of one step, grouped by where their targets sit in the
/// operation. A polymorphic field may appear in several groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupClassification {
    pub all_lookups: BTreeSet<String>,
    pub self_lookups: BTreeSet<String>,
    pub descendent_lookups: BTreeSet<String>,
    pub dependent_lookups: BTreeSet<String>,
    targets: BTreeMap<String, Vec<String>>,
}

impl LookupClassification {
    /// Classify every reference field in `field_scope` against the ordered
    /// sObject list of the operation.
    pub fn classify(
        sobject: &str,
        field_scope: &BTreeSet<String>,
        field_map: &FieldMap,
        sobjects: &[String],
    ) -> Result<Self> {
        let position = |name: &str| sobjects.iter().position(|s| s == name);
        let own_position = position(sobject).ok_or_else(|| {
            AmaxaError::config(format!("sObject {} is not part of this operation", sobject))
        })?;

        let mut classification = Self::default();

        for field in field_scope {
            let descriptor = field_map.get(field).ok_or_else(|| {
                AmaxaError::config(format!(
                    "Field {}.{} does not exist or is not visible.",
                    sobject, field
                ))
            })?;

            if !descriptor.is_reference() {
                continue;
            }

            let positions: Vec<usize> = descriptor
                .reference_to
                .iter()
                .filter_map(|target| position(target))
                .collect();

            if positions.is_empty() {
                continue;
            }

            classification.all_lookups.insert(field.clone());
            classification
                .targets
                .insert(field.clone(), descriptor.reference_to.clone());

            if positions.contains(&own_position) {
                classification.self_lookups.insert(field.clone());
            }
            if positions.iter().any(|p| *p < own_position) {
                classification.descendent_lookups.insert(field.clone());
            }
            if positions.iter().any(|p| *p > own_position) {
                classification.dependent_lookups.insert(field.clone());
            }
        }

        Ok(classification)
    }

    /// The `referenceTo` list of a classified lookup field
    pub fn targets(&self, field: &str) -> &[String] {
        self.targets.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_polymorphic(&self, field: &str) -> bool {
        self.targets(field).len() > 1
    }

    /// Lookups that cannot be populated until later records exist
    pub fn deferred_lookups(&self) -> BTreeSet<String> {
        self.dependent_lookups
            .union(&self.self_lookups)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, FieldType, SoapType};

    fn reference(name: &str, targets: &[&str]) -> (String, FieldDescriptor) {
        (
            name.to_string(),
            FieldDescriptor {
                name: name.to_string(),
                field_type: FieldType::Reference,
                reference_to: targets.iter().map(|t| t.to_string()).collect(),
                createable: true,
                soap_type: SoapType::Id,
            },
        )
    }

    fn plain(name: &str) -> (String, FieldDescriptor) {
        (
            name.to_string(),
            FieldDescriptor {
                name: name.to_string(),
                field_type: FieldType::Other("string".to_string()),
                reference_to: Vec::new(),
                createable: true,
                soap_type: SoapType::String,
            },
        )
    }

    fn scope(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn set(fields: &[&str]) -> BTreeSet<String> {
        scope(fields)
    }

    #[test]
    fn test_classifies_by_position() {
        let sobjects: Vec<String> = ["Account", "Contact", "Opportunity"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let field_map: FieldMap = [
            plain("Id"),
            plain("LastName"),
            reference("AccountId", &["Account"]),
            reference("ReportsToId", &["Contact"]),
            reference("Primary_Opportunity__c", &["Opportunity"]),
            reference("OwnerId", &["User"]),
            reference("WhatId", &["Account", "Opportunity", "Case"]),
        ]
        .into_iter()
        .collect();

        let classification = LookupClassification::classify(
            "Contact",
            &scope(&[
                "Id",
                "LastName",
                "AccountId",
                "ReportsToId",
                "Primary_Opportunity__c",
                "OwnerId",
                "WhatId",
            ]),
            &field_map,
            &sobjects,
        )
        .unwrap();

        assert_eq!(
            classification.all_lookups,
            set(&["AccountId", "ReportsToId", "Primary_Opportunity__c", "WhatId"])
        );
        assert_eq!(classification.self_lookups, set(&["ReportsToId"]));
        assert_eq!(
            classification.descendent_lookups,
            set(&["AccountId", "WhatId"])
        );
        assert_eq!(
            classification.dependent_lookups,
            set(&["Primary_Opportunity__c", "WhatId"])
        );
        assert_eq!(
            classification.deferred_lookups(),
            set(&["Primary_Opportunity__c", "ReportsToId", "WhatId"])
        );
        assert!(classification.is_polymorphic("WhatId"));
        assert_eq!(classification.targets("OwnerId"), &[] as &[String]);
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let sobjects = vec!["Account".to_string()];
        let field_map: FieldMap = [plain("Id")].into_iter().collect();

        let result =
            LookupClassification::classify("Account", &scope(&["Id", "Test__c"]), &field_map, &sobjects);

        assert!(matches!(result, Err(AmaxaError::Config(_))));
    }

    #[test]
    fn test_behavior_parsing() {
        assert_eq!(
            "children".parse::<ExtractionScope>().unwrap(),
            ExtractionScope::Descendents
        );
        assert_eq!(
            "trace-none".parse::<SelfLookupBehavior>().unwrap(),
            SelfLookupBehavior::TraceNone
        );
        assert_eq!(
            OutsideLookupBehavior::DropField.to_string(),
            "drop-field"
        );
        assert!("sometimes".parse::<OutsideLookupBehavior>().is_err());
    }
}
