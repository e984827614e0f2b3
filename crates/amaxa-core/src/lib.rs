//! Amaxa Core Library
//!
//! Extracts a connected, referentially consistent slice of a Salesforce org to
//! CSV and loads it back into another org with every reference remapped to the
//! newly created records.
//!
//! # Modules
//!
//! - [`extract`]: the extraction engine
//! - [`load`]: the two-phase load engine
//! - [`step`]: lookup classification and behaviors shared by both engines
//! - [`operation`]: the org connection and describe cache of an operation
//! - [`client`]: the client interface the engines talk to
//! - [`salesforce`]: the REST implementation of that interface
//! - [`io`]: CSV record sources and sinks
//!
//! # Example
//!
//! ```no_run
//! use amaxa_core::extract::{ExtractOperation, ExtractionStep};
//! use amaxa_core::io::CsvRecordSink;
//! use amaxa_core::salesforce::{connect, Credentials, SalesforceConfig};
//! use amaxa_core::step::ExtractionScope;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let credentials = Credentials::AccessToken {
//!         instance_url: "https://example.my.salesforce.com".to_string(),
//!         access_token: "00D...".to_string(),
//!     };
//!     let client = connect(&credentials, &SalesforceConfig::from_env()).await?;
//!
//!     let mut operation = ExtractOperation::new(Arc::new(client));
//!     operation.add_step(ExtractionStep::new(
//!         "Account",
//!         ExtractionScope::AllRecords,
//!         ["Name", "ParentId"],
//!     ))?;
//!     operation.set_output(
//!         "Account",
//!         Box::new(CsvRecordSink::create(
//!             "Account.csv",
//!             vec!["Id".into(), "Name".into(), "ParentId".into()],
//!         )?),
//!     );
//!     operation.execute().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod client;
pub mod extract;
pub mod id;
pub mod io;
pub mod load;
pub mod mapper;
pub mod operation;
pub mod salesforce;
pub mod schema;
pub mod step;

pub use client::{SObjectProxy, SalesforceClient, WriteResult};
pub use extract::{ExtractOperation, ExtractionStep};
pub use id::SalesforceId;
pub use io::Record;
pub use load::{LoadOperation, LoadStage, LoadStep};
pub use operation::OperationContext;
pub use step::{ExtractionScope, OutsideLookupBehavior, SelfLookupBehavior};
