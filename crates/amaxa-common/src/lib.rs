//! Amaxa Common Library
//!
//! Shared error handling and logging for the Amaxa workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`AmaxaError`] and the crate-wide [`Result`] alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use amaxa_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{AmaxaError, Result};
