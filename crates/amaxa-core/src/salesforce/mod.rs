//! Salesforce REST API access
//!
//! - [`auth`]: access token and username/password sessions
//! - [`rest`]: [`RestClient`], the REST implementation of
//!   [`SalesforceClient`](crate::client::SalesforceClient)
//! - [`endpoints`]: URL builders

pub mod auth;
pub mod endpoints;
pub mod rest;

pub use auth::{authenticate, connect, Credentials, Session};
pub use rest::{RestClient, SalesforceConfig};
