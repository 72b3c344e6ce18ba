//! # REST Connectors
//!
//! SaaS and cloud discovery connectors for sightline.
//!
//! | Name | Identities | Resources | Paging |
//! |------|------------|-----------|--------|
//! | `github` | organization members | app installations (privileges) | `Link: rel="next"` |
//! | `salesforce` | SOQL `User` query | - | `nextRecordsUrl` |
//! | `servicenow` | Table API rows | - | `sysparm_offset` |
//! | `gcp` | service accounts, custom roles | Cloud Asset inventory | `nextPageToken` |
//! | `azure` | - | Resource Graph query | `$skipToken` |
//!
//! All requests go through the shared [`VendorHttp`](sightline_connector::VendorHttp)
//! client, so retry and throttling behave the same for every vendor.
//!
//! ## Example
//!
//! ```ignore
//! use sightline_connector::prelude::*;
//! use sightline_connector_rest::{GithubConnector, SalesforceConnector, ServiceNowConnector};
//!
//! let mut registry = ConnectorRegistry::new();
//! registry
//!     .register("github", || Box::new(GithubConnector::new()))
//!     .register("salesforce", || Box::new(SalesforceConnector::new()))
//!     .register("servicenow", || Box::new(ServiceNowConnector::new()));
//! ```

pub mod azure;
mod client;
pub mod gcp;
pub mod github;
pub mod salesforce;
pub mod servicenow;

pub use azure::{AzureConnector, AzureSettings};
pub use gcp::{GcpConnector, GcpSettings, JwtBearerExchange, ServiceAccountKey};
pub use github::{GithubConnector, GithubSettings};
pub use salesforce::{SalesforceConnector, SalesforceSettings};
pub use servicenow::{ServiceNowConnector, ServiceNowSettings};
