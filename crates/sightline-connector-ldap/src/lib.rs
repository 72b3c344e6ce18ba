//! # LDAP Connector
//!
//! Active Directory discovery for sightline.
//!
//! Discovers user and computer accounts and directory-published resources
//! (volumes, print queues, Exchange resources and GPOs by default) from one or more AD
//! domains over LDAP v3.
//!
//! ## Features
//!
//! - LDAPS and STARTTLS
//! - Simple paged results (RFC 2696)
//! - Incremental discovery through `whenChanged`
//! - Multiple domains, discovered concurrently
//!
//! ## Example
//!
//! ```ignore
//! use sightline_connector::prelude::*;
//! use sightline_connector_ldap::AdConnector;
//!
//! let mut registry = ConnectorRegistry::new();
//! registry.register("ad", || Box::new(AdConnector::new()));
//! ```

pub mod config;
pub mod connector;
pub mod entry;
pub mod filter;

pub use config::AdSettings;
pub use connector::AdConnector;
