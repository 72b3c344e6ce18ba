//! Microsoft Entra ID and Microsoft 365 discovery connectors.
//!
//! Both read the Microsoft Graph API with an OAuth2 client-credentials
//! token per tenant. `entraid` discovers users, directory roles and
//! applications; `m365` discovers users only.
//!
//! # Example
//!
//! ```no_run
//! use sightline_connector::ConnectorRegistry;
//! use sightline_connector_entra::EntraConnector;
//!
//! let mut registry = ConnectorRegistry::new();
//! registry.register("entraid", || Box::new(EntraConnector::entra_id()));
//! registry.register("m365", || Box::new(EntraConnector::microsoft_365()));
//! ```

mod config;
mod connector;
mod graph;

pub use config::{GraphCloud, GraphSettings, TokenScope};
pub use connector::{EntraConnector, GraphProfile};
pub use graph::{GraphClient, ODataPage};
