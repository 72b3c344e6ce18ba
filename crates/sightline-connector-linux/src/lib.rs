//! # Linux Connector
//!
//! Linux and Unix host discovery for sightline over SSH.
//!
//! Reads `/etc/passwd` and `/etc/group` for local accounts, flagging
//! members of privilege groups (`sudo` and `wheel` by default), and lists
//! NFS exports, Samba shares and CUPS printers as resources.
//!
//! ## Example
//!
//! ```ignore
//! use sightline_connector::prelude::*;
//! use sightline_connector_linux::LinuxConnector;
//!
//! let mut registry = ConnectorRegistry::new();
//! registry.register("linux", || Box::new(LinuxConnector::new()));
//! ```

pub mod config;
pub mod connector;
pub mod parse;

pub use config::{LinuxSettings, ResourceKind};
pub use connector::LinuxConnector;
