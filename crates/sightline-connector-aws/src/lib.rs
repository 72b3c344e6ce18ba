//! # AWS Connector
//!
//! Discovers IAM users and roles and every tagged resource reachable
//! through the Resource Groups Tagging API.
//!
//! One scope per entry of `regions`:
//!
//! ```yaml
//! aws:
//!   enabled: true
//!   config:
//!     regions: [us-east-1, eu-west-1]
//!     max_workers: 2
//! ```
//!
//! Credentials come from the default AWS chain unless `access_key_id` and
//! `secret_access_key` are set on the scope.

pub mod config;
pub mod connector;
pub mod error;
pub mod records;

pub use config::AwsSettings;
pub use connector::AwsConnector;
