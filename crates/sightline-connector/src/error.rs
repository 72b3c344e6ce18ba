//! Connector framework error types
//!
//! Error definitions with config/auth/transient classification so that the
//! scheduler can isolate failures at the smallest unit.

use std::time::Duration;
use thiserror::Error;

/// Error that can occur while discovering from an external system.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connection errors (transient)
    /// Failed to establish a connection to the vendor.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network error during communication.
    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Vendor answered with a non-success HTTP status.
    #[error("vendor returned status {status} for {url}: {body}")]
    VendorStatus {
        status: u16,
        url: String,
        body: String,
    },

    // Authentication errors
    /// Credential exchange or bind failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // Configuration errors (permanent)
    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Connector entry has no configuration block.
    #[error("missing configuration for connector '{connector}'")]
    MissingConfiguration { connector: String },

    /// No factory is registered under this name.
    #[error("no connector registered under '{name}'")]
    UnknownConnector { name: String },

    /// Connector was used before `initialize` completed.
    #[error("connector '{connector}' is not initialized")]
    NotInitialized { connector: String },

    // Capability errors
    /// Connector does not implement the requested operation.
    #[error("operation '{operation}' is not supported by this connector")]
    Unsupported { operation: String },

    // Retry errors
    /// Transient-failure retry budget was exhausted.
    #[error("{call} failed after {attempts} attempts")]
    RetriesExhausted {
        call: String,
        attempts: u32,
        #[source]
        source: Box<ConnectorError>,
    },

    /// Vendor asked the caller to slow down. The rate-limit policy waits
    /// and reissues the call; it never reaches the retry policy.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Vendor kept throttling beyond the configured number of waits.
    #[error("{call} still rate limited after {waits} waits")]
    RateLimitExceeded { call: String, waits: u32 },

    // Data errors
    /// Vendor payload could not be interpreted.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Check if this error is transient and the call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectorError::ConnectionFailed { .. } | ConnectorError::NetworkError { .. } => true,
            ConnectorError::VendorStatus { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Check if the transient-failure retry loop should try this call again.
    ///
    /// Broader than [`is_transient`](Self::is_transient): unexpected
    /// payloads and client statuses are retried too. Rejected credentials
    /// are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectorError::AuthenticationFailed { .. }
                | ConnectorError::InvalidConfiguration { .. }
                | ConnectorError::MissingConfiguration { .. }
                | ConnectorError::UnknownConnector { .. }
                | ConnectorError::NotInitialized { .. }
                | ConnectorError::Unsupported { .. }
                | ConnectorError::RateLimitExceeded { .. }
                | ConnectorError::RetriesExhausted { .. }
        )
    }

    /// Check if this is a configuration error (skip the plugin, keep going).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::InvalidConfiguration { .. }
                | ConnectorError::MissingConfiguration { .. }
                | ConnectorError::UnknownConnector { .. }
        )
    }

    /// Check if this error only signals a missing capability.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ConnectorError::Unsupported { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::NetworkError { .. } => "NETWORK_ERROR",
            ConnectorError::VendorStatus { .. } => "VENDOR_STATUS",
            ConnectorError::AuthenticationFailed { .. } => "AUTH_FAILED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::MissingConfiguration { .. } => "MISSING_CONFIG",
            ConnectorError::UnknownConnector { .. } => "UNKNOWN_CONNECTOR",
            ConnectorError::NotInitialized { .. } => "NOT_INITIALIZED",
            ConnectorError::Unsupported { .. } => "UNSUPPORTED",
            ConnectorError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            ConnectorError::RateLimited { .. } => "RATE_LIMITED",
            ConnectorError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a throttling signal for the rate-limit policy.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        ConnectorError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        ConnectorError::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        ConnectorError::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        ConnectorError::InvalidData {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::InvalidData {
            message: err.to_string(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let transient_errors = vec![
            ConnectorError::connection_failed("test"),
            ConnectorError::network("test"),
            ConnectorError::VendorStatus {
                status: 503,
                url: "https://example.com".to_string(),
                body: String::new(),
            },
        ];

        for err in transient_errors {
            assert!(
                err.is_transient(),
                "Expected {} to be transient",
                err.error_code()
            );
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_client_status_is_not_transient() {
        let err = ConnectorError::VendorStatus {
            status: 404,
            url: "https://example.com/users".to_string(),
            body: "not found".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_non_retryable_errors() {
        let errors = vec![
            ConnectorError::invalid_config("bad"),
            ConnectorError::MissingConfiguration {
                connector: "github".to_string(),
            },
            ConnectorError::unsupported("fetch_resources"),
            ConnectorError::RateLimitExceeded {
                call: "GET /users".to_string(),
                waits: 5,
            },
        ];

        for err in errors {
            assert!(
                !err.is_retryable(),
                "Expected {} to not be retryable",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_auth_errors_are_neither_retryable_nor_transient() {
        let err = ConnectorError::auth("bad secret");
        assert!(!err.is_retryable());
        assert!(!err.is_transient());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_config_classification() {
        assert!(ConnectorError::invalid_config("x").is_config_error());
        assert!(ConnectorError::UnknownConnector {
            name: "okta".to_string()
        }
        .is_config_error());
        assert!(!ConnectorError::network("x").is_config_error());
    }

    #[test]
    fn test_retries_exhausted_names_call() {
        let err = ConnectorError::RetriesExhausted {
            call: "GET /v1.0/users".to_string(),
            attempts: 3,
            source: Box::new(ConnectorError::network("reset")),
        };
        assert_eq!(err.to_string(), "GET /v1.0/users failed after 3 attempts");
        assert!(std::error::Error::source(&err).is_some());
    }
}
