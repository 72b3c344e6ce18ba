//! Kafka connection configuration.

use crate::error::EventError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CLIENT_ID: &str = "sightline-discovery";
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;

/// Security protocol for the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl FromStr for SecurityProtocol {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLAINTEXT" => Ok(Self::Plaintext),
            "SSL" => Ok(Self::Ssl),
            "SASL_PLAINTEXT" => Ok(Self::SaslPlaintext),
            "SASL_SSL" => Ok(Self::SaslSsl),
            _ => Err(EventError::ConfigInvalid {
                var: "KAFKA_SECURITY_PROTOCOL".to_string(),
                reason: format!("Unknown protocol: {s}"),
            }),
        }
    }
}

impl SecurityProtocol {
    /// librdkafka spelling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::Ssl => "SSL",
            Self::SaslPlaintext => "SASL_PLAINTEXT",
            Self::SaslSsl => "SASL_SSL",
        }
    }

    fn requires_sasl(&self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    ScramSha256,
    ScramSha512,
}

impl FromStr for SaslMechanism {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PLAIN" => Ok(Self::Plain),
            "SCRAM_SHA_256" => Ok(Self::ScramSha256),
            "SCRAM_SHA_512" => Ok(Self::ScramSha512),
            _ => Err(EventError::ConfigInvalid {
                var: "KAFKA_SASL_MECHANISM".to_string(),
                reason: format!("Unknown mechanism: {s}"),
            }),
        }
    }
}

impl SaslMechanism {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaslCredentials {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

/// Kafka connection configuration.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses.
    pub bootstrap_servers: String,
    pub security_protocol: SecurityProtocol,
    /// Required when the protocol uses SASL.
    pub sasl: Option<SaslCredentials>,
    pub client_id: String,
    /// How long one send may wait in the local queue.
    pub send_timeout: Duration,
}

impl KafkaConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `KAFKA_BOOTSTRAP_SERVERS`: Comma-separated broker list
    ///
    /// Optional:
    /// - `KAFKA_SECURITY_PROTOCOL`: PLAINTEXT (default), SSL, `SASL_PLAINTEXT`, `SASL_SSL`
    /// - `KAFKA_CLIENT_ID`: Client identifier (default: "sightline-discovery")
    /// - `KAFKA_SEND_TIMEOUT_MS`: Per-record queue timeout (default: 5000)
    /// - `KAFKA_SASL_MECHANISM`, `KAFKA_SASL_USERNAME`, `KAFKA_SASL_PASSWORD`:
    ///   required when the protocol uses SASL
    pub fn from_env() -> Result<Self, EventError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EventError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |var: &str| {
            lookup(var).ok_or_else(|| EventError::ConfigMissing {
                var: var.to_string(),
            })
        };

        let bootstrap_servers = require("KAFKA_BOOTSTRAP_SERVERS")?;

        let security_protocol = match lookup("KAFKA_SECURITY_PROTOCOL") {
            Some(v) => SecurityProtocol::from_str(&v)?,
            None => SecurityProtocol::Plaintext,
        };

        let client_id = lookup("KAFKA_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let send_timeout_ms = match lookup("KAFKA_SEND_TIMEOUT_MS") {
            Some(v) => v.parse::<u64>().map_err(|e| EventError::ConfigInvalid {
                var: "KAFKA_SEND_TIMEOUT_MS".to_string(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_SEND_TIMEOUT_MS,
        };

        let sasl = if security_protocol.requires_sasl() {
            Some(SaslCredentials {
                mechanism: SaslMechanism::from_str(&require("KAFKA_SASL_MECHANISM")?)?,
                username: require("KAFKA_SASL_USERNAME")?,
                password: require("KAFKA_SASL_PASSWORD")?,
            })
        } else {
            None
        };

        Ok(Self {
            bootstrap_servers,
            security_protocol,
            sasl,
            client_id,
            send_timeout: Duration::from_millis(send_timeout_ms),
        })
    }

    #[must_use]
    pub fn builder() -> KafkaConfigBuilder {
        KafkaConfigBuilder::new()
    }
}

/// Builder for `KafkaConfig`.
#[derive(Debug, Default)]
pub struct KafkaConfigBuilder {
    bootstrap_servers: Option<String>,
    security_protocol: Option<SecurityProtocol>,
    sasl: Option<SaslCredentials>,
    client_id: Option<String>,
    send_timeout: Option<Duration>,
}

impl KafkaConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    #[must_use]
    pub fn security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.security_protocol = Some(protocol);
        self
    }

    #[must_use]
    pub fn sasl(mut self, mechanism: SaslMechanism, username: String, password: String) -> Self {
        self.sasl = Some(SaslCredentials {
            mechanism,
            username,
            password,
        });
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<KafkaConfig, EventError> {
        let bootstrap_servers = self.bootstrap_servers.ok_or(EventError::ConfigMissing {
            var: "bootstrap_servers".to_string(),
        })?;

        let security_protocol = self
            .security_protocol
            .unwrap_or(SecurityProtocol::Plaintext);

        if security_protocol.requires_sasl() && self.sasl.is_none() {
            return Err(EventError::ConfigMissing {
                var: "sasl_credentials".to_string(),
            });
        }

        Ok(KafkaConfig {
            bootstrap_servers,
            security_protocol,
            sasl: self.sasl,
            client_id: self
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            send_timeout: self
                .send_timeout
                .unwrap_or(Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_security_protocol_from_str() {
        assert_eq!(
            "sasl_ssl".parse::<SecurityProtocol>().unwrap(),
            SecurityProtocol::SaslSsl
        );
        assert!("INVALID".parse::<SecurityProtocol>().is_err());
    }

    #[test]
    fn test_sasl_mechanism_from_str() {
        assert_eq!(
            "SCRAM-SHA-512".parse::<SaslMechanism>().unwrap(),
            SaslMechanism::ScramSha512
        );
        assert!("INVALID".parse::<SaslMechanism>().is_err());
    }

    #[test]
    fn test_lookup_defaults() {
        let config =
            KafkaConfig::from_lookup(lookup_from(&[("KAFKA_BOOTSTRAP_SERVERS", "kafka:9092")]))
                .unwrap();

        assert_eq!(config.bootstrap_servers, "kafka:9092");
        assert_eq!(config.client_id, "sightline-discovery");
        assert_eq!(config.security_protocol, SecurityProtocol::Plaintext);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert!(config.sasl.is_none());
    }

    #[test]
    fn test_lookup_missing_bootstrap() {
        match KafkaConfig::from_lookup(lookup_from(&[])) {
            Err(EventError::ConfigMissing { var }) => assert_eq!(var, "KAFKA_BOOTSTRAP_SERVERS"),
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_lookup_sasl_requires_credentials() {
        let result = KafkaConfig::from_lookup(lookup_from(&[
            ("KAFKA_BOOTSTRAP_SERVERS", "kafka:9093"),
            ("KAFKA_SECURITY_PROTOCOL", "SASL_SSL"),
            ("KAFKA_SASL_MECHANISM", "PLAIN"),
        ]));
        match result {
            Err(EventError::ConfigMissing { var }) => assert_eq!(var, "KAFKA_SASL_USERNAME"),
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_lookup_rejects_bad_timeout() {
        let result = KafkaConfig::from_lookup(lookup_from(&[
            ("KAFKA_BOOTSTRAP_SERVERS", "kafka:9092"),
            ("KAFKA_SEND_TIMEOUT_MS", "soon"),
        ]));
        assert!(matches!(result, Err(EventError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_builder_sasl_without_credentials() {
        let result = KafkaConfig::builder()
            .bootstrap_servers("localhost:9092")
            .security_protocol(SecurityProtocol::SaslSsl)
            .build();

        match result {
            Err(EventError::ConfigMissing { var }) => assert_eq!(var, "sasl_credentials"),
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }
}
