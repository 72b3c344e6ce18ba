//! Access token cache with expiry-aware, single-flight refresh.
//!
//! One [`TokenCache`] is created per process and handed to every connector
//! through the [`ConnectorContext`](crate::traits::ConnectorContext). Entries
//! are keyed by tenant or instance. Each key has its own async mutex, so
//! concurrent callers holding an expired entry wait for the first caller's
//! exchange instead of starting their own.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::{ConnectorError, ConnectorResult};

/// Default margin subtracted from the server TTL.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Token returned by a credential exchange.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: SecretString,
    /// Server-declared lifetime; `None` for tokens that never expire.
    pub expires_in: Option<Duration>,
}

/// Something that can trade credentials for an access token.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self) -> ConnectorResult<IssuedToken>;
}

/// A pre-issued token such as a personal access token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub SecretString);

#[async_trait]
impl CredentialExchange for StaticToken {
    async fn exchange(&self) -> ConnectorResult<IssuedToken> {
        Ok(IssuedToken {
            access_token: self.0.clone(),
            expires_in: None,
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_valid(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

/// Process-wide token cache keyed by tenant/instance identifier.
#[derive(Debug)]
pub struct TokenCache {
    slots: RwLock<HashMap<String, Slot>>,
    safety_margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_safety_margin(DEFAULT_SAFETY_MARGIN)
    }

    #[must_use]
    pub fn with_safety_margin(safety_margin: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            safety_margin,
        }
    }

    /// Return the cached token for `key`, exchanging credentials if the
    /// entry is missing or past `issued_at + ttl - safety_margin`.
    ///
    /// Exchange failures surface as `AuthenticationFailed` and are not
    /// retried here.
    #[instrument(skip(self, exchange))]
    pub async fn get_token(
        &self,
        key: &str,
        exchange: &dyn CredentialExchange,
    ) -> ConnectorResult<SecretString> {
        let slot = self.slot(key).await;
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.is_valid(Instant::now()) {
                debug!("Using cached token");
                return Ok(cached.token.clone());
            }
        }

        debug!("Exchanging credentials for a new token");
        let issued_at = Instant::now();
        let issued = exchange.exchange().await.map_err(|e| match e {
            ConnectorError::AuthenticationFailed { .. } => e,
            other => ConnectorError::auth(format!("credential exchange for '{key}' failed: {other}")),
        })?;

        let expires_at = issued
            .expires_in
            .map(|ttl| issued_at + ttl.saturating_sub(self.safety_margin));

        *entry = Some(CachedToken {
            token: issued.access_token.clone(),
            expires_at,
        });

        Ok(issued.access_token)
    }

    /// Drop the entry for `key`, forcing an exchange on next use.
    pub async fn invalidate(&self, key: &str) {
        let slot = self.slots.read().await.get(key).cloned();
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }

    async fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}
