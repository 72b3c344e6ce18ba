//! Active Directory discovery connector.
//!
//! Uses the synchronous `ldap3::LdapConn`, so the connector declares
//! [`ExecutionMode::Blocking`] and never touches tokio itself.

use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, SearchResult};
use secrecy::ExposeSecret;
use sightline_connector::prelude::*;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::AdSettings;
use crate::entry::to_record;
use crate::filter::{incremental, object_class_filter, COMPUTER_FILTER, USER_FILTER};

const RC_SUCCESS: u32 = 0;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_CREDENTIALS: u32 = 49;

/// AD connector, registered as `ad`.
///
/// Scopes fan out over `domains`; each domain gets its own connection per
/// fetch.
#[derive(Debug, Default)]
pub struct AdConnector {
    initialized: bool,
}

impl AdConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn settings(&self, scope: &Scope) -> ConnectorResult<AdSettings> {
        if !self.initialized {
            return Err(ConnectorError::NotInitialized {
                connector: self.name().to_string(),
            });
        }
        let settings: AdSettings = scope.settings()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[async_trait]
impl DiscoveryConnector for AdConnector {
    fn name(&self) -> &str {
        "ad"
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            scope
                .settings::<AdSettings>()
                .and_then(|settings| settings.validate())
                .map_err(|e| ConnectorError::invalid_config(format!("domain '{}': {e}", scope.label)))?;
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, _ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.initialized = true;
        info!(connector = self.name(), "AD connector initialized");
        Ok(())
    }

    #[instrument(skip(self, scope), fields(connector = "ad", domain = %scope.label))]
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let settings = self.settings(scope)?;
        let watermark = scope.watermark();
        let mut session = AdSession::open(&settings)?;

        let result = async {
            let mut records = session
                .search_all(
                    &incremental(USER_FILTER, watermark.as_ref()),
                    &settings.attributes,
                    ObjectType::User,
                )
                .await?;
            records.extend(
                session
                    .search_all(
                        &incremental(COMPUTER_FILTER, watermark.as_ref()),
                        &settings.computer_attributes,
                        ObjectType::Computer,
                    )
                    .await?,
            );
            Ok::<_, ConnectorError>(records)
        }
        .await;
        session.close();

        let records = result?;
        debug!(count = records.len(), "AD identities fetched");
        Ok(records)
    }

    #[instrument(skip(self, scope), fields(connector = "ad", domain = %scope.label))]
    async fn fetch_resources(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let settings = self.settings(scope)?;
        let filter = incremental(
            &object_class_filter(&settings.resource_classes),
            scope.watermark().as_ref(),
        );
        let mut session = AdSession::open(&settings)?;
        let records = session
            .search_all(&filter, &settings.resource_attributes, ObjectType::Resource)
            .await;
        session.close();
        records
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Blocking
    }

    fn concurrency_key(&self) -> Option<&'static str> {
        Some("max_workers")
    }
}

/// A bound connection to one domain controller.
struct AdSession<'a> {
    conn: LdapConn,
    settings: &'a AdSettings,
    retry: RetryPolicy,
}

impl<'a> AdSession<'a> {
    /// Connect (retried) and bind (not retried, to avoid lockouts).
    fn open(settings: &'a AdSettings) -> ConnectorResult<Self> {
        let retry = settings.rate_limit_retry.retry_policy();
        let mut conn = retry.run_blocking("ldap connect", || {
            let conn_settings = LdapConnSettings::new()
                .set_conn_timeout(Duration::from_secs(settings.connect_timeout_secs))
                .set_starttls(settings.starttls)
                .set_no_tls_verify(settings.no_tls_verify);
            LdapConn::with_settings(conn_settings, &settings.server).map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("failed to connect to {}", settings.server),
                    e,
                )
            })
        })?;

        debug!(bind_dn = %settings.user, "Performing LDAP bind");
        let result = conn
            .simple_bind(&settings.user, settings.password.expose_secret())
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("LDAP bind failed for {}", settings.user),
                    e,
                )
            })?;
        check_result("bind", result.rc, &result.text)?;

        info!(server = %settings.server, "LDAP connection established");
        Ok(Self {
            conn,
            settings,
            retry,
        })
    }

    /// Run a paged subtree search to completion.
    async fn search_all(
        &mut self,
        filter: &str,
        attributes: &[String],
        object_type: ObjectType,
    ) -> ConnectorResult<Vec<RawRecord>> {
        let records = search_pages(|cookie| self.search_page(filter, attributes, object_type, cookie)).await?;
        debug!(filter, count = records.len(), "LDAP search complete");
        Ok(records)
    }

    fn search_page(
        &mut self,
        filter: &str,
        attributes: &[String],
        object_type: ObjectType,
        cookie: &[u8],
    ) -> ConnectorResult<(Vec<RawRecord>, Option<PageCursor>)> {
        let Self {
            conn,
            settings,
            retry,
        } = self;
        let base_dn = settings.base_dn.as_str();
        let size = settings.page_size;

        let SearchResult(entries, result) = retry.run_blocking("ldap search", || {
            let response = conn
                .with_controls(PagedResults {
                    size,
                    cookie: cookie.to_vec(),
                })
                .search(base_dn, ldap3::Scope::Subtree, filter, attributes)
                .map_err(|e| ConnectorError::network_with_source("LDAP search failed", e))?;
            check_result("search", response.1.rc, &response.1.text)?;
            Ok(response)
        })?;

        let records = entries
            .into_iter()
            .map(|entry| to_record(object_type, ldap3::SearchEntry::construct(entry)))
            .collect();
        Ok((records, next_cookie(&result.ctrls)))
    }

    fn close(mut self) {
        if let Err(e) = self.conn.unbind() {
            warn!(error = %e, server = %self.settings.server, "LDAP unbind failed");
        }
    }
}

/// Feed paged-results cookies through the shared page loop.
///
/// The first request carries an empty cookie; the loop stops on an empty or
/// repeated cookie. Each search runs synchronously, so the page future is
/// already resolved when the loop awaits it.
async fn search_pages<F>(mut search: F) -> ConnectorResult<Vec<RawRecord>>
where
    F: FnMut(&[u8]) -> ConnectorResult<(Vec<RawRecord>, Option<PageCursor>)>,
{
    collect_pages(None, |cursor| {
        let cookie = match cursor {
            Some(PageCursor::Cookie(cookie)) => cookie,
            _ => Vec::new(),
        };
        std::future::ready(search(&cookie).map(|(records, next)| Page::new(records, next)))
    })
    .await
}

/// Cookie from the paged-results response control, if the server sent one.
fn next_cookie(ctrls: &[Control]) -> Option<PageCursor> {
    ctrls.iter().find_map(|Control(kind, raw)| match kind {
        Some(ControlType::PagedResults) => Some(PageCursor::Cookie(raw.parse::<PagedResults>().cookie)),
        _ => None,
    })
}

/// Map an LDAP result code onto the error taxonomy.
fn check_result(operation: &str, rc: u32, text: &str) -> ConnectorResult<()> {
    match rc {
        RC_SUCCESS => Ok(()),
        RC_INVALID_CREDENTIALS => Err(ConnectorError::auth(format!(
            "LDAP {operation} rejected credentials: {text}"
        ))),
        RC_NO_SUCH_OBJECT => Err(ConnectorError::invalid_config(format!(
            "LDAP {operation} base does not exist: {text}"
        ))),
        rc => Err(ConnectorError::network(format!(
            "LDAP {operation} failed with code {rc}: {text}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn blob(value: Value) -> ConfigBlob {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn domain(server: &str) -> Value {
        json!({
            "server": server,
            "user": "CN=svc,DC=example,DC=com",
            "password": "pw",
            "base_dn": "DC=example,DC=com"
        })
    }

    #[test]
    fn test_result_codes() {
        assert!(check_result("bind", 0, "").is_ok());
        assert!(matches!(
            check_result("bind", 49, "80090308: LdapErr"),
            Err(ConnectorError::AuthenticationFailed { .. })
        ));
        assert!(check_result("search", 32, "no such object").unwrap_err().is_config_error());
        assert!(check_result("search", 51, "busy").unwrap_err().is_retryable());
    }

    #[test]
    fn test_validate_each_domain() {
        let connector = AdConnector::new();
        let good = blob(json!({"domains": [domain("ldaps://dc1"), domain("ldap://dc2")]}));
        assert!(connector.validate_config(&good).is_ok());

        let bad = blob(json!({"domains": [domain("ldaps://dc1"), domain("dc2.example.com")]}));
        let err = connector.validate_config(&bad).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("dc2.example.com"));
    }

    #[test]
    fn test_declares_blocking() {
        let connector = AdConnector::new();
        assert_eq!(connector.execution_mode(), ExecutionMode::Blocking);
        assert_eq!(connector.name(), "ad");
        assert!(connector.scope_tag().is_none());
    }

    fn page(ids: &[&str], cookie: &[u8]) -> ConnectorResult<(Vec<RawRecord>, Option<PageCursor>)> {
        let records = ids
            .iter()
            .map(|id| RawRecord::new(ObjectType::User, blob(json!({"objectGUID": id}))))
            .collect();
        Ok((records, Some(PageCursor::Cookie(cookie.to_vec()))))
    }

    #[test]
    fn test_search_pages_follows_cookies_until_empty() {
        let mut seen: Vec<Vec<u8>> = Vec::new();
        let records = futures::executor::block_on(search_pages(|cookie| {
            seen.push(cookie.to_vec());
            match cookie {
                b"" => page(&["a", "b"], b"c1"),
                b"c1" => page(&["c"], b"c2"),
                _ => page(&["d"], b""),
            }
        }))
        .unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(seen, vec![b"".to_vec(), b"c1".to_vec(), b"c2".to_vec()]);
    }

    #[test]
    fn test_search_pages_stops_on_repeated_cookie() {
        let mut calls = 0;
        let records = futures::executor::block_on(search_pages(|_| {
            calls += 1;
            page(&["a"], b"same")
        }))
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_fetch_before_initialize() {
        let connector = AdConnector::new();
        let scope = Scope::single(blob(domain("ldaps://dc1")));
        let err = futures::executor::block_on(connector.fetch_identities(&scope)).unwrap_err();
        assert!(matches!(err, ConnectorError::NotInitialized { .. }));
    }

    #[test]
    fn test_unreachable_server_exhausts_connect_retries() {
        let mut connector = AdConnector::new();
        futures::executor::block_on(connector.initialize(&ConfigBlob::new(), &ConnectorContext::default()))
            .unwrap();

        let mut config = domain("ldap://127.0.0.1:1");
        config["connect_timeout_secs"] = json!(2);
        config["retry"] = json!({"max_attempts": 2, "base_delay": 0.001, "max_delay": 0.01});
        let scope = Scope::single(blob(config));

        let err = futures::executor::block_on(connector.fetch_resources(&scope)).unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::RetriesExhausted { attempts: 2, .. }
        ));
    }
}
