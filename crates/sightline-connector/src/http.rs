//! Shared HTTP client for REST-style vendors.
//!
//! Every request goes through two nested loops. The inner one honours
//! throttling responses: it sleeps for the server's hint and reissues the
//! request, up to the [`RateLimitPolicy`] cap. The outer one is the
//! [`RetryPolicy`] and only sees what the inner loop gives up on, so
//! rate-limit waits never consume retry attempts.

use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};
use crate::resilience::{RateLimitPolicy, RetryPolicy};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("sightline/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 512;

/// Decoded response body plus the headers some vendors page through.
#[derive(Debug, Clone)]
pub struct VendorResponse {
    pub body: Value,
    pub headers: HeaderMap,
}

impl VendorResponse {
    /// `rel="next"` target of an RFC 8288 `Link` header.
    #[must_use]
    pub fn next_link(&self) -> Option<String> {
        next_link(&self.headers)
    }
}

/// Outgoing authentication for one request.
#[derive(Debug, Clone, Copy)]
pub enum RequestAuth<'a> {
    None,
    Bearer(&'a SecretString),
}

impl RequestAuth<'_> {
    fn apply(self, request: RequestBuilder) -> RequestBuilder {
        match self {
            RequestAuth::None => request,
            RequestAuth::Bearer(token) => request.bearer_auth(token.expose_secret()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RequestBody<'a> {
    Empty,
    Form(&'a [(&'a str, String)]),
    Json(&'a Value),
}

impl RequestBody<'_> {
    fn apply(self, request: RequestBuilder) -> RequestBuilder {
        match self {
            RequestBody::Empty => request,
            RequestBody::Form(form) => request.form(form),
            RequestBody::Json(body) => request.json(body),
        }
    }
}

/// HTTP client wrapped in retry and rate-limit policies.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct VendorHttp {
    client: Client,
    retry: RetryPolicy,
    rate_limit: RateLimitPolicy,
}

impl Default for VendorHttp {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), RateLimitPolicy::default())
    }
}

impl VendorHttp {
    #[must_use]
    pub fn new(retry: RetryPolicy, rate_limit: RateLimitPolicy) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self::with_client(client, retry, rate_limit)
    }

    #[must_use]
    pub fn with_client(client: Client, retry: RetryPolicy, rate_limit: RateLimitPolicy) -> Self {
        Self {
            client,
            retry,
            rate_limit,
        }
    }

    /// Same client, different policies.
    #[must_use]
    pub fn with_policies(&self, retry: RetryPolicy, rate_limit: RateLimitPolicy) -> Self {
        Self::with_client(self.client.clone(), retry, rate_limit)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn rate_limit_policy(&self) -> &RateLimitPolicy {
        &self.rate_limit
    }

    /// GET `url` and decode a JSON body.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        auth: RequestAuth<'_>,
    ) -> ConnectorResult<VendorResponse> {
        let call = format!("GET {}", strip_query(url));
        self.retry
            .run(&call, || {
                self.send_throttled(&call, Method::GET, url, query, RequestBody::Empty, auth)
            })
            .await
    }

    /// POST a JSON body and decode a JSON response.
    ///
    /// For read-only query endpoints, so it is retried like a GET.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        auth: RequestAuth<'_>,
    ) -> ConnectorResult<VendorResponse> {
        let call = format!("POST {}", strip_query(url));
        self.retry
            .run(&call, || {
                self.send_throttled(&call, Method::POST, url, &[], RequestBody::Json(body), auth)
            })
            .await
    }

    /// POST a form and decode a JSON body.
    ///
    /// Sent once: throttling waits still apply, but failures are returned
    /// to the caller without going through the retry policy. Token
    /// endpoints use this while callers queue on the token cache slot.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
        auth: RequestAuth<'_>,
    ) -> ConnectorResult<VendorResponse> {
        let call = format!("POST {}", strip_query(url));
        self.send_throttled(&call, Method::POST, url, &[], RequestBody::Form(form), auth)
            .await
    }

    /// One request wrapped in the rate-limit policy.
    async fn send_throttled(
        &self,
        call: &str,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: RequestBody<'_>,
        auth: RequestAuth<'_>,
    ) -> ConnectorResult<VendorResponse> {
        self.rate_limit
            .run(call, || self.send_once(call, method.clone(), url, query, body, auth))
            .await
    }

    async fn send_once(
        &self,
        call: &str,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: RequestBody<'_>,
        auth: RequestAuth<'_>,
    ) -> ConnectorResult<VendorResponse> {
        let mut request = self.client.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        let request = auth.apply(body.apply(request));

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();

        if self.rate_limit.is_throttled(status, &headers) {
            return Err(ConnectorError::rate_limited(
                format!("{call} returned {}", status.as_u16()),
                Some(self.rate_limit.wait_hint(&headers)),
            ));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, url, body));
        }

        let text = response.text().await.map_err(map_transport_error)?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                ConnectorError::invalid_data(format!("{call}: response is not JSON: {e}"))
            })?
        };
        debug!(call = %call, status = status.as_u16(), "Vendor call succeeded");
        Ok(VendorResponse { body, headers })
    }
}

fn map_transport_error(e: reqwest::Error) -> ConnectorError {
    if e.is_connect() {
        ConnectorError::connection_failed_with_source(e.to_string(), e)
    } else {
        ConnectorError::network_with_source(e.to_string(), e)
    }
}

fn status_error(status: StatusCode, url: &str, mut body: String) -> ConnectorError {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    ConnectorError::VendorStatus {
        status: status.as_u16(),
        url: strip_query(url).to_string(),
        body,
    }
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Extract the `rel="next"` URL from a `Link` header.
#[must_use]
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(LINK)?.to_str().ok()?;
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}
