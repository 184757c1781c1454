//! HTTP transport to the rendezvous server
//!
//! One request, one response, no protocol interpretation. Non-2xx statuses are
//! returned to the caller, which owns the retry policy.

use crate::PeerId;
use crate::config::ClientConfig;
use crate::error::{ConfigError, TransportError};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, PRAGMA};
use reqwest::{RequestBuilder, StatusCode, Url};
use std::time::Duration;
use tracing::trace;

/// Query parameters of a request; values are URL-escaped by the transport
pub type Query<'a> = [(&'a str, String)];

/// A response from the rendezvous server
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body, decoded as UTF-8
    pub body: String,
}

impl HttpResponse {
    /// Response with the given status, body and no headers
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Attach a `Pragma` header naming `peer`
    pub fn with_pragma(mut self, peer: PeerId) -> Self {
        self.headers.insert(PRAGMA, HeaderValue::from(peer.0));
        self
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Peer id carried in the `Pragma` header
    ///
    /// `Ok(None)` when the header is absent or empty, an error when it is
    /// present but not a peer id.
    pub fn pragma_peer_id(&self) -> Result<Option<PeerId>, TransportError> {
        let Some(value) = self.headers.get(PRAGMA) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| TransportError::MalformedResponse("non-ASCII Pragma header".into()))?
            .trim();
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse()
            .map(Some)
            .map_err(|_| TransportError::MalformedResponse(format!("bad Pragma header {value:?}")))
    }
}

/// Individual GET/POST requests against the rendezvous server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET to `path` with `query`, giving up after `timeout`
    async fn get(
        &self,
        path: &str,
        query: &Query<'_>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    /// Issue a POST of `body` to `path` with `query`, giving up after `timeout`
    async fn post(
        &self,
        path: &str,
        query: &Query<'_>,
        body: String,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest` client
///
/// Dropping an in-flight request future aborts the underlying request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// Build a transport for the server, token and proxy in `config`
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let mut base = Url::parse(&config.server_url).map_err(|e| ConfigError::Invalid {
            field: "server_url",
            message: e.to_string(),
        })?;
        // Url::join replaces the last segment unless the base ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ConfigError::Invalid {
                    field: "auth_token",
                    message: e.to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| ConfigError::Invalid {
                field: "proxy",
                message: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| ConfigError::Invalid {
            field: "http_client",
            message: e.to_string(),
        })?;

        Ok(Self { client, base })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let response = request.timeout(timeout).send().await.map_err(map_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_error)?;
        trace!(%status, bytes = body.len(), "response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        path: &str,
        query: &Query<'_>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.url(path)?;
        trace!(%url, "GET");
        self.execute(self.client.get(url).query(query), timeout).await
    }

    async fn post(
        &self,
        path: &str,
        query: &Query<'_>,
        body: String,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.url(path)?;
        trace!(%url, bytes = body.len(), "POST");
        let request = self
            .client
            .post(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body);
        self.execute(request, timeout).await
    }
}

fn map_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_builder() {
        TransportError::InvalidUrl(error.to_string())
    } else if error.is_body() || error.is_decode() {
        TransportError::MalformedResponse(error.to_string())
    } else {
        TransportError::NetworkUnavailable(error.to_string())
    }
}
