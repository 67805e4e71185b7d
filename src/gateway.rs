//! Concurrency-bounded network fetches with optional SOCKS identity routing.
//!
//! Every network read in the crate (feed documents, source pages, thumbnail
//! bytes) goes through one [`FetchGateway`]. The gateway holds a process-wide
//! semaphore so no more than `max_connections` requests are ever in flight;
//! callers past the cap simply wait for a slot.
//!
//! The actual I/O sits behind the [`Transport`] trait. [`HttpTransport`] is
//! the reqwest implementation; tests substitute instrumented fakes.

use crate::identity::Credential;
use crate::util::validate_fetch_url;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, COOKIE};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Default concurrency cap
pub const DEFAULT_MAX_CONNECTIONS: usize = 30;

const MAX_BODY_SIZE: usize = 50 * 1024 * 1024; // 50MB

/// Errors from a single fetch attempt. None of these are retried here.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, proxy handshake, or body read failure
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response with a non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// URL failed to parse or used a non-http(s) scheme
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Requested content kind is neither `text` nor `bytes`
    #[error("Unknown content type: {0}")]
    UnsupportedContentKind(String),
    /// SOCKS proxy address could not be built from the credential
    #[error("Proxy configuration error: {0}")]
    Proxy(String),
    /// The gateway was shut down with [`FetchGateway::close`]
    #[error("Fetch gateway is shut down")]
    Closed,
}

/// How the response body should be returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Bytes,
}

impl FromStr for ContentKind {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentKind::Text),
            "bytes" => Ok(ContentKind::Bytes),
            other => Err(FetchError::UnsupportedContentKind(other.to_owned())),
        }
    }
}

/// A fetched response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Bytes(Vec<u8>),
}

impl Content {
    /// Body as bytes, regardless of how it was fetched.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Content::Text(s) => s.into_bytes(),
            Content::Bytes(b) => b,
        }
    }

    /// Body as text; byte bodies are decoded lossily.
    pub fn into_text(self) -> String {
        match self {
            Content::Text(s) => s,
            Content::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
        }
    }
}

/// One network round trip. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        identity: Option<&Credential>,
        kind: ContentKind,
    ) -> Result<Content, FetchError>;
}

/// Fetch entry point shared by every task in the process.
///
/// Cloning is cheap and clones share the same concurrency budget.
#[derive(Clone)]
pub struct FetchGateway {
    permits: Arc<Semaphore>,
    max_connections: usize,
    transport: Arc<dyn Transport>,
}

impl FetchGateway {
    /// Creates a gateway allowing at most `max_connections` concurrent
    /// fetches (a cap of zero is bumped to one).
    pub fn new(transport: Arc<dyn Transport>, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            transport,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Free slots right now. Mostly useful for tests and diagnostics.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stops admitting fetches. Callers still waiting for a slot, and every
    /// later call, fail with [`FetchError::Closed`]; fetches already holding
    /// a slot run to completion.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Fetches `url`, waiting for a free slot first.
    ///
    /// With `identity`, the request is routed through the SOCKS proxy
    /// authenticated as that credential. The slot is held by an RAII permit,
    /// so it is released on success, on error, and when the future is
    /// dropped mid-flight.
    ///
    /// # Errors
    ///
    /// Any [`FetchError`] from the transport, unchanged.
    pub async fn fetch(
        &self,
        url: &str,
        identity: Option<&Credential>,
        kind: ContentKind,
    ) -> Result<Content, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        tracing::debug!(
            url = %url,
            proxied = identity.is_some(),
            kind = ?kind,
            "Fetching"
        );
        self.transport.get(url, identity, kind).await
    }
}

impl std::fmt::Debug for FetchGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchGateway")
            .field("max_connections", &self.max_connections)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

/// reqwest-backed transport.
///
/// Direct requests share one client. Proxied requests get a client bound to
/// a `socks5h://` proxy carrying the credential, since proxy settings are
/// per client in reqwest; Tor isolates streams by those SOCKS credentials.
pub struct HttpTransport {
    direct: reqwest::Client,
    proxy_host: String,
    proxy_port: u16,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// # Arguments
    ///
    /// * `proxy_host` / `proxy_port` - local SOCKS5 proxy (Tor is `127.0.0.1:9050`)
    /// * `timeout` - optional whole-request timeout; `None` waits indefinitely
    pub fn new(
        proxy_host: impl Into<String>,
        proxy_port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        let direct = Self::client_builder().build()?;
        Ok(Self {
            direct,
            proxy_host: proxy_host.into(),
            proxy_port,
            timeout,
        })
    }

    /// Fails unless something accepts TCP connections at the proxy address.
    ///
    /// Only proves a listener exists, not that it speaks SOCKS; a missing Tor
    /// daemon is reported up front instead of as one network error per feed.
    pub async fn check_proxy(&self, within: Duration) -> Result<(), FetchError> {
        let addr = format!("{}:{}", self.proxy_host, self.proxy_port);
        match tokio::time::timeout(within, tokio::net::TcpStream::connect(addr.as_str())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(FetchError::Proxy(format!("no proxy listening on {addr}: {e}"))),
            Err(_) => Err(FetchError::Proxy(format!("connecting to proxy {addr} timed out"))),
        }
    }

    fn client_builder() -> reqwest::ClientBuilder {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));
        // Skips the consent interstitial on the video site
        headers.insert(COOKIE, HeaderValue::from_static("CONSENT=YES+"));
        reqwest::Client::builder().default_headers(headers)
    }

    fn client_for(&self, identity: Option<&Credential>) -> Result<reqwest::Client, FetchError> {
        let Some(identity) = identity else {
            return Ok(self.direct.clone());
        };

        let proxy_url = identity
            .proxy_url(&self.proxy_host, self.proxy_port)
            .map_err(|e| FetchError::Proxy(e.to_string()))?;
        let proxy = reqwest::Proxy::all(proxy_url.as_str())?;
        Ok(Self::client_builder().proxy(proxy).build()?)
    }

    async fn get_inner(
        &self,
        url: &str,
        identity: Option<&Credential>,
        kind: ContentKind,
    ) -> Result<Content, FetchError> {
        let client = self.client_for(identity)?;
        let response = client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_BODY_SIZE).await?;
        Ok(match kind {
            ContentKind::Text => Content::Text(String::from_utf8_lossy(&bytes).into_owned()),
            ContentKind::Bytes => Content::Bytes(bytes),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        identity: Option<&Credential>,
        kind: ContentKind,
    ) -> Result<Content, FetchError> {
        validate_fetch_url(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.get_inner(url, identity, kind))
                .await
                .map_err(|_| FetchError::Timeout)?,
            None => self.get_inner(url, identity, kind).await,
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
