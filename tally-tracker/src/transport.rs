//! Transport backends for collector delivery

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};

use crate::error::{TrackerError, TrackerResult};

/// Transport backend interface
///
/// One call is one delivery attempt. Any HTTP status is returned as `Ok`;
/// classifying it is the queue's job. `Err` means the request never produced
/// a response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// POST `body` to `url` and return the response status
    async fn post(&self, url: &str, body: String) -> TrackerResult<u16>;
}

/// HTTP transport backed by reqwest
///
/// Sends `text/plain` bodies so browsers-in-the-middle never preflight, and
/// keeps a cookie store so collector cookies ride along with every send.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a cookie-enabled client
    pub fn new() -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(concat!("tally-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn post(&self, url: &str, body: String) -> TrackerResult<u16> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=UTF-8"))
            .body(body)
            .send()
            .await
            .map_err(|e| TrackerError::Transport(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}

/// Transport that accepts everything without sending (dry runs)
#[derive(Debug, Default, Clone)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    fn name(&self) -> &str {
        "null"
    }

    async fn post(&self, _url: &str, _body: String) -> TrackerResult<u16> {
        Ok(204)
    }
}
