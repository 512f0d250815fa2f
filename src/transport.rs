//! HTTP boundary to the Bot API.
//!
//! Dispatch logic talks to a [`Transport`] so it can be driven by an
//! in-process double in tests; [`HttpTransport`] is the reqwest version.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Raw HTTP reply: status code and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn envelope(&self) -> Option<ApiEnvelope> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Failure before any HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Connection(String),
    Timeout,
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportFailure::Connection(reason) => write!(f, "connection error: {}", reason),
            TransportFailure::Timeout => f.write_str("request timed out"),
        }
    }
}

pub type TransportResult = std::result::Result<HttpReply, TransportFailure>;

/// The Bot API response envelope: `{"ok": bool, "result": ..., "description": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

pub trait Transport: Send + Sync + 'static {
    fn get(&self, url: &str) -> impl Future<Output = TransportResult> + Send;

    fn post_form(
        &self,
        url: &str,
        fields: Vec<(String, String)>,
    ) -> impl Future<Output = TransportResult> + Send;

    fn post_multipart(
        &self,
        url: &str,
        content_type: String,
        body: Vec<u8>,
    ) -> impl Future<Output = TransportResult> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    async fn finish(request: reqwest::RequestBuilder) -> TransportResult {
        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(HttpReply { status, body })
    }
}

fn classify(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout
    } else {
        // reqwest puts the full URL, API key included, into its messages.
        TransportFailure::Connection(err.without_url().to_string())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> impl Future<Output = TransportResult> + Send {
        let request = self.client.get(url);
        Self::finish(request)
    }

    fn post_form(
        &self,
        url: &str,
        fields: Vec<(String, String)>,
    ) -> impl Future<Output = TransportResult> + Send {
        let request = self.client.post(url).form(&fields);
        Self::finish(request)
    }

    fn post_multipart(
        &self,
        url: &str,
        content_type: String,
        body: Vec<u8>,
    ) -> impl Future<Output = TransportResult> + Send {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        Self::finish(request)
    }
}

/// `https://api.telegram.org/bot<key>/<method>`
pub fn method_url(api_base: &str, api_key: &str, method: &str) -> String {
    format!("{}/bot{}/{}", api_base.trim_end_matches('/'), api_key, method)
}

pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() > 10 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "[REDACTED]".to_string()
    }
}
