//! HTTP transport for JSON connectors and webhook sinks.
//!
//! Callers never look at raw status codes: [`HttpResponse::error_for_status`]
//! turns a non-2xx answer into an [`HttpError::Status`] carrying a
//! [`StatusClass`], and [`HttpError::is_transient`] says whether a retry can help.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// One outgoing call. A request with a body is sent as a JSON `POST`,
/// anything else as a `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub json_body: Option<String>,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            json_body: None,
            bearer_token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            json_body: Some(body.into()),
            ..Self::get(url)
        }
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer_token = token.map(str::to_owned);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How a non-2xx status should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 429
    Throttled,
    /// 404
    Missing,
    /// 5xx
    Unavailable,
    /// Any other status: the request itself was refused.
    Rejected,
}

impl StatusClass {
    pub const fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            429 => Self::Throttled,
            404 => Self::Missing,
            500..=599 => Self::Unavailable,
            _ => Self::Rejected,
        }
    }

    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub const fn class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }

    /// Pass 2xx responses through; turn everything else into an error.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        match self.class() {
            StatusClass::Success => Ok(self),
            class => Err(HttpError::Status {
                status: self.status,
                class,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("HTTP {status}")]
    Status { status: u16, class: StatusClass },
}

impl HttpError {
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::InvalidRequest(_) => false,
            Self::Transport(_) => true,
            Self::Status { class, .. } => class.is_transient(),
        }
    }
}

/// Transport contract shared by [`HttpJsonConnector`](crate::connectors::HttpJsonConnector)
/// and [`WebhookSink`](crate::notifier::WebhookSink).
pub trait HttpClient: Send + Sync {
    fn send<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// [`HttpClient`] over a shared `reqwest` connection pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tickgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = match request.json_body {
            Some(body) => self
                .client
                .post(&request.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body),
            None => self.client.get(&request.url),
        };
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.timeout(request.timeout).send().await.map_err(|e| {
            if e.is_builder() {
                HttpError::InvalidRequest(e.to_string())
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Transport(format!("reading body: {e}")))?;
        Ok(HttpResponse { status, body })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(self.round_trip(request))
    }
}
