use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, StatusClass};
use crate::source::{FetchError, FetchFuture, FetchRequest, SourceConnector};
use crate::{format_date, Observation, ObservationBatch, ProviderId};

/// Expected response document.
#[derive(Debug, Deserialize)]
struct SeriesDocument {
    observations: Vec<Observation>,
}

/// Connector for endpoints that already serve normalized observations.
///
/// The URL template may contain `{series}`, `{start}` and `{end}`; each is
/// URL-encoded before substitution.
#[derive(Clone)]
pub struct HttpJsonConnector {
    id: ProviderId,
    url_template: String,
    http_client: Arc<dyn HttpClient>,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl HttpJsonConnector {
    pub fn new(id: ProviderId, url_template: impl Into<String>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            id,
            url_template: url_template.into(),
            http_client,
            bearer_token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn endpoint(&self, request: &FetchRequest) -> String {
        self.url_template
            .replace("{series}", &urlencoding::encode(&request.series_key))
            .replace("{start}", &urlencoding::encode(&format_date(request.range.start)))
            .replace("{end}", &urlencoding::encode(&format_date(request.range.end)))
    }

    async fn fetch_document(&self, request: FetchRequest) -> Result<ObservationBatch, FetchError> {
        let http_request = HttpRequest::get(self.endpoint(&request))
            .bearer(self.bearer_token.as_deref())
            .timeout(self.timeout);

        let response = self
            .http_client
            .send(http_request)
            .await
            .and_then(HttpResponse::error_for_status)
            .map_err(|e| self.fetch_error(&request, e))?;

        let document: SeriesDocument = serde_json::from_str(&response.body).map_err(|e| {
            FetchError::malformed(format!("failed to decode {} response: {e}", self.id))
        })?;

        Ok(ObservationBatch::new(
            self.id.clone(),
            request.instrument,
            document.observations,
        ))
    }

    fn fetch_error(&self, request: &FetchRequest, error: HttpError) -> FetchError {
        match error {
            HttpError::Status {
                class: StatusClass::Throttled,
                ..
            } => FetchError::rate_limited(format!("{} rate limited the request", self.id)),
            HttpError::Status {
                class: StatusClass::Missing,
                ..
            } => FetchError::not_found(format!("{} has no series '{}'", self.id, request.series_key)),
            HttpError::InvalidRequest(_)
            | HttpError::Status {
                class: StatusClass::Rejected | StatusClass::Success,
                ..
            } => FetchError::malformed(format!("{}: {error}", self.id)),
            HttpError::Transport(_)
            | HttpError::Status {
                class: StatusClass::Unavailable,
                ..
            } => FetchError::server_error(format!("{}: {error}", self.id)),
        }
    }
}

impl SourceConnector for HttpJsonConnector {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn fetch<'a>(&'a self, request: FetchRequest) -> FetchFuture<'a> {
        Box::pin(self.fetch_document(request))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use time::macros::date;

    use super::*;
    use crate::http_client::HttpFuture;
    use crate::{DateRange, FetchErrorKind, InstrumentId};

    struct CannedClient {
        response: Result<HttpResponse, HttpError>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl CannedClient {
        fn new(response: Result<HttpResponse, HttpError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpClient for CannedClient {
        fn send<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
            self.seen.lock().expect("lock").push(request);
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    fn ok(body: &str) -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn request() -> FetchRequest {
        FetchRequest::new(
            InstrumentId::parse("WTI").expect("id"),
            "PET RWTC/D",
            DateRange::new(date!(2026 - 03 - 02), date!(2026 - 03 - 06)).expect("range"),
        )
    }

    fn connector(client: Arc<CannedClient>) -> HttpJsonConnector {
        HttpJsonConnector::new(
            ProviderId::parse("eia").expect("id"),
            "https://api.example.test/series/{series}?from={start}&to={end}",
            client,
        )
        .with_bearer_token(Some(String::from("demo")))
    }

    #[tokio::test]
    async fn decodes_document_and_encodes_placeholders() {
        let client = CannedClient::new(ok(
            r#"{"observations":[{"date":"2026-03-02","value":71.25,"volume":1200.0}]}"#,
        ));
        let batch = connector(client.clone()).fetch(request()).await.expect("fetch");

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.observations[0].value, Some(71.25));
        let seen = client.seen.lock().expect("lock");
        assert_eq!(
            seen[0].url,
            "https://api.example.test/series/PET%20RWTC%2FD?from=2026-03-02&to=2026-03-06"
        );
        assert_eq!(seen[0].bearer_token.as_deref(), Some("demo"));
    }

    #[tokio::test]
    async fn maps_statuses_to_fetch_error_kinds() {
        for (status, kind) in [
            (429, FetchErrorKind::RateLimited),
            (404, FetchErrorKind::NotFound),
            (503, FetchErrorKind::ServerError),
            (401, FetchErrorKind::Malformed),
        ] {
            let client = CannedClient::new(Ok(HttpResponse {
                status,
                body: String::new(),
            }));
            let error = connector(client).fetch(request()).await.expect_err("status");
            assert_eq!(error.kind(), kind, "status {status}");
        }
    }

    #[tokio::test]
    async fn transport_failures_and_garbage_bodies_are_classified() {
        let transport = connector(CannedClient::new(Err(HttpError::Transport(String::from("connection reset")))))
            .fetch(request())
            .await
            .expect_err("transport");
        assert_eq!(transport.kind(), FetchErrorKind::ServerError);

        let garbage = connector(CannedClient::new(ok("<html>")))
            .fetch(request())
            .await
            .expect_err("garbage");
        assert_eq!(garbage.kind(), FetchErrorKind::Malformed);
    }
}
