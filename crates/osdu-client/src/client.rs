//! HTTP contract layer
//!
//! Every request carries a freshly validated bearer token, the data
//! partition header and a JSON content type. Callers pass the status codes
//! they accept; anything else comes back as [`Error::HttpStatus`] with the
//! full response attached.
//!
//! Transient failures (connect errors, timeouts, 502/503/504) are retried up
//! to `retries` times with a fixed backoff. Headers, including the token, are
//! rebuilt for every attempt.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use osdu_identity::Credential;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::response::ApiResponse;

const DATA_PARTITION_HEADER: &str = "data-partition-id";
const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";
const JSON_OK: &[u16] = &[200];

/// Body of a POST or PUT request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent verbatim
    Text(String),
    /// Serialized as JSON
    Json(serde_json::Value),
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_owned())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(value)
    }
}

impl RequestBody {
    fn into_bytes(self) -> Result<Bytes> {
        match self {
            RequestBody::Text(text) => Ok(Bytes::from(text)),
            RequestBody::Json(value) => serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(Error::RequestSerialize),
        }
    }
}

enum Payload {
    Empty,
    Body(Bytes),
    BlockBlob(Bytes),
}

impl Payload {
    fn bytes(&self) -> Option<Bytes> {
        match self {
            Payload::Empty => None,
            Payload::Body(b) | Payload::BlockBlob(b) => Some(b.clone()),
        }
    }
}

/// Authenticated client for one OSDU deployment and data partition.
pub struct HttpClient {
    server_url: String,
    data_partition: String,
    credentials: Box<dyn Credential>,
    retries: u32,
    timeout: Duration,
    retry_backoff: Duration,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(
        server_url: impl Into<String>,
        data_partition: impl Into<String>,
        credentials: impl Credential + 'static,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            data_partition: data_partition.into(),
            credentials: Box::new(credentials),
            retries: 0,
            timeout: Duration::from_secs(60),
            retry_backoff: Duration::from_millis(100),
            http: reqwest::Client::new(),
        }
    }

    /// Build a client from loaded configuration.
    pub fn from_config(config: &ClientConfig, credentials: impl Credential + 'static) -> Self {
        Self::new(&config.server_url, &config.data_partition, credentials)
            .with_retries(config.retries)
            .with_timeout(config.timeout())
            .with_retry_backoff(config.retry_backoff())
    }

    /// Number of extra attempts for transient failures (0 = no retries).
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn data_partition(&self) -> &str {
        &self.data_partition
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn credentials(&self) -> &dyn Credential {
        self.credentials.as_ref()
    }

    /// Headers for one request, with a token fetched (or reused) right now.
    pub async fn headers(&self) -> Result<HeaderMap> {
        let token = self.credentials.get_token().await?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(DATA_PARTITION_HEADER),
            HeaderValue::from_str(&self.data_partition)
                .map_err(|e| Error::InvalidHeader(format!("{DATA_PARTITION_HEADER}: {e}")))?,
        );
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::InvalidHeader(format!("authorization: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    pub async fn get(&self, url: &str, ok_status: Option<&[u16]>) -> Result<ApiResponse> {
        self.send(Method::GET, url, Payload::Empty, ok_status).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        ok_status: Option<&[u16]>,
    ) -> Result<ApiResponse> {
        let body = body.into().into_bytes()?;
        self.send(Method::POST, url, Payload::Body(body), ok_status).await
    }

    /// POST any serializable value as a JSON body.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        ok_status: Option<&[u16]>,
    ) -> Result<ApiResponse> {
        let value = serde_json::to_value(body).map_err(Error::RequestSerialize)?;
        self.post(url, RequestBody::Json(value), ok_status).await
    }

    pub async fn put(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        ok_status: Option<&[u16]>,
    ) -> Result<ApiResponse> {
        let body = body.into().into_bytes()?;
        self.send(Method::PUT, url, Payload::Body(body), ok_status).await
    }

    pub async fn delete(&self, url: &str, ok_status: Option<&[u16]>) -> Result<ApiResponse> {
        self.send(Method::DELETE, url, Payload::Empty, ok_status).await
    }

    /// Upload a file as a block blob (e.g. to a signed storage URL).
    pub async fn put_file(
        &self,
        url: &str,
        path: impl AsRef<Path>,
        ok_status: Option<&[u16]>,
    ) -> Result<ApiResponse> {
        let contents = tokio::fs::read(path.as_ref()).await?;
        self.send(Method::PUT, url, Payload::BlockBlob(Bytes::from(contents)), ok_status)
            .await
    }

    /// GET and parse the body as JSON. `None` accepts only 200.
    pub async fn get_returning_json(
        &self,
        url: &str,
        ok_status: Option<&[u16]>,
    ) -> Result<serde_json::Value> {
        self.get(url, Some(ok_status.unwrap_or(JSON_OK))).await?.json()
    }

    pub async fn post_returning_json(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        ok_status: Option<&[u16]>,
    ) -> Result<serde_json::Value> {
        self.post(url, body, Some(ok_status.unwrap_or(JSON_OK)))
            .await?
            .json()
    }

    pub async fn put_returning_json(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        ok_status: Option<&[u16]>,
    ) -> Result<serde_json::Value> {
        self.put(url, body, Some(ok_status.unwrap_or(JSON_OK)))
            .await?
            .json()
    }

    pub async fn delete_returning_json(
        &self,
        url: &str,
        ok_status: Option<&[u16]>,
    ) -> Result<serde_json::Value> {
        self.delete(url, Some(ok_status.unwrap_or(JSON_OK)))
            .await?
            .json()
    }

    #[instrument(skip_all, fields(method = %method, url = %url))]
    async fn send(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        ok_status: Option<&[u16]>,
    ) -> Result<ApiResponse> {
        let max_attempts = self.retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt > 1 {
                warn!(attempt, max_attempts, "retrying after transient failure");
                record_retry(&method);
                tokio::time::sleep(self.retry_backoff).await;
            }
            let last_attempt = attempt >= max_attempts;

            let mut headers = self.headers().await?;
            if let Payload::BlockBlob(_) = payload {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
                headers.insert(
                    HeaderName::from_static(BLOB_TYPE_HEADER),
                    HeaderValue::from_static("BlockBlob"),
                );
            }

            let mut request = self
                .http
                .request(method.clone(), url)
                .headers(headers)
                .timeout(self.timeout);
            if let Some(body) = payload.bytes() {
                request = request.body(body);
            }

            debug!(attempt, "sending request");
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    record_request(&method, status.as_str());
                    let accepted = ok_status.is_some_and(|ok| ok.contains(&status.as_u16()));
                    if !last_attempt && !accepted && is_transient(status) {
                        debug!(status = status.as_u16(), "transient status from server");
                        continue;
                    }
                    let response = ApiResponse::read(response).await?;
                    return check_status(response, ok_status);
                }
                Err(e) if !last_attempt && (e.is_timeout() || e.is_connect()) => {
                    record_request(&method, "error");
                    debug!(error = %e, "transient transport failure");
                    continue;
                }
                Err(e) => {
                    record_request(&method, "error");
                    return Err(Error::Transport(e));
                }
            }
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn check_status(response: ApiResponse, ok_status: Option<&[u16]>) -> Result<ApiResponse> {
    match ok_status {
        Some(ok) if !response.status_in(ok) => {
            warn!(status = response.status.as_u16(), expected = ?ok, "unexpected response status");
            Err(Error::HttpStatus {
                expected: ok.to_vec(),
                response: Box::new(response),
            })
        }
        _ => Ok(response),
    }
}

fn record_request(method: &Method, status: &str) {
    metrics::counter!(
        "osdu_http_requests_total",
        "method" => method.as_str().to_owned(),
        "status" => status.to_owned()
    )
    .increment(1);
}

fn record_retry(method: &Method) {
    metrics::counter!("osdu_http_retries_total", "method" => method.as_str().to_owned())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Json;
    use axum::body::Bytes as AxumBytes;
    use axum::extract::{Path as AxumPath, State};
    use axum::http::{HeaderMap as AxumHeaders, Method as AxumMethod, StatusCode as AxumStatus};
    use axum::routing::{any, get, put};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use osdu_identity::{StaticRefreshCredential, TokenFuture};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    /// Hands out `T1`, `T2`, ... and counts how often it was asked.
    struct CountingCredential {
        calls: Arc<AtomicUsize>,
    }

    impl Credential for CountingCredential {
        fn kind(&self) -> &'static str {
            "counting"
        }

        fn get_token(&self) -> TokenFuture<'_> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(format!("T{n}")) })
        }
    }

    struct FailingCredential;

    impl Credential for FailingCredential {
        fn kind(&self) -> &'static str {
            "failing"
        }

        fn get_token(&self) -> TokenFuture<'_> {
            Box::pin(async {
                Err(osdu_identity::Error::Unavailable(
                    "no credential configured".into(),
                ))
            })
        }
    }

    #[derive(Clone, Default)]
    struct ServerState {
        flaky_failures: usize,
        flaky_hits: Arc<AtomicUsize>,
        token_hits: Arc<AtomicUsize>,
    }

    /// Echoes method, headers and body back as JSON.
    async fn echo(method: AxumMethod, headers: AxumHeaders, body: AxumBytes) -> Json<Value> {
        let headers: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
            .collect();
        Json(json!({
            "method": method.as_str(),
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
    }

    async fn status(AxumPath(code): AxumPath<u16>) -> (AxumStatus, Json<Value>) {
        let status = AxumStatus::from_u16(code).unwrap();
        (status, Json(json!({ "status": code })))
    }

    async fn flaky(State(state): State<ServerState>) -> (AxumStatus, Json<Value>) {
        let hit = state.flaky_hits.fetch_add(1, Ordering::SeqCst);
        if hit < state.flaky_failures {
            (AxumStatus::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
        } else {
            (AxumStatus::OK, Json(json!({"ok": true, "hit": hit + 1})))
        }
    }

    async fn token(State(state): State<ServerState>) -> Json<Value> {
        let n = state.token_hits.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({"access_token": format!("T{n}"), "expires_in": 3600}))
    }

    async fn start_server(state: ServerState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route("/echo", any(echo))
            .route("/blob", put(echo))
            .route("/status/{code}", any(status))
            .route("/flaky", get(flaky))
            .route("/token", axum::routing::post(token))
            .route("/text", get(|| async { "plain text, not json" }))
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str, calls: &Arc<AtomicUsize>) -> HttpClient {
        HttpClient::new(
            base,
            "opendes",
            CountingCredential {
                calls: calls.clone(),
            },
        )
        .with_retry_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn headers_carry_partition_and_fresh_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client("http://unused", &calls);

        let headers = client.headers().await.unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["data-partition-id"], "opendes");
        assert_eq!(headers[AUTHORIZATION], "Bearer T1");
        assert!(headers[AUTHORIZATION].is_sensitive());

        let again = client.headers().await.unwrap();
        assert_eq!(again[AUTHORIZATION], "Bearer T2");
    }

    #[tokio::test]
    async fn auth_failure_stops_the_request() {
        let base = start_server(ServerState::default()).await;
        let client = HttpClient::new(&base, "opendes", FailingCredential).with_retries(3);

        let result = client.get(&format!("{base}/echo"), None).await;
        assert!(
            matches!(result, Err(Error::Auth(osdu_identity::Error::Unavailable(_)))),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn raw_get_without_whitelist_does_not_validate() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);

        let response = client.get(&format!("{base}/status/404"), None).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_outside_whitelist_carries_response() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);

        let err = client
            .get(&format!("{base}/status/404"), Some(&[200]))
            .await
            .unwrap_err();
        match err {
            Error::HttpStatus { expected, response } => {
                assert_eq!(expected, vec![200]);
                assert_eq!(response.status, StatusCode::NOT_FOUND);
                assert_eq!(response.json::<Value>().unwrap()["status"], 404);
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_returning_json_defaults_to_200_only() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);

        let ok = client
            .get_returning_json(&format!("{base}/status/200"), None)
            .await
            .unwrap();
        assert_eq!(ok["status"], 200);

        let rejected = client
            .get_returning_json(&format!("{base}/status/202"), None)
            .await;
        assert!(matches!(rejected, Err(Error::HttpStatus { .. })));

        let accepted = client
            .get_returning_json(&format!("{base}/status/202"), Some(&[200, 202]))
            .await
            .unwrap();
        assert_eq!(accepted["status"], 202);
    }

    #[tokio::test]
    async fn non_json_body_is_a_parse_error() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);

        let result = client.get_returning_json(&format!("{base}/text"), None).await;
        assert!(matches!(result, Err(Error::ResponseParse(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn json_body_round_trips_through_echo() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);
        let record = json!({"kind": "osdu:wks:master-data--Well:1.0.0", "acl": {"viewers": ["a"]}});

        let echoed = client
            .post_returning_json(&format!("{base}/echo"), record.clone(), None)
            .await
            .unwrap();
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["headers"]["content-type"], "application/json");
        assert_eq!(echoed["headers"]["data-partition-id"], "opendes");
        assert_eq!(echoed["headers"]["authorization"], "Bearer T1");
        let sent: Value = serde_json::from_str(echoed["body"].as_str().unwrap()).unwrap();
        assert_eq!(sent, record);
    }

    #[tokio::test]
    async fn text_body_is_sent_verbatim() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);
        let raw = "{ \"query\" :  \"*\" }";

        let echoed = client
            .put_returning_json(&format!("{base}/echo"), raw, None)
            .await
            .unwrap();
        assert_eq!(echoed["method"], "PUT");
        assert_eq!(echoed["body"], raw);
    }

    #[tokio::test]
    async fn post_json_serializes_structs() {
        #[derive(Serialize)]
        struct Query<'a> {
            kind: &'a str,
            limit: u32,
        }

        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);

        let response = client
            .post_json(&format!("{base}/echo"), &Query { kind: "*:*:*:*", limit: 10 }, Some(&[200]))
            .await
            .unwrap();
        let echoed: Value = response.json().unwrap();
        assert_eq!(echoed["body"], r#"{"kind":"*:*:*:*","limit":10}"#);
    }

    #[tokio::test]
    async fn delete_returning_json() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);

        let echoed = client
            .delete_returning_json(&format!("{base}/echo"), None)
            .await
            .unwrap();
        assert_eq!(echoed["method"], "DELETE");
        assert_eq!(echoed["body"], "");
    }

    #[tokio::test]
    async fn put_file_sends_block_blob() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.las");
        std::fs::write(&path, "~VERSION INFORMATION\n VERS. 2.0\n").unwrap();

        let response = client
            .put_file(&format!("{base}/blob"), &path, Some(&[200, 201]))
            .await
            .unwrap();
        let echoed: Value = response.json().unwrap();
        assert_eq!(echoed["headers"]["content-type"], "application/octet-stream");
        assert_eq!(echoed["headers"]["x-ms-blob-type"], "BlockBlob");
        assert_eq!(echoed["headers"]["data-partition-id"], "opendes");
        assert_eq!(echoed["body"], "~VERSION INFORMATION\n VERS. 2.0\n");
    }

    #[tokio::test]
    async fn put_file_missing_file_is_io_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client("http://unused", &calls);

        let result = client.put_file("http://unused/blob", "/nonexistent/file.bin", None).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_status_is_retried_with_fresh_headers() {
        let state = ServerState {
            flaky_failures: 1,
            ..Default::default()
        };
        let hits = state.flaky_hits.clone();
        let base = start_server(state).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls).with_retries(1);

        let body = client
            .get_returning_json(&format!("{base}/flaky"), None)
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "token fetched per attempt");
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_status() {
        let state = ServerState {
            flaky_failures: 10,
            ..Default::default()
        };
        let hits = state.flaky_hits.clone();
        let base = start_server(state).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls).with_retries(2);

        let result = client.get_returning_json(&format!("{base}/flaky"), None).await;
        match result {
            Err(Error::HttpStatus { response, .. }) => {
                assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let state = ServerState {
            flaky_failures: 1,
            ..Default::default()
        };
        let hits = state.flaky_hits.clone();
        let base = start_server(state).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls);

        let response = client.get(&format!("{base}/flaky"), None).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn maximum_retries_setting_does_not_overflow() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls).with_retries(u32::MAX);

        let body = client
            .get_returning_json(&format!("{base}/status/200"), None)
            .await
            .unwrap();
        assert_eq!(body["status"], 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls).with_retries(3);

        let result = client.get(&format!("{base}/status/404"), Some(&[200])).await;
        assert!(matches!(result, Err(Error::HttpStatus { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn whitelisted_transient_status_is_not_retried() {
        let base = start_server(ServerState::default()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls).with_retries(3);

        let response = client
            .get(&format!("{base}/status/503"), Some(&[503]))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_retried_then_reported() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&format!("http://127.0.0.1:{port}"), &calls).with_retries(2);

        let result = client.get(&format!("http://127.0.0.1:{port}/echo"), None).await;
        assert!(matches!(result, Err(Error::Transport(_))), "got {result:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn static_refresh_credential_token_is_reused() {
        let state = ServerState::default();
        let token_hits = state.token_hits.clone();
        let base = start_server(state).await;
        let credential =
            StaticRefreshCredential::new("client-id", format!("{base}/token"), "rt", "secret");
        let client = HttpClient::new(&base, "opendes", credential);

        let first = client.get_returning_json(&format!("{base}/echo"), None).await.unwrap();
        let second = client.get_returning_json(&format!("{base}/echo"), None).await.unwrap();
        assert_eq!(first["headers"]["authorization"], "Bearer T1");
        assert_eq!(second["headers"]["authorization"], "Bearer T1");
        assert_eq!(token_hits.load(Ordering::SeqCst), 1);
        assert_eq!(client.credentials().kind(), "static_refresh");
    }

    #[tokio::test]
    async fn request_and_retry_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let state = ServerState {
            flaky_failures: 1,
            ..Default::default()
        };
        let base = start_server(state).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let client = client(&base, &calls).with_retries(1);
        client.get(&format!("{base}/flaky"), None).await.unwrap();

        let output = handle.render();
        assert!(output.contains("osdu_http_requests_total"), "got: {output}");
        assert!(output.contains("status=\"503\""), "got: {output}");
        assert!(output.contains("status=\"200\""), "got: {output}");
        assert!(output.contains("osdu_http_retries_total{method=\"GET\"} 1"), "got: {output}");
    }

    #[test]
    fn from_config_applies_settings() {
        let config = ClientConfig::parse(
            "server_url = \"https://osdu.example.com\"\ndata_partition = \"opendes\"\nretries = 2\ntimeout_secs = 5\n",
            |_| None,
        )
        .unwrap();
        let client = HttpClient::from_config(&config, FailingCredential);
        assert_eq!(client.server_url(), "https://osdu.example.com");
        assert_eq!(client.data_partition(), "opendes");
        assert_eq!(client.retries(), 2);
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn request_body_conversions() {
        assert_eq!(RequestBody::from("a"), RequestBody::Text("a".into()));
        assert_eq!(
            RequestBody::from(json!({"a": 1})),
            RequestBody::Json(json!({"a": 1}))
        );
        assert_eq!(
            RequestBody::from(json!([1, 2])).into_bytes().unwrap(),
            Bytes::from_static(b"[1,2]")
        );
    }
}
