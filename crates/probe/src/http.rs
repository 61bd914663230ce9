//! HTTP probe with write-through response cache.
//!
//! A probe issues a single GET/POST with a per-call timeout and reports the
//! outcome as a [`ResponseEnvelope`]. Transport failures are represented as
//! a code-0 envelope, never as an error: the engine classifies failures into
//! findings, it does not unwind.
//!
//! Responses are cached in the shared `http` table keyed by a request
//! fingerprint (method, URL, body, headers). The caller supplies the
//! freshness window per request; `cache_fast_fail` additionally caches
//! failed responses so repeated probing of a dead endpoint backs off.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bpscan_cache::{fingerprint_hex, CacheStore, CacheTable};
use bpscan_common::findings::{Class, Finding, FindingLog, Kind};

// ════════════════════════════════════════════════════════════════════════════════
// REQUEST
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl AsRef<str>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.as_ref().to_string(),
            body: None,
            headers: Vec::new(),
        }
    }

    /// POST with a JSON body and matching content type.
    #[must_use]
    pub fn post_json(url: impl AsRef<str>, body: &serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.as_ref().to_string(),
            body: Some(body.to_string()),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        }
    }

    /// POST with a `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn post_form(url: impl AsRef<str>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.as_ref().to_string(),
            body: Some(body.into()),
            headers: vec![(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
        }
    }
}

/// Per-request probe options.
#[derive(Debug, Clone)]
pub struct RequestOpts {
    pub request_timeout: Duration,
    /// Freshness window for the HTTP cache; 0 disables caching.
    pub cache_timeout_secs: i64,
    /// Also cache failed responses (earlier back-off on repeat failures).
    pub cache_fast_fail: bool,
    /// Suppress the slow-response finding.
    pub suppress_timeout_message: bool,
}

impl Default for RequestOpts {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            cache_timeout_secs: 0,
            cache_fast_fail: false,
            suppress_timeout_message: false,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// RESPONSE ENVELOPE
// ════════════════════════════════════════════════════════════════════════════════

/// Outcome of one probe. `code == 0` marks a transport-level failure with
/// the error text in `status_line`.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub code: u16,
    pub status_line: String,
    /// URL after following redirects; equals the request URL otherwise.
    pub final_url: String,
    /// Raw `Content-Type` header value, empty if absent.
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Seconds spent on the wire (carried through the cache).
    pub elapsed_time: f64,
    pub from_cache: bool,
    pub timed_out: bool,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// All values of a header, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Lowercased media type with parameters stripped.
    #[must_use]
    pub fn media_type(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }

    #[must_use]
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn failure(url: &str, message: String, elapsed_time: f64, timed_out: bool) -> Self {
        Self {
            code: 0,
            status_line: message,
            final_url: url.to_string(),
            content_type: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            elapsed_time,
            from_cache: false,
            timed_out,
        }
    }
}

/// Cache representation of an envelope. The body is hex-encoded so binary
/// responses (logo images) survive the JSON row.
#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    code: u16,
    status_line: String,
    final_url: String,
    content_type: String,
    headers: Vec<(String, String)>,
    body_hex: String,
    elapsed_time: f64,
    timed_out: bool,
}

impl From<&ResponseEnvelope> for CachedResponse {
    fn from(env: &ResponseEnvelope) -> Self {
        Self {
            code: env.code,
            status_line: env.status_line.clone(),
            final_url: env.final_url.clone(),
            content_type: env.content_type.clone(),
            headers: env.headers.clone(),
            body_hex: hex::encode(&env.body),
            elapsed_time: env.elapsed_time,
            timed_out: env.timed_out,
        }
    }
}

impl CachedResponse {
    fn into_envelope(self) -> ResponseEnvelope {
        ResponseEnvelope {
            code: self.code,
            status_line: self.status_line,
            final_url: self.final_url,
            content_type: self.content_type,
            headers: self.headers,
            body: hex::decode(&self.body_hex).unwrap_or_default(),
            elapsed_time: self.elapsed_time,
            from_cache: true,
            timed_out: self.timed_out,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TRANSPORT PORT
// ════════════════════════════════════════════════════════════════════════════════

/// Raw response from a transport, before envelope bookkeeping.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub code: u16,
    pub status_line: String,
    pub final_url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Transport-level failure.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

/// Port for issuing a single HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        req: &HttpRequest,
        limit: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Production transport over a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the shared client. Redirects are followed (the envelope reports
    /// the final URL); per-request timeouts come from the probe options.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bpscan/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        req: &HttpRequest,
        limit: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, &req.url).timeout(limit);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| TransportError {
            message: e.to_string(),
            timed_out: e.is_timeout(),
        })?;

        let code = response.status().as_u16();
        let status_line = response.status().to_string();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError {
                message: e.to_string(),
                timed_out: e.is_timeout(),
            })?
            .to_vec();

        Ok(TransportResponse {
            code,
            status_line,
            final_url,
            headers,
            body,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK TRANSPORT
// ════════════════════════════════════════════════════════════════════════════════

/// Scripted response for [`MockHttpTransport`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Simulated redirect target; defaults to the request URL.
    pub final_url: Option<String>,
}

impl MockResponse {
    #[must_use]
    pub fn new(code: u16) -> Self {
        Self {
            code,
            headers: Vec::new(),
            body: Vec::new(),
            final_url: None,
        }
    }

    #[must_use]
    pub fn json(body: &serde_json::Value) -> Self {
        Self::new(200)
            .header("content-type", "application/json")
            .body(body.to_string().into_bytes())
    }

    #[must_use]
    pub fn html(body: &str) -> Self {
        Self::new(200)
            .header("content-type", "text/html")
            .body(body.as_bytes().to_vec())
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn redirected_to(mut self, url: &str) -> Self {
        self.final_url = Some(url.to_string());
        self
    }

    /// CORS headers the validator looks for on API endpoints.
    #[must_use]
    pub fn cors(self) -> Self {
        self.header("access-control-allow-origin", "*")
            .header("access-control-allow-headers", "*")
    }
}

/// In-memory transport replaying scripted responses, recording every call.
#[derive(Default)]
pub struct MockHttpTransport {
    routes: Mutex<Vec<(HttpMethod, String, MockResponse)>>,
    calls: Mutex<Vec<(HttpMethod, String)>>,
}

impl MockHttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response returned for `(method, url)`. Later
    /// registrations for the same route replace earlier ones.
    pub fn on(&self, method: HttpMethod, url: &str, response: MockResponse) {
        let mut routes = self.routes.lock();
        routes.retain(|(m, u, _)| !(*m == method && u == url));
        routes.push((method, url.to_string(), response));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<(HttpMethod, String)> {
        self.calls.lock().clone()
    }

    /// Number of transport hits for `url`, any method.
    #[must_use]
    pub fn hits(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|(_, u)| u == url).count()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn execute(
        &self,
        req: &HttpRequest,
        _limit: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().push((req.method, req.url.clone()));
        let routes = self.routes.lock();
        match routes
            .iter()
            .find(|(m, u, _)| *m == req.method && *u == req.url)
        {
            Some((_, _, scripted)) => {
                let content_type_present = scripted
                    .headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
                let mut headers = scripted.headers.clone();
                if !content_type_present && !scripted.body.is_empty() {
                    headers.push(("content-type".to_string(), "text/plain".to_string()));
                }
                Ok(TransportResponse {
                    code: scripted.code,
                    status_line: format!("{} mock", scripted.code),
                    final_url: scripted
                        .final_url
                        .clone()
                        .unwrap_or_else(|| req.url.clone()),
                    headers,
                    body: scripted.body.clone(),
                })
            }
            None => Err(TransportError {
                message: format!("connection refused: {}", req.url),
                timed_out: false,
            }),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// PROBE
// ════════════════════════════════════════════════════════════════════════════════

/// HTTP probe: one transport exchange per call, with write-through caching
/// and the slow-response finding.
pub struct HttpProbe {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<CacheStore>,
}

impl HttpProbe {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, cache: Arc<CacheStore>) -> Self {
        Self { transport, cache }
    }

    /// Issue (or replay) a request. Never fails: transport errors come back
    /// as a code-0 envelope.
    pub async fn request(
        &self,
        req: &HttpRequest,
        opts: &RequestOpts,
        log: &mut FindingLog,
        class: Class,
    ) -> ResponseEnvelope {
        let fingerprint = request_fingerprint(req);

        if opts.cache_timeout_secs > 0 {
            match self
                .cache
                .get_fresh(CacheTable::Http, &fingerprint, opts.cache_timeout_secs)
            {
                Ok(Some(value)) => {
                    if let Ok(cached) = serde_json::from_value::<CachedResponse>(value) {
                        debug!(url = %req.url, "http cache hit");
                        return cached.into_envelope();
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(url = %req.url, error = %e, "http cache read failed"),
            }
        }

        let started = Instant::now();
        let envelope = match self.transport.execute(req, opts.request_timeout).await {
            Ok(raw) => {
                let content_type = raw
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                ResponseEnvelope {
                    code: raw.code,
                    status_line: raw.status_line,
                    final_url: raw.final_url,
                    content_type,
                    headers: raw.headers,
                    body: raw.body,
                    elapsed_time: started.elapsed().as_secs_f64(),
                    from_cache: false,
                    timed_out: false,
                }
            }
            Err(e) => ResponseEnvelope::failure(
                &req.url,
                e.message,
                started.elapsed().as_secs_f64(),
                e.timed_out,
            ),
        };

        if opts.cache_timeout_secs > 0 && (envelope.code != 0 || opts.cache_fast_fail) {
            let cached = CachedResponse::from(&envelope);
            if let Ok(value) = serde_json::to_value(&cached) {
                if let Err(e) = self.cache.put(CacheTable::Http, &fingerprint, &value) {
                    warn!(url = %req.url, error = %e, "http cache write failed");
                }
            }
        }

        let slow =
            envelope.timed_out || envelope.elapsed_time > opts.request_timeout.as_secs_f64();
        if slow && !opts.suppress_timeout_message {
            log.add(
                Finding::new(Kind::Err, class, "response took longer than expected")
                    .with("url", req.url.clone())
                    .with("elapsed_time", envelope.elapsed_time),
            );
        }

        envelope
    }
}

/// Fingerprint covering everything that shapes a response.
#[must_use]
pub fn request_fingerprint(req: &HttpRequest) -> String {
    let headers = req
        .headers
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    fingerprint_hex(&[
        req.method.as_str(),
        &req.url,
        req.body.as_deref().unwrap_or(""),
        &headers,
    ])
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe_with(transport: Arc<MockHttpTransport>) -> (tempfile::TempDir, HttpProbe) {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(CacheStore::open(dir.path()).expect("cache"));
        (dir, HttpProbe::new(transport, cache))
    }

    #[tokio::test]
    async fn cache_hit_skips_second_transport_call() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.on(
            HttpMethod::Get,
            "https://example.net/bp.json",
            MockResponse::json(&json!({"a": 1})),
        );
        let (_dir, probe) = probe_with(transport.clone());
        let mut log = FindingLog::new();

        let req = HttpRequest::get("https://example.net/bp.json");
        let opts = RequestOpts {
            cache_timeout_secs: 300,
            ..RequestOpts::default()
        };

        let first = probe.request(&req, &opts, &mut log, Class::Bpjson).await;
        let second = probe.request(&req, &opts, &mut log, Class::Bpjson).await;

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.body, second.body);
        assert_eq!(transport.hits("https://example.net/bp.json"), 1);
    }

    #[tokio::test]
    async fn transport_failure_becomes_code_zero_envelope() {
        let transport = Arc::new(MockHttpTransport::new());
        let (_dir, probe) = probe_with(transport);
        let mut log = FindingLog::new();

        let env = probe
            .request(
                &HttpRequest::get("https://down.example.net/"),
                &RequestOpts::default(),
                &mut log,
                Class::Org,
            )
            .await;

        assert_eq!(env.code, 0);
        assert!(!env.ok());
        assert!(env.status_line.contains("connection refused"));
    }

    #[tokio::test]
    async fn failures_are_not_cached_without_fast_fail() {
        let transport = Arc::new(MockHttpTransport::new());
        let (_dir, probe) = probe_with(transport.clone());
        let mut log = FindingLog::new();

        let req = HttpRequest::get("https://down.example.net/");
        let opts = RequestOpts {
            cache_timeout_secs: 300,
            ..RequestOpts::default()
        };
        probe.request(&req, &opts, &mut log, Class::Org).await;
        probe.request(&req, &opts, &mut log, Class::Org).await;
        assert_eq!(transport.hits("https://down.example.net/"), 2);
    }

    #[tokio::test]
    async fn fast_fail_caches_the_failure() {
        let transport = Arc::new(MockHttpTransport::new());
        let (_dir, probe) = probe_with(transport.clone());
        let mut log = FindingLog::new();

        let req = HttpRequest::get("https://down.example.net/");
        let opts = RequestOpts {
            cache_timeout_secs: 300,
            cache_fast_fail: true,
            ..RequestOpts::default()
        };
        probe.request(&req, &opts, &mut log, Class::Org).await;
        let second = probe.request(&req, &opts, &mut log, Class::Org).await;

        assert_eq!(transport.hits("https://down.example.net/"), 1);
        assert!(second.from_cache);
        assert_eq!(second.code, 0);
    }

    #[tokio::test]
    async fn multi_valued_headers_are_preserved() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.on(
            HttpMethod::Get,
            "https://example.net/",
            MockResponse::new(200)
                .header("access-control-allow-origin", "*")
                .header("access-control-allow-origin", "https://example.net"),
        );
        let (_dir, probe) = probe_with(transport);
        let mut log = FindingLog::new();

        let env = probe
            .request(
                &HttpRequest::get("https://example.net/"),
                &RequestOpts::default(),
                &mut log,
                Class::Org,
            )
            .await;
        assert_eq!(env.header("Access-Control-Allow-Origin").len(), 2);
    }

    #[test]
    fn fingerprint_varies_with_body() {
        let a = request_fingerprint(&HttpRequest::post_json(
            "https://api.example.net/v1/chain/get_block",
            &json!({"block_num_or_id": "1"}),
        ));
        let b = request_fingerprint(&HttpRequest::post_json(
            "https://api.example.net/v1/chain/get_block",
            &json!({"block_num_or_id": "2"}),
        ));
        assert_ne!(a, b);
    }

    #[test]
    fn media_type_strips_parameters() {
        let env = ResponseEnvelope {
            code: 200,
            status_line: "200 OK".into(),
            final_url: "https://example.net/".into(),
            content_type: "Application/JSON; charset=utf-8".into(),
            headers: Vec::new(),
            body: Vec::new(),
            elapsed_time: 0.01,
            from_cache: false,
            timed_out: false,
        };
        assert_eq!(env.media_type(), "application/json");
    }
}
