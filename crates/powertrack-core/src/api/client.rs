//! API client for communicating with the PowerTrack REST API.
//!
//! This module provides the `RequestClient` struct, which wraps a transport
//! and a credential source and runs every logical request through a bounded
//! retry loop:
//!
//! | Response            | Action                                              |
//! |---------------------|-----------------------------------------------------|
//! | 200                 | Success (JSON if it parses, raw text otherwise)     |
//! | 401                 | Back off `2^attempt` units, refresh credentials, retry |
//! | 403, 404, other     | Fail immediately                                    |
//! | 5xx, network error  | Back off 1 unit, retry                              |
//!
//! Only the terminal result leaves `execute`; intermediate failures are logged.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::error::AUTH_REMEDIATION;
use super::retry::{RetryPolicy, RetryState};
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
use super::ApiError;
use crate::auth::{CredentialSet, CredentialSource, CredentialStore};

/// HTTP request timeout.
/// 30s allows for slow report endpoints while failing fast enough to retry.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Serialized to a JSON string before sending
    Json(Value),
    /// Sent as-is
    Text(String),
}

/// Body of a 200 response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    /// JSON bodies as-is, text bodies as a JSON string
    pub fn into_value(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
        }
    }
}

/// Why an attempt may be retried
#[derive(Debug)]
enum RetryReason {
    ServerError(u16),
    Transport(TransportError),
}

impl RetryReason {
    fn into_fatal(self, attempts: u32) -> ApiError {
        match self {
            RetryReason::ServerError(status) => ApiError::ServerError { status, attempts },
            RetryReason::Transport(source) => ApiError::Transport { attempts, source },
        }
    }
}

/// Result of a single attempt
#[derive(Debug)]
enum Outcome {
    Success(ResponseBody),
    Retryable(RetryReason),
    AuthExpired,
    Fatal(ApiError),
}

fn classify(result: Result<HttpResponse, TransportError>, endpoint: &str) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => return Outcome::Retryable(RetryReason::Transport(e)),
    };

    match response.status {
        200 => Outcome::Success(ResponseBody::from_text(response.body)),
        401 => Outcome::AuthExpired,
        500..=u16::MAX => Outcome::Retryable(RetryReason::ServerError(response.status)),
        status => Outcome::Fatal(ApiError::from_status(status, endpoint, &response.body)),
    }
}

/// Authenticated PowerTrack client.
///
/// Holds no per-request state, so one client can serve many concurrent
/// requests. Clone is cheap: transport and credentials are shared.
pub struct RequestClient<T = ReqwestTransport, C = CredentialStore> {
    transport: Arc<T>,
    credentials: Arc<C>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<T, C> Clone for RequestClient<T, C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            credentials: Arc::clone(&self.credentials),
            policy: self.policy,
            timeout: self.timeout,
        }
    }
}

impl<C: CredentialSource> RequestClient<ReqwestTransport, C> {
    /// Create a client backed by a fresh `reqwest` connection pool
    pub fn connect(credentials: Arc<C>, policy: RetryPolicy) -> Result<Self, ApiError> {
        let transport =
            ReqwestTransport::new().map_err(|e| ApiError::InvalidConfig(e.to_string()))?;
        Self::new(credentials, transport, policy)
    }
}

impl<T: Transport, C: CredentialSource> RequestClient<T, C> {
    /// Create a client.
    ///
    /// Refuses to proceed unless the current credentials validate, then
    /// applies any pending capture so the first request goes out with the
    /// freshest ones.
    pub fn new(credentials: Arc<C>, transport: T, policy: RetryPolicy) -> Result<Self, ApiError> {
        policy.validate()?;
        credentials.current().check()?;
        credentials.refresh_if_available()?;

        Ok(Self {
            transport: Arc::new(transport),
            credentials,
            policy,
            timeout: REQUEST_TIMEOUT,
        })
    }

    /// Timeout used by [`get`](Self::get)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn credentials(&self) -> &Arc<C> {
        &self.credentials
    }

    fn build_request(
        credentials: &CredentialSet,
        endpoint: &str,
        method: &Method,
        payload: Option<&Payload>,
        referer: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpRequest, ApiError> {
        let url = credentials.endpoint_url(endpoint)?;
        let mut headers = credentials.build_headers(referer)?;

        let body = match payload {
            Some(Payload::Json(value)) => Some(
                serde_json::to_string(value).map_err(|e| ApiError::InvalidConfig(e.to_string()))?,
            ),
            Some(Payload::Text(text)) => Some(text.clone()),
            None => None,
        };

        if body.is_some() && (*method == Method::POST || *method == Method::PUT) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        Ok(HttpRequest {
            method: method.clone(),
            url,
            headers,
            body,
            timeout,
        })
    }

    /// Execute one logical request with retries.
    ///
    /// `endpoint` is resolved against the base URL of the current
    /// credentials, e.g. `/api/view/sitealerts/S60308`.
    pub async fn execute(
        &self,
        endpoint: &str,
        method: Method,
        payload: Option<&Payload>,
        referer: Option<&str>,
        timeout: Duration,
    ) -> Result<ResponseBody, ApiError> {
        let max_retries = self.policy.max_retries;
        let mut state = RetryState::default();

        while state.attempt < max_retries {
            let attempt = state.begin_attempt();

            // Rebuilt every attempt so a refresh takes effect immediately
            let credentials = self.credentials.current();
            let request =
                Self::build_request(&credentials, endpoint, &method, payload, referer, timeout)?;

            debug!(method = %method, endpoint, attempt, "Making request");
            let result = self.transport.send(request).await;

            match classify(result, endpoint) {
                Outcome::Success(body) => {
                    debug!(method = %method, endpoint, attempt, "Request succeeded");
                    return Ok(body);
                }
                Outcome::AuthExpired => {
                    if attempt >= max_retries {
                        error!(endpoint, attempts = attempt, "Authentication failed after {} attempts", attempt);
                        error!("{}", AUTH_REMEDIATION);
                        return Err(ApiError::AuthExpired { attempts: attempt });
                    }

                    let delay = self.policy.auth_backoff(attempt);
                    warn!(
                        endpoint,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        "401 Unauthorized, retrying with fresh credentials"
                    );
                    state.back_off(delay).await;

                    if self.credentials.refresh_if_available()? {
                        info!(endpoint, "Picked up refreshed credentials");
                    } else {
                        debug!(endpoint, "No newer credentials available");
                    }
                }
                Outcome::Retryable(reason) => {
                    if attempt >= max_retries {
                        let err = reason.into_fatal(attempt);
                        error!(endpoint, error = %err, "Giving up");
                        return Err(err);
                    }

                    let delay = self.policy.transient_backoff();
                    warn!(endpoint, attempt, reason = ?reason, "Transient failure, retrying");
                    state.back_off(delay).await;
                }
                Outcome::Fatal(err) => {
                    error!(endpoint, error = %err, "Request failed");
                    return Err(err);
                }
            }
        }

        error!(endpoint, total_backoff_ms = state.total_backoff.as_millis() as u64, "Max retries exceeded");
        Err(ApiError::RetriesExhausted)
    }

    /// GET with the default referer and the client's timeout.
    pub async fn get(&self, endpoint: &str) -> Result<ResponseBody, ApiError> {
        self.execute(endpoint, Method::GET, None, None, self.timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;

    use serde_json::json;
    use tokio::time::Instant;

    use crate::api::testing::{CountingSource, ScriptedTransport};
    use crate::api::transport::TransportFuture;
    use crate::auth::CredentialError;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        }
    }

    fn client(
        transport: ScriptedTransport,
        max_retries: u32,
    ) -> (RequestClient<ScriptedTransport, CountingSource>, Arc<CountingSource>, u32) {
        let source = Arc::new(CountingSource::new());
        let client = RequestClient::new(Arc::clone(&source), transport, policy(max_retries)).unwrap();
        // Construction performs one eager refresh
        let baseline = source.refreshes();
        (client, source, baseline)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let (client, source, baseline) = client(ScriptedTransport::always(200, r#"{"ok": true}"#), 5);
        let start = Instant::now();

        let body = client.get("/api/view/sitealerts/S60308").await.unwrap();

        assert_eq!(body, ResponseBody::Json(json!({"ok": true})));
        assert_eq!(source.refreshes(), baseline);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_json_body_returned_as_text() {
        let (client, _, _) = client(ScriptedTransport::always(200, "<html>ok</html>"), 3);
        let body = client.get("/api/x").await.unwrap();
        assert_eq!(body, ResponseBody::Text("<html>ok</html>".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_recovers_after_refreshes() {
        let max = 4;
        let script = (0..max - 1)
            .map(|_| Ok(HttpResponse::new(401, "")))
            .collect();
        let transport = ScriptedTransport::scripted(script, HttpResponse::new(200, "[]"));
        let requests = Arc::clone(&transport.requests);
        let (client, source, baseline) = client(transport, max);
        let start = Instant::now();

        let body = client.get("/api/x").await.unwrap();

        assert_eq!(body, ResponseBody::Json(json!([])));
        assert_eq!(source.refreshes() - baseline, max - 1);
        // 2^1 + 2^2 + 2^3 units
        assert_eq!(start.elapsed(), Duration::from_secs(2 + 4 + 8));

        // Each retry carried the credentials from the preceding refresh
        let cookies: Vec<String> = requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.headers[header::COOKIE].to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["session=1", "session=2", "session=3", "session=4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_exhausted() {
        let (client, source, baseline) = client(ScriptedTransport::always(401, ""), 3);
        let start = Instant::now();

        let err = client.get("/api/x").await.unwrap_err();

        assert!(matches!(err, ApiError::AuthExpired { attempts: 3 }));
        assert!(err.remediation().is_some());
        // No refresh after the final attempt
        assert_eq!(source.refreshes() - baseline, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_not_retried() {
        let transport = ScriptedTransport::always(403, "nope");
        let requests = Arc::clone(&transport.requests);
        let (client, source, baseline) = client(transport, 5);
        let start = Instant::now();

        let err = client.get("/api/x").await.unwrap_err();

        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(requests.lock().unwrap().len(), 1);
        assert_eq!(source.refreshes(), baseline);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_not_retried() {
        let transport = ScriptedTransport::always(404, "");
        let requests = Arc::clone(&transport.requests);
        let (client, _, _) = client(transport, 5);

        let err = client.get("/api/x").await.unwrap_err();

        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_not_retried() {
        let transport = ScriptedTransport::always(429, "slow down");
        let requests = Arc::clone(&transport.requests);
        let (client, _, _) = client(transport, 5);

        let err = client.get("/api/x").await.unwrap_err();

        assert!(
            matches!(err, ApiError::UnexpectedStatus { status: 429, ref body } if body == "slow down")
        );
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried_to_bound() {
        let transport = ScriptedTransport::always(503, "");
        let requests = Arc::clone(&transport.requests);
        let (client, source, baseline) = client(transport, 4);
        let start = Instant::now();

        let err = client.get("/api/x").await.unwrap_err();

        assert!(matches!(err, ApiError::ServerError { status: 503, attempts: 4 }));
        assert_eq!(requests.lock().unwrap().len(), 4);
        // Constant one unit between attempts, credentials untouched
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(source.refreshes(), baseline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_then_success() {
        let script = vec![
            Err(TransportError::Timeout),
            Err(TransportError::Connect("refused".to_string())),
        ];
        let transport = ScriptedTransport::scripted(script, HttpResponse::new(200, "{}"));
        let (client, _, _) = client(transport, 3);
        let start = Instant::now();

        let body = client.get("/api/x").await.unwrap();

        assert_eq!(body, ResponseBody::Json(json!({})));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_exhausted() {
        let script = vec![Err(TransportError::Timeout), Err(TransportError::Timeout)];
        let transport = ScriptedTransport::scripted(script, HttpResponse::new(200, "{}"));
        let (client, _, _) = client(transport, 2);

        let err = client.get("/api/x").await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::Transport { attempts: 2, source: TransportError::Timeout }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_error_propagates() {
        let source = Arc::new(CountingSource::broken());
        let client = RequestClient::new(
            Arc::clone(&source),
            ScriptedTransport::always(401, ""),
            policy(5),
        )
        .unwrap();

        let err = client.get("/api/x").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_json_payload_and_referer_override() {
        let transport = ScriptedTransport::always(200, "{}");
        let requests = Arc::clone(&transport.requests);
        let (client, _, _) = client(transport, 1);

        let payload = Payload::Json(json!({"siteKey": "S60308"}));
        client
            .execute(
                "/api/edit/modeling",
                Method::PUT,
                Some(&payload),
                Some("https://apps.alsoenergy.com/powertrack/S60308"),
                REQUEST_TIMEOUT,
            )
            .await
            .unwrap();
        client.get("/api/x").await.unwrap();

        let requests = requests.lock().unwrap();
        let put = &requests[0];
        assert_eq!(put.method, Method::PUT);
        assert_eq!(put.body.as_deref(), Some(r#"{"siteKey":"S60308"}"#));
        assert_eq!(put.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            put.headers[header::REFERER],
            "https://apps.alsoenergy.com/powertrack/S60308"
        );

        // The override did not stick to the next request
        let get = &requests[1];
        assert!(get.body.is_none());
        assert!(get.headers.get(header::CONTENT_TYPE).is_none());
        assert_eq!(get.headers[header::REFERER], "https://apps.alsoenergy.com/powertrack");
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_reusable_after_failure() {
        let script = vec![Ok(HttpResponse::new(404, ""))];
        let transport = ScriptedTransport::scripted(script, HttpResponse::new(200, "1"));
        let (client, _, _) = client(transport, 2);

        assert!(client.get("/api/x").await.is_err());
        assert_eq!(client.get("/api/x").await.unwrap(), ResponseBody::Json(json!(1)));
    }

    #[test]
    fn test_new_rejects_zero_retries() {
        let result = RequestClient::new(
            Arc::new(CountingSource::new()),
            ScriptedTransport::always(200, ""),
            policy(0),
        );
        assert!(matches!(result, Err(ApiError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_rejects_invalid_credentials() {
        let source = CountingSource::new();
        source.replace(|set| set.base_url = "not a url".to_string());
        let result = RequestClient::new(
            Arc::new(source),
            ScriptedTransport::always(200, ""),
            policy(3),
        );
        assert!(matches!(result, Err(ApiError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_validates_before_refresh() {
        let source = Arc::new(CountingSource::new());
        // A refresh would rotate in a usable cookie
        source.replace(|set| set.cookie = String::new());
        let result = RequestClient::new(
            Arc::clone(&source),
            ScriptedTransport::always(200, ""),
            policy(3),
        );
        assert!(matches!(result, Err(ApiError::InvalidConfig(_))));
        assert_eq!(source.refreshes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_uses_client_timeout() {
        let transport = ScriptedTransport::always(200, "{}");
        let requests = Arc::clone(&transport.requests);
        let (client, _, _) = client(transport, 3);

        client.get("/api/x").await.unwrap();
        client
            .clone()
            .with_timeout(Duration::from_secs(5))
            .get("/api/x")
            .await
            .unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].timeout, REQUEST_TIMEOUT);
        assert_eq!(requests[1].timeout, Duration::from_secs(5));
    }

    /// Answers 200 to one cookie and 401 to anything else
    struct SessionGate {
        cookie: &'static str,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Transport for SessionGate {
        fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
            let authorized = request
                .headers
                .get(header::COOKIE)
                .is_some_and(|v| v.as_bytes() == self.cookie.as_bytes());
            self.requests.lock().unwrap().push(request);
            let status = if authorized { 200 } else { 401 };
            Box::pin(async move { Ok(HttpResponse::new(status, "[]")) })
        }
    }

    /// Counts refreshes that actually applied a capture
    struct AppliedTally {
        store: CredentialStore,
        applied: AtomicU32,
    }

    impl CredentialSource for AppliedTally {
        fn current(&self) -> Arc<CredentialSet> {
            self.store.current()
        }

        fn refresh_if_available(&self) -> Result<bool, CredentialError> {
            let applied = self.store.refresh_if_available()?;
            if applied {
                self.applied.fetch_add(1, Ordering::SeqCst);
            }
            Ok(applied)
        }
    }

    fn set_modified(path: &std::path::Path, modified: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_unauthorized_requests_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        let capture = dir.path().join("mostRecentFetch.js");
        std::fs::write(
            &env,
            "POWERTRACK_BASE_URL=https://apps.alsoenergy.com\n\
             POWERTRACK_COOKIE='session=old'\n\
             POWERTRACK_CSRF_TOKEN=token-old\n\
             POWERTRACK_USER_AGENT=Mozilla/5.0\n\
             POWERTRACK_REFERER=https://apps.alsoenergy.com/powertrack\n",
        )
        .unwrap();
        set_modified(&env, SystemTime::now() - Duration::from_secs(3600));

        let source = Arc::new(AppliedTally {
            store: CredentialStore::open(&env, &capture).unwrap(),
            applied: AtomicU32::new(0),
        });
        let gate = SessionGate {
            cookie: "session=new",
            requests: Mutex::new(Vec::new()),
        };
        let client = RequestClient::new(Arc::clone(&source), gate, policy(3)).unwrap();

        std::fs::write(
            &capture,
            r#"fetch("https://apps.alsoenergy.com/api/view/sitealerts/S1", {
  "headers": {"cookie": "session=new", "x-csrf-token": "token-new"},
  "body": null,
  "method": "GET"
});"#,
        )
        .unwrap();

        let sites: Vec<String> = (0..8).map(|i| format!("S{i}")).collect();
        let results = futures::future::join_all(sites.iter().map(|site| {
            let client = client.clone();
            async move {
                let referer = format!("https://apps.alsoenergy.com/powertrack/{site}");
                client
                    .execute(
                        &format!("/api/view/sitealerts/{site}"),
                        Method::GET,
                        None,
                        Some(&referer),
                        REQUEST_TIMEOUT,
                    )
                    .await
            }
        }))
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(source.applied.load(Ordering::SeqCst), 1);

        let requests = client.transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 16);
        for request in requests.iter() {
            // Each request carries its own referer
            let site = request.url.path().rsplit('/').next().unwrap();
            assert_eq!(
                request.headers[header::REFERER],
                format!("https://apps.alsoenergy.com/powertrack/{site}").as_str()
            );

            // Cookie and token always come from the same set
            let cookie = request.headers[header::COOKIE].to_str().unwrap();
            let token = request.headers["x-csrf-token"].to_str().unwrap();
            assert!(
                matches!((cookie, token), ("session=old", "token-old") | ("session=new", "token-new")),
                "mixed credentials: {cookie} / {token}"
            );
        }
    }
}
