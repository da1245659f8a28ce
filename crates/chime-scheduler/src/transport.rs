use std::time::Duration;

use async_trait::async_trait;
use chime_core::config::CallbackConfig;
use rand::Rng;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::{
    error::Result,
    types::{HttpMethod, Task},
};

const BACKOFF_BASE_MS: u64 = 100;
/// Exponent cap so very large retry counts cannot overflow the shift.
const BACKOFF_MAX_EXPONENT: u32 = 16;

/// Sleep before the attempt following attempt `attempt` (0-based):
/// uniformly in `[base / 2, base)` with `base = 100ms * 2^attempt`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS << attempt.min(BACKOFF_MAX_EXPONENT);
    let millis = rand::thread_rng().gen_range(base / 2..base);
    Duration::from_millis(millis)
}

/// One outgoing callback with its retry budget.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub url: String,
    pub method: HttpMethod,
    pub payload: String,
    pub headers: HeaderMap,
    pub expected_status: u16,
    pub max_attempts: u32,
}

impl CallbackRequest {
    pub fn for_task(task: &Task) -> Self {
        Self {
            url: task.callback.clone(),
            method: task.callback_method,
            payload: task.payload.clone(),
            headers: HeaderMap::new(),
            expected_status: task.expected_http_status,
            max_attempts: task.retry.max(1),
        }
    }
}

/// What came back after the last attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    /// Last HTTP status seen; `None` if no attempt got a response.
    pub status: Option<u16>,
    /// Body of the last response, or the transport error of the last attempt.
    pub body: Vec<u8>,
    pub attempts: u32,
}

/// Sends a callback, retrying as needed. Never fails: transport problems end
/// up in the returned body.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn send_with_retry(&self, request: &CallbackRequest) -> CallbackResponse;
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &CallbackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { client })
    }

    async fn send_once(&self, request: &CallbackRequest) -> reqwest::Result<(u16, Vec<u8>)> {
        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .headers(request.headers.clone())
            .body(request.payload.clone());
        if request.method == HttpMethod::Post && !request.headers.contains_key(CONTENT_TYPE) {
            builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok((status, body.to_vec()))
    }
}

#[async_trait]
impl CallbackTransport for HttpTransport {
    async fn send_with_retry(&self, request: &CallbackRequest) -> CallbackResponse {
        let max_attempts = request.max_attempts.max(1);
        let mut status = None;
        let mut body = Vec::new();

        for attempt in 0..max_attempts {
            let attempts = attempt + 1;
            match self.send_once(request).await {
                Ok((code, bytes)) => {
                    status = Some(code);
                    body = bytes;
                    if code == request.expected_status || (400..500).contains(&code) {
                        return CallbackResponse {
                            status,
                            body,
                            attempts,
                        };
                    }
                    debug!(url = %request.url, attempt = attempts, status = code, "unexpected callback status");
                }
                Err(e) => {
                    warn!(url = %request.url, attempt = attempts, "callback request failed: {e}");
                    body = e.to_string().into_bytes();
                }
            }
            if attempts < max_attempts {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        CallbackResponse {
            status,
            body,
            attempts: max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{extract::State, http::StatusCode, routing::any, Router};

    #[test]
    fn backoff_stays_in_range() {
        for attempt in 0..6u32 {
            let lo = Duration::from_millis(50 << attempt);
            let hi = Duration::from_millis(100 << attempt);
            for _ in 0..200 {
                let d = backoff_delay(attempt);
                assert!(d >= lo && d < hi, "attempt {attempt}: {d:?}");
            }
        }
    }

    #[test]
    fn backoff_large_attempt_does_not_overflow() {
        let d = backoff_delay(u32::MAX);
        assert!(d < Duration::from_millis(100 << BACKOFF_MAX_EXPONENT));
    }

    #[derive(Clone)]
    struct Script {
        statuses: Arc<Vec<u16>>,
        hits: Arc<AtomicUsize>,
    }

    async fn scripted(State(script): State<Script>) -> (StatusCode, String) {
        let n = script.hits.fetch_add(1, Ordering::SeqCst);
        let code = script.statuses[n.min(script.statuses.len() - 1)];
        (
            StatusCode::from_u16(code).unwrap(),
            format!("reply {code}"),
        )
    }

    /// Start a stub answering with `statuses` in order (repeating the last).
    async fn stub(statuses: &[u16]) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let script = Script {
            statuses: Arc::new(statuses.to_vec()),
            hits: hits.clone(),
        };
        let app = Router::new().route("/cb", any(scripted)).with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/cb"), hits)
    }

    fn request(url: String, max_attempts: u32) -> CallbackRequest {
        CallbackRequest {
            url,
            method: HttpMethod::Post,
            payload: "k=v".into(),
            headers: HeaderMap::new(),
            expected_status: 200,
            max_attempts,
        }
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(&CallbackConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let (url, hits) = stub(&[500, 500, 200]).await;
        let resp = transport().send_with_retry(&request(url, 3)).await;
        assert_eq!(resp.status, Some(200));
        assert_eq!(resp.body, b"reply 200");
        assert_eq!(resp.attempts, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_error_stops_immediately() {
        let (url, hits) = stub(&[404]).await;
        let resp = transport().send_with_retry(&request(url, 5)).await;
        assert_eq!(resp.status, Some(404));
        assert_eq!(resp.body, b"reply 404");
        assert_eq!(resp.attempts, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_report_last_status() {
        let (url, hits) = stub(&[503]).await;
        let resp = transport().send_with_retry(&request(url, 2)).await;
        assert_eq!(resp.status, Some(503));
        assert_eq!(resp.attempts, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_host_has_no_status() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resp = transport()
            .send_with_retry(&request(format!("http://{addr}/cb"), 1))
            .await;
        assert_eq!(resp.status, None);
        assert!(!resp.body.is_empty());
        assert_eq!(resp.attempts, 1);
    }
}
