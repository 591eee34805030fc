//! Single logical HTTP request with bounded retries

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{FetchError, FetchResult, RetryPolicy};

/// Longest slice of an error body kept in a `ClientError` message
const MAX_ERROR_BODY: usize = 200;

/// Default per-attempt timeout, matching the upstream clients' settings
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Description of one HTTP call
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, url)
        }
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query<K, V, I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// How a single attempt failed
#[derive(Debug)]
enum AttemptError {
    Timeout,
    Server(StatusCode),
    Network(String),
    Client(StatusCode, String),
    Build(String),
    Decode(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Timeout | AttemptError::Server(_) | AttemptError::Network(_))
    }

    fn into_fetch_error(self, attempts: u32) -> FetchError {
        match self {
            AttemptError::Timeout => FetchError::Timeout { attempts },
            AttemptError::Server(status) => FetchError::ServerError {
                status: status.as_u16(),
                attempts,
            },
            AttemptError::Network(message) => FetchError::NetworkError { message, attempts },
            AttemptError::Client(status, message) => FetchError::ClientError {
                status: status.as_u16(),
                message,
            },
            AttemptError::Build(message) => FetchError::InvalidRequest(message),
            AttemptError::Decode(message) => FetchError::InvalidResponse(message),
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout
        } else if e.is_builder() {
            AttemptError::Build(e.to_string())
        } else {
            // connect, request and body errors are all transport trouble
            AttemptError::Network(e.to_string())
        }
    }
}

/// Performs requests against one upstream, retrying transient failures
///
/// Timeouts, connection errors and 5xx responses are retried with
/// exponential backoff up to the policy's attempt limit. Any other non-2xx
/// status ends the request immediately.
#[derive(Debug, Clone)]
pub struct RetryingRequester {
    name: String,
    client: Client,
    policy: RetryPolicy,
    timeout: Duration,
    attempts: Arc<AtomicU64>,
}

impl RetryingRequester {
    /// Creates a requester with its own HTTP client
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self::with_client(name, Client::new(), policy)
    }

    /// Creates a requester sharing an existing HTTP client
    pub fn with_client(name: impl Into<String>, client: Client, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            client,
            policy,
            timeout: DEFAULT_TIMEOUT,
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sets the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Total attempts sent over the network since creation
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Performs `request`, retrying per the policy
    ///
    /// # Returns
    /// * `Ok(Value)` - The parsed JSON body of the first successful attempt
    /// * `Err(FetchError)` - The last failure once retries are exhausted, or
    ///   the first non-retryable failure
    pub async fn fetch(&self, request: &Request) -> FetchResult {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.attempts.fetch_add(1, Ordering::Relaxed);
            info!(
                service = %self.name,
                attempt,
                max_attempts,
                method = %request.method,
                target = %request.url,
                "sending request"
            );

            let failure = match self.attempt(request).await {
                Ok(body) => {
                    info!(service = %self.name, attempt, target = %request.url, "request succeeded");
                    return Ok(body);
                }
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                error!(
                    service = %self.name,
                    attempt,
                    target = %request.url,
                    outcome = ?failure,
                    "request failed, not retrying"
                );
                return Err(failure.into_fetch_error(attempt));
            }

            if attempt >= max_attempts {
                warn!(
                    service = %self.name,
                    attempt,
                    target = %request.url,
                    outcome = ?failure,
                    "request failed, attempts exhausted"
                );
                return Err(failure.into_fetch_error(attempt));
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                service = %self.name,
                attempt,
                target = %request.url,
                outcome = ?failure,
                delay_ms = delay.as_millis() as u64,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Sends one attempt and classifies the result
    async fn attempt(&self, request: &Request) -> Result<Value, AttemptError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(self.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(AttemptError::Server(status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Client(status, truncate(&body)));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| AttemptError::Decode(e.to_string()))
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
