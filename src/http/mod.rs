//! HTTP plumbing shared by every upstream client
//!
//! [`RetryingRequester`] performs one logical request, retrying timeouts,
//! connection failures and 5xx responses according to a [`RetryPolicy`] and
//! giving up at once on 4xx responses.

mod requester;
mod retry;

pub use requester::{Request, RetryingRequester};
pub use retry::RetryPolicy;

use serde_json::Value;
use thiserror::Error;

/// Outcome of a fetch: the parsed JSON body or why it could not be had
pub type FetchResult = Result<Value, FetchError>;

/// Errors that can occur when fetching from an upstream API
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Every attempt timed out
    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The upstream kept answering with 5xx
    #[error("server error {status} after {attempts} attempt(s)")]
    ServerError { status: u16, attempts: u32 },

    /// Connection-level failure (DNS, refused, reset) on every attempt
    #[error("network error after {attempts} attempt(s): {message}")]
    NetworkError { message: String, attempts: u32 },

    /// 4xx response; usually a bad or missing API key
    #[error("client error {status}: {message}")]
    ClientError { status: u16, message: String },

    /// The client was asked to call an upstream it has no credentials for
    #[error("{service} credentials not configured")]
    MissingCredentials { service: String },

    /// The request could not be built (bad URL or header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream answered but the body was not the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Transient failures that are worth trying again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. } | FetchError::ServerError { .. } | FetchError::NetworkError { .. }
        )
    }

    /// Failures that point at misconfiguration and must reach the caller
    /// instead of being papered over with cached or fallback data
    pub fn is_hard_failure(&self) -> bool {
        !self.is_retryable()
    }
}
