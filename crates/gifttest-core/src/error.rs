//! Error types shared across gifttest.
//!
//! `ProviderError` lives here rather than in `gifttest-providers` so the
//! explanation service can downcast and classify provider failures for retry
//! decisions without string matching.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::QuestionId;
use crate::session::SessionState;

/// Errors that can occur when interacting with an LLM provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (missing or invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The provider answered, but without usable text.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// Timeouts, network failures, rate limits and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_)
            | ProviderError::NetworkError(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            ProviderError::AuthenticationFailed(_)
            | ProviderError::ModelNotFound(_)
            | ProviderError::InvalidResponse(_) => false,
        }
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// A question selection could not be satisfied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("requested {requested} questions but only {available} are available")]
    CountExceedsPool { requested: usize, available: usize },

    #[error("at least one question must be requested")]
    ZeroCount,

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("no categories selected")]
    NoCategories,
}

/// A session command was issued in a state that does not allow it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {operation} a session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("a session needs at least one question")]
    EmptySelection,

    #[error("question {0} appears more than once in the selection")]
    DuplicateQuestion(QuestionId),

    #[error("question {0} is not part of this session")]
    UnknownQuestion(QuestionId),

    #[error("finish requires the last question (at {current} of {total})")]
    NotAtLastQuestion { current: usize, total: usize },

    #[error("question {id} has {options} answers, choice {choice} is out of range")]
    ChoiceOutOfRange {
        id: QuestionId,
        choice: usize,
        options: usize,
    },
}

/// Scoring needs a terminated session and the bank it was drawn from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error("session is still {0}; only terminated sessions can be scored")]
    NotTerminated(SessionState),

    #[error("question {0} is not in the bank")]
    MissingQuestion(QuestionId),
}

/// Writing or reading a durable store failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported {what} format version {found} (expected {expected})")]
    Version {
        what: &'static str,
        found: u32,
        expected: u32,
    },

    #[error("reset token is stale or was already used")]
    StaleResetToken,
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by `ExplanationService::explain`.
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("provider '{0}' is not configured")]
    UnknownProvider(String),

    #[error("no API key configured for provider '{0}'")]
    MissingApiKey(String),

    #[error("the prompt is empty")]
    EmptyPrompt,

    #[error("provider failed after {attempts} attempt(s): {source}")]
    Provider {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("provider failed: {0:#}")]
    Other(anyhow::Error),

    #[error("explanation request was cancelled")]
    Cancelled,
}
