//! Error types for the translation pipeline.
//!
//! Each subsystem carries its own error enum; all of them expose their
//! retryability so callers can decide between in-place retry, deferred
//! retry, and hard failure. Conversions flow upward into [`WorkerError`]
//! (per-chunk processing) and [`CommandError`] (CLI surface).

use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for CLI-facing operations.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Errors from the document chunker.
///
/// The chunker is a pure transformation: every failure here is fatal for
/// the job and reported via the `CHUNKING_FAILED` status. None of these
/// are retryable.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Input document was empty or whitespace-only.
    #[error("input document is empty")]
    EmptyInput,

    /// An emitted chunk violated a size or content invariant.
    #[error("chunk invariant violated: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// The source object is missing a required metadata key.
    #[error("source object missing required metadata key '{key}'")]
    MissingMetadata {
        /// The absent metadata key.
        key: String,
    },
}

/// Errors from the persistence adapters (object store, job store,
/// rate-limit state store).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The referenced key does not exist.
    #[error("not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A conditional write lost the race against a concurrent writer.
    #[error("conditional update conflict on {key}")]
    Conflict {
        /// The contended key.
        key: String,
    },

    /// The backing store is unreachable or returned an I/O failure.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Underlying failure description.
        message: String,
    },

    /// A persisted record could not be decoded.
    #[error("corrupt record at {key}: {message}")]
    Corrupt {
        /// Key of the unreadable record.
        key: String,
        /// Decode failure description.
        message: String,
    },
}

impl StorageError {
    /// Whether the operation may succeed if retried in place.
    ///
    /// Conflicts and unavailability are transient; missing or corrupt
    /// records are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable { .. })
    }
}

/// Errors from the rate limiter itself (not quota denials, which are a
/// normal [`crate::limiter::Decision`]).
#[derive(Debug, Error)]
pub enum LimiterError {
    /// Bucket state could not be read or written.
    ///
    /// The limiter never silently permits a request in the absence of
    /// state, so this surfaces as a retryable denial to the caller.
    #[error("rate-limit state unavailable: {0}")]
    StateUnavailable(#[from] StorageError),

    /// The compare-and-set loop exhausted its attempt budget.
    #[error("rate-limit state contention: {attempts} conditional updates failed")]
    Contention {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The configured timezone name was not recognized.
    #[error("unknown timezone '{name}'")]
    UnknownTimezone {
        /// The unparseable timezone name.
        name: String,
    },
}

/// Errors from the translation client and its HTTP backend.
///
/// Classification follows the endpoint's HTTP-like status taxonomy:
/// 429 and 5xx are transient, 400/401/403 and unknown statuses are
/// permanent, network failures are permanent unless the backend
/// explicitly tags them transient.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// Authentication or authorization failure (401/403).
    #[error("translation endpoint rejected credentials (status {status}): {message}")]
    Auth {
        /// HTTP status code.
        status: u16,
        /// Endpoint error body.
        message: String,
    },

    /// Malformed request (400).
    #[error("translation endpoint rejected request: {message}")]
    BadRequest {
        /// Endpoint error body.
        message: String,
    },

    /// Endpoint-side rate limit (429).
    #[error("translation endpoint rate limited: {message}")]
    RateLimited {
        /// Endpoint error body.
        message: String,
    },

    /// Transient endpoint failure (5xx).
    #[error("translation endpoint failed (status {status}): {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Endpoint error body.
        message: String,
    },

    /// Unrecognized endpoint status. Non-retryable.
    #[error("translation endpoint returned unexpected status {status}: {message}")]
    Unknown {
        /// HTTP status code.
        status: u16,
        /// Endpoint error body.
        message: String,
    },

    /// Network-level failure reaching the endpoint.
    #[error("network failure: {message}")]
    Network {
        /// Transport error description.
        message: String,
        /// Whether the backend classified this failure as transient.
        transient: bool,
    },

    /// The endpoint response could not be decoded.
    #[error("unparseable endpoint response: {message}")]
    ResponseParse {
        /// Decode failure description.
        message: String,
    },

    /// Target language code outside the supported enumeration.
    #[error("unsupported target language '{code}' (supported: es, fr, it, de, zh)")]
    UnsupportedLanguage {
        /// The rejected language code.
        code: String,
    },

    /// The retry budget was exhausted without a successful call.
    #[error("translation failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made (including the first).
        attempts: u32,
        /// The final attempt's error.
        #[source]
        last: Box<TranslateError>,
    },
}

impl TranslateError {
    /// Whether the failure is transient per the retry policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Upstream { .. } => true,
            Self::Network { transient, .. } => *transient,
            // An exhausted budget inherits the transience of the final
            // error so the dispatcher can consider a job-level retry.
            Self::RetriesExhausted { last, .. } => last.is_retryable(),
            Self::Auth { .. }
            | Self::BadRequest { .. }
            | Self::Unknown { .. }
            | Self::ResponseParse { .. }
            | Self::UnsupportedLanguage { .. } => false,
        }
    }
}

/// Errors from a translation worker processing a single chunk.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The job record does not exist.
    #[error("job {job_id} not found for user {user_id}")]
    JobNotFound {
        /// Job identifier.
        job_id: String,
        /// Owning user.
        user_id: String,
    },

    /// The job is not in a state that permits translation.
    #[error("job {job_id} in state {status} cannot accept translation work")]
    InvalidState {
        /// Job identifier.
        job_id: String,
        /// The offending status, as persisted.
        status: String,
    },

    /// The requested chunk index is outside the job's chunk list.
    #[error("chunk index {index} out of range for job with {total} chunks")]
    ChunkIndexOutOfRange {
        /// Requested index.
        index: u32,
        /// The job's `totalChunks`.
        total: u32,
    },

    /// The rate limiter denied the quota acquire.
    ///
    /// Retryable after `retry_after`; the worker does not mutate job
    /// state on this path.
    #[error("quota denied, retry after {retry_after:?}")]
    QuotaDenied {
        /// Advisory wait supplied by the limiter.
        retry_after: Duration,
    },

    /// The limiter itself failed (state unreachable or contended).
    #[error(transparent)]
    Limiter(#[from] LimiterError),

    /// Translation client failure, classification preserved.
    #[error(transparent)]
    Translation(#[from] TranslateError),

    /// Persistence failure, classification preserved.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The worker exceeded its wall-clock budget.
    #[error("worker timed out after {budget:?}")]
    Timeout {
        /// The configured wall-clock budget.
        budget: Duration,
    },
}

impl WorkerError {
    /// Whether the dispatcher should reschedule this chunk.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::QuotaDenied { .. } | Self::Limiter(_) | Self::Timeout { .. } => true,
            Self::Translation(e) => e.is_retryable(),
            Self::Storage(e) => e.is_retryable(),
            Self::JobNotFound { .. }
            | Self::InvalidState { .. }
            | Self::ChunkIndexOutOfRange { .. } => false,
        }
    }
}

/// Errors from the dispatcher's chunking and fan-out paths.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The job record does not exist.
    #[error("job {job_id} not found for user {user_id}")]
    JobNotFound {
        /// Job identifier.
        job_id: String,
        /// Owning user.
        user_id: String,
    },

    /// The job is not in a state the requested operation accepts.
    #[error("job {job_id} in state {status} cannot be dispatched")]
    InvalidState {
        /// Job identifier.
        job_id: String,
        /// The offending status, as persisted.
        status: String,
    },

    /// Chunking failure (already reflected on the job record).
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// Persistence failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Invalid command-line input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Chunking failure.
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Limiter failure.
    #[error(transparent)]
    Limiter(#[from] LimiterError),

    /// Translation failure.
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// Worker failure.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Dispatcher failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Filesystem I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Required configuration missing (e.g. API key).
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_retryability() {
        assert!(
            TranslateError::RateLimited {
                message: "slow down".to_string()
            }
            .is_retryable()
        );
        assert!(
            TranslateError::Upstream {
                status: 503,
                message: "overloaded".to_string()
            }
            .is_retryable()
        );
        assert!(
            !TranslateError::Auth {
                status: 401,
                message: "bad key".to_string()
            }
            .is_retryable()
        );
        assert!(
            !TranslateError::BadRequest {
                message: "no text".to_string()
            }
            .is_retryable()
        );
        assert!(
            !TranslateError::Unknown {
                status: 418,
                message: "teapot".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_network_transience_is_explicit() {
        let opaque = TranslateError::Network {
            message: "connection reset".to_string(),
            transient: false,
        };
        assert!(!opaque.is_retryable());

        let tagged = TranslateError::Network {
            message: "timeout".to_string(),
            transient: true,
        };
        assert!(tagged.is_retryable());
    }

    #[test]
    fn test_retries_exhausted_inherits_transience() {
        let transient = TranslateError::RetriesExhausted {
            attempts: 4,
            last: Box::new(TranslateError::Upstream {
                status: 500,
                message: "boom".to_string(),
            }),
        };
        assert!(transient.is_retryable());

        let permanent = TranslateError::RetriesExhausted {
            attempts: 1,
            last: Box::new(TranslateError::Auth {
                status: 403,
                message: "forbidden".to_string(),
            }),
        };
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_worker_retryability() {
        assert!(
            WorkerError::QuotaDenied {
                retry_after: Duration::from_secs(12)
            }
            .is_retryable()
        );
        assert!(
            !WorkerError::JobNotFound {
                job_id: "j1".to_string(),
                user_id: "u1".to_string()
            }
            .is_retryable()
        );
        assert!(
            WorkerError::Storage(StorageError::Conflict {
                key: "jobs/j1".to_string()
            })
            .is_retryable()
        );
        assert!(
            !WorkerError::Storage(StorageError::NotFound {
                key: "chunks/x".to_string()
            })
            .is_retryable()
        );
    }

    #[test]
    fn test_storage_retryability() {
        assert!(
            StorageError::Unavailable {
                message: "throttled".to_string()
            }
            .is_retryable()
        );
        assert!(
            !StorageError::Corrupt {
                key: "k".to_string(),
                message: "bad json".to_string()
            }
            .is_retryable()
        );
    }
}
