//! Error types for artmatch.
//!
//! artmatch uses a hierarchical error system:
//! - `ArtMatchError` is the top-level error returned by all public APIs
//! - Specific error types (`FetchError`, `CacheError`) provide detail
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use artmatch::{Recommender, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let engine = Recommender::new(Config::default())?;
//!     // ... operations that may fail ...
//!     Ok(())
//! }
//! ```
//!
//! Per-image failures during ingestion never reach callers of `recommend`;
//! they are counted, logged, and recorded on the owning artist profile.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for artmatch operations.
pub type Result<T> = std::result::Result<T, ArtMatchError>;

/// Top-level error enum for all artmatch operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum ArtMatchError {
    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// Image download or validation error.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Embedding cache error (I/O, corruption, locking).
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Embedding generation error (model load, inference, tokenization).
    #[error("Encode error: {0}")]
    Encode(String),

    /// A query arrived while the initial index load was still in progress.
    #[error("Index not ready: initial load in progress")]
    NotReady,

    /// Ingestion was cancelled via its cancellation token.
    #[error("Ingestion cancelled")]
    Cancelled,

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtMatchError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates an encode error with the given message.
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Returns true if this is a fetch error.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }

    /// Returns true if this is a cache error.
    pub fn is_cache(&self) -> bool {
        matches!(self, Self::Cache(_))
    }

    /// Returns true if this is a "not ready" error.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady)
    }

    /// Returns true if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Classification of a single image fetch failure.
///
/// The taxonomy distinguishes transient failures (retried with backoff)
/// from permanent ones (failed immediately).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The URL could not be parsed.
    InvalidUrl,

    /// The HTTP attempt exceeded the download deadline.
    Timeout,

    /// Connect failure, DNS failure, or mid-transfer I/O error.
    Network(String),

    /// The server answered with a non-success status.
    Http(u16),

    /// The response `Content-Type` does not start with `image/`.
    UnsupportedContentType(String),

    /// The body was fetched but could not be decoded as an image.
    InvalidImage(String),

    /// The response body exceeded the configured size limit.
    TooLarge(u64),
}

impl FetchErrorKind {
    /// Returns true if a retry with backoff may succeed.
    ///
    /// Transient: timeouts, network failures, 5xx, 408, 429.
    /// Permanent: invalid URLs, other 4xx, bad content, oversized bodies.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Http(status) => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Short stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Http(_) => "http",
            Self::UnsupportedContentType(_) => "unsupported_content_type",
            Self::InvalidImage(_) => "invalid_image",
            Self::TooLarge(_) => "too_large",
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl => write!(f, "invalid URL"),
            Self::Timeout => write!(f, "download timed out"),
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Http(status) => write!(f, "HTTP status {status}"),
            Self::UnsupportedContentType(ct) => write!(f, "unsupported content type '{ct}'"),
            Self::InvalidImage(msg) => write!(f, "invalid image: {msg}"),
            Self::TooLarge(limit) => write!(f, "body exceeds {limit} bytes"),
        }
    }
}

/// A failed image fetch: which URL, why, and how long the attempts took.
#[derive(Debug, Clone, Error)]
#[error("failed to fetch {url} after {elapsed:?}: {kind}")]
pub struct FetchError {
    /// The URL that failed.
    pub url: String,
    /// Failure classification.
    pub kind: FetchErrorKind,
    /// Total wall time spent across all attempts.
    pub elapsed: Duration,
}

impl FetchError {
    pub(crate) fn new(url: impl Into<String>, kind: FetchErrorKind, elapsed: Duration) -> Self {
        Self {
            url: url.into(),
            kind,
            elapsed,
        }
    }
}

/// Embedding cache errors.
///
/// These errors indicate problems with the on-disk cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed.
    #[error("Cache I/O error: {0}")]
    Io(String),

    /// A cache entry or its vector file is damaged.
    #[error("Corrupt cache entry: {0}")]
    Corrupted(String),

    /// Metadata serialization/deserialization failed.
    #[error("Cache metadata error: {0}")]
    Serialization(String),

    /// Another process holds the cache directory lock.
    #[error(
        "Cache directory is locked by another process (lock file: {0}). \
         Remove the file if the owning process is gone."
    )]
    Locked(PathBuf),
}

impl CacheError {
    /// Creates an I/O error with the given message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
