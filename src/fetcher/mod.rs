//! Image download and validation.
//!
//! The fetcher turns a portfolio image URL into a decoded RGB raster:
//!
//! ```text
//! URL → HTTP GET (deadline, bounded body) → Content-Type check
//!     → decode → RGB
//! ```
//!
//! Transient failures (connect errors, timeouts, 5xx, 408, 429) are
//! retried with exponential backoff up to 3 attempts total. Permanent
//! failures (other 4xx, wrong content type, undecodable bytes, oversized
//! bodies) fail immediately. Every failure carries the URL, a
//! classification, and the elapsed wall time — see
//! [`FetchError`](crate::error::FetchError).
//!
//! The fetcher is stateless with respect to its callers: the ingestion
//! worker pool shares a single instance, and the underlying agent reuses
//! connections across requests.

use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, warn};
use ureq::Agent;

use crate::config::Config;
use crate::error::{FetchError, FetchErrorKind};

/// Total attempts per URL (1 initial + 2 retries).
const MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry; doubled per retry (1 s, 2 s).
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Downloads and validates portfolio images.
pub struct ImageFetcher {
    /// Shared HTTP agent (keep-alive connection reuse).
    agent: Agent,

    /// Maximum accepted response body size.
    max_bytes: u64,

    /// Delay before the first retry; doubled for each subsequent retry.
    backoff_base: Duration,
}

impl ImageFetcher {
    /// Creates a fetcher with the configured timeout and body limit.
    pub fn new(config: &Config) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(config.image_download_timeout))
            .http_status_as_error(false)
            .user_agent(concat!("artmatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .new_agent();

        Self {
            agent,
            max_bytes: config.max_image_bytes,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Overrides the retry backoff base delay.
    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Downloads, validates, and decodes one image.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] describing the final failure once all
    /// attempts are exhausted (or immediately for permanent failures).
    pub fn fetch(&self, url: &str) -> Result<RgbImage, FetchError> {
        let started = Instant::now();

        if url::Url::parse(url).is_err() {
            return Err(FetchError::new(
                url,
                FetchErrorKind::InvalidUrl,
                started.elapsed(),
            ));
        }

        let mut last_kind = FetchErrorKind::Network("no attempt made".into());

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(url) {
                Ok(image) => {
                    debug!(
                        url,
                        attempt,
                        width = image.width(),
                        height = image.height(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Image fetched"
                    );
                    return Ok(image);
                }
                Err(kind) if !kind.is_transient() => {
                    warn!(url, error = %kind, "Image fetch failed permanently");
                    return Err(FetchError::new(url, kind, started.elapsed()));
                }
                Err(kind) => {
                    if attempt < MAX_ATTEMPTS {
                        let delay = self.backoff_base * 2u32.pow(attempt - 1);
                        warn!(
                            url,
                            attempt,
                            error = %kind,
                            retry_in_ms = delay.as_millis() as u64,
                            "Transient fetch failure, retrying"
                        );
                        std::thread::sleep(delay);
                    }
                    last_kind = kind;
                }
            }
        }

        warn!(url, attempts = MAX_ATTEMPTS, error = %last_kind, "Image fetch exhausted retries");
        Err(FetchError::new(url, last_kind, started.elapsed()))
    }

    /// One GET attempt: status, content type, bounded body, decode.
    fn attempt(&self, url: &str) -> Result<RgbImage, FetchErrorKind> {
        let mut response = self.agent.get(url).call().map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchErrorKind::Http(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            return Err(FetchErrorKind::UnsupportedContentType(content_type));
        }

        // Early reject on declared size; the bounded read below is the
        // authoritative guard for servers that omit or lie about it.
        if let Some(declared) = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            if declared > self.max_bytes {
                return Err(FetchErrorKind::TooLarge(self.max_bytes));
            }
        }

        let bytes = response
            .body_mut()
            .with_config()
            .limit(self.max_bytes)
            .read_to_vec()
            .map_err(|e| match e {
                ureq::Error::BodyExceedsLimit(_) => FetchErrorKind::TooLarge(self.max_bytes),
                other => classify_transport(other),
            })?;

        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| FetchErrorKind::InvalidImage(e.to_string()))?;

        Ok(decoded.to_rgb8())
    }
}

/// Classifies a transport-level error: deadline expiry vs everything
/// else on the wire.
fn classify_transport(err: ureq::Error) -> FetchErrorKind {
    match err {
        ureq::Error::Timeout(_) => FetchErrorKind::Timeout,
        ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => FetchErrorKind::Timeout,
        other => FetchErrorKind::Network(other.to_string()),
    }
}
