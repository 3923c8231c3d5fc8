//! Configuration types for the matching engine.
//!
//! The [`Config`] struct controls engine behavior including:
//! - Image preprocessing and encoder batching
//! - Download timeouts and worker pool sizing
//! - Embedding cache location
//! - Score aggregation strategy
//!
//! Configuration can be built programmatically or loaded from the
//! environment with [`Config::from_env()`]. Out-of-range values are
//! clamped and unparseable values fall back to defaults; both are
//! logged at warning level.
//!
//! # Example
//! ```rust
//! use artmatch::{AggregationStrategy, Config};
//!
//! // Use defaults (max aggregation, clip-ViT-B-32)
//! let config = Config::default();
//!
//! // Customize for production
//! let config = Config {
//!     aggregation: AggregationStrategy::TopKMean,
//!     image_download_workers: 20,
//!     ..Default::default()
//! };
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ArtMatchError;

/// Default encoder model identifier.
pub const DEFAULT_CLIP_MODEL: &str = "clip-ViT-B-32";

/// Encoder model identifiers the engine knows how to load.
///
/// All entries produce 512-dimensional embeddings. A configured name
/// outside this set falls back to [`DEFAULT_CLIP_MODEL`].
pub const KNOWN_CLIP_MODELS: &[&str] = &["clip-ViT-B-32", "clip-ViT-B-16"];

/// Engine configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use artmatch::Config;
///
/// let config = Config {
///     image_batch_size: 16,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum of width/height after preprocessing resize, in pixels.
    ///
    /// Larger images are downscaled (aspect preserved) before encoding.
    /// Clamped to [1, 2048]. Default: 512
    pub max_image_size: u32,

    /// Number of images encoded per model invocation.
    ///
    /// Clamped to [1, 128]. Default: 32
    pub image_batch_size: usize,

    /// Per-attempt HTTP deadline for image downloads.
    ///
    /// Clamped to [1, 60] seconds. Default: 10 s
    pub image_download_timeout: Duration,

    /// Size of the image download worker pool.
    ///
    /// Clamped to [1, 50]. Default: 10
    pub image_download_workers: usize,

    /// Maximum accepted response body size for a single image.
    ///
    /// Default: 20 MiB
    pub max_image_bytes: u64,

    /// Embedding cache directory. Created if absent.
    ///
    /// Default: `./cache/embeddings`
    pub cache_dir: PathBuf,

    /// How per-illustration scores collapse into one per-artist score.
    pub aggregation: AggregationStrategy,

    /// `k` for the `top_k_mean` strategy.
    ///
    /// Clamped to [1, 20]. Default: 3
    pub top_k_illustrations: usize,

    /// Encoder model identifier.
    ///
    /// Must be one of [`KNOWN_CLIP_MODELS`]; anything else falls back to
    /// [`DEFAULT_CLIP_MODEL`]. The cache is keyed by this name: entries
    /// written under a different model are treated as misses.
    pub model_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_image_size: 512,
            image_batch_size: 32,
            image_download_timeout: Duration::from_secs(10),
            image_download_workers: 10,
            max_image_bytes: 20 * 1024 * 1024,
            cache_dir: PathBuf::from("./cache/embeddings"),
            aggregation: AggregationStrategy::Max,
            top_k_illustrations: 3,
            model_name: DEFAULT_CLIP_MODEL.to_string(),
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from environment variables.
    ///
    /// Recognized keys: `MAX_IMAGE_SIZE`, `IMAGE_BATCH_SIZE`,
    /// `IMAGE_DOWNLOAD_TIMEOUT`, `IMAGE_DOWNLOAD_WORKERS`,
    /// `EMBEDDING_CACHE_DIR`, `AGGREGATION_STRATEGY`,
    /// `TOP_K_ILLUSTRATIONS`, `CLIP_MODEL_NAME`.
    ///
    /// Unset keys keep their defaults. Unparseable values fall back to
    /// defaults and out-of-range values are clamped; both are logged at
    /// warning level.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_image_size = read_env_clamped(
            "MAX_IMAGE_SIZE",
            defaults.max_image_size,
            1,
            2048,
        );
        let image_batch_size = read_env_clamped(
            "IMAGE_BATCH_SIZE",
            defaults.image_batch_size,
            1,
            128,
        );
        let timeout_secs = read_env_clamped("IMAGE_DOWNLOAD_TIMEOUT", 10u64, 1, 60);
        let image_download_workers = read_env_clamped(
            "IMAGE_DOWNLOAD_WORKERS",
            defaults.image_download_workers,
            1,
            50,
        );
        let top_k_illustrations = read_env_clamped(
            "TOP_K_ILLUSTRATIONS",
            defaults.top_k_illustrations,
            1,
            20,
        );

        let cache_dir = std::env::var("EMBEDDING_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let aggregation = match std::env::var("AGGREGATION_STRATEGY") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    value = %raw,
                    default = %defaults.aggregation,
                    "Unknown AGGREGATION_STRATEGY, falling back to default"
                );
                defaults.aggregation
            }),
            Err(_) => defaults.aggregation,
        };

        let model_name = match std::env::var("CLIP_MODEL_NAME") {
            Ok(raw) if KNOWN_CLIP_MODELS.contains(&raw.as_str()) => raw,
            Ok(raw) => {
                warn!(
                    value = %raw,
                    default = DEFAULT_CLIP_MODEL,
                    "Unknown CLIP_MODEL_NAME, falling back to default"
                );
                DEFAULT_CLIP_MODEL.to_string()
            }
            Err(_) => defaults.model_name,
        };

        Self {
            max_image_size,
            image_batch_size,
            image_download_timeout: Duration::from_secs(timeout_secs),
            image_download_workers,
            max_image_bytes: defaults.max_image_bytes,
            cache_dir,
            aggregation,
            top_k_illustrations,
            model_name,
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `Recommender` construction. Configuration
    /// built through [`Config::from_env()`] is always valid; this guards
    /// direct struct construction.
    ///
    /// # Errors
    /// Returns `ArtMatchError::Config` if any field is out of range.
    pub fn validate(&self) -> Result<(), ArtMatchError> {
        if !(1..=2048).contains(&self.max_image_size) {
            return Err(ArtMatchError::config(format!(
                "max_image_size must be in [1, 2048], got {}",
                self.max_image_size
            )));
        }
        if !(1..=128).contains(&self.image_batch_size) {
            return Err(ArtMatchError::config(format!(
                "image_batch_size must be in [1, 128], got {}",
                self.image_batch_size
            )));
        }
        let timeout_secs = self.image_download_timeout.as_secs();
        if !(1..=60).contains(&timeout_secs) {
            return Err(ArtMatchError::config(format!(
                "image_download_timeout must be in [1, 60] seconds, got {timeout_secs}"
            )));
        }
        if !(1..=50).contains(&self.image_download_workers) {
            return Err(ArtMatchError::config(format!(
                "image_download_workers must be in [1, 50], got {}",
                self.image_download_workers
            )));
        }
        if !(1..=20).contains(&self.top_k_illustrations) {
            return Err(ArtMatchError::config(format!(
                "top_k_illustrations must be in [1, 20], got {}",
                self.top_k_illustrations
            )));
        }
        if self.max_image_bytes == 0 {
            return Err(ArtMatchError::config("max_image_bytes must be greater than 0"));
        }
        if !KNOWN_CLIP_MODELS.contains(&self.model_name.as_str()) {
            return Err(ArtMatchError::config(format!(
                "unknown model '{}' (known: {})",
                self.model_name,
                KNOWN_CLIP_MODELS.join(", ")
            )));
        }
        Ok(())
    }
}

/// Reads a numeric environment variable, clamping to `[min, max]`.
///
/// Unset → default. Unparseable → default with a warning. Out of range →
/// clamped with a warning.
fn read_env_clamped<T>(key: &str, default: T, min: T, max: T) -> T
where
    T: Copy + Ord + FromStr + std::fmt::Display,
{
    let raw = match std::env::var(key) {
        Ok(raw) => raw,
        Err(_) => return default,
    };

    let parsed: T = match raw.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = %raw, %default, "Unparseable value, falling back to default");
            return default;
        }
    };

    let clamped = parsed.clamp(min, max);
    if clamped != parsed {
        warn!(key, value = %parsed, %clamped, "Value out of range, clamped");
    }
    clamped
}

/// Rule for collapsing a per-illustration score vector into one
/// per-artist score.
///
/// See [`crate::aggregator`] for the definitions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Highest single score (best matching illustration).
    #[default]
    Max,

    /// Arithmetic mean (overall portfolio quality).
    Mean,

    /// Self-weighted mean `Σs² / Σs` (emphasizes strong matches).
    WeightedMean,

    /// Mean of the `min(k, n)` largest scores.
    TopKMean,
}

impl AggregationStrategy {
    /// Stable string form, matching the configuration key values.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Mean => "mean",
            Self::WeightedMean => "weighted_mean",
            Self::TopKMean => "top_k_mean",
        }
    }
}

impl std::fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationStrategy {
    type Err = ArtMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            "weighted_mean" => Ok(Self::WeightedMean),
            "top_k_mean" => Ok(Self::TopKMean),
            other => Err(ArtMatchError::config(format!(
                "unknown aggregation strategy '{other}' \
                 (expected max, mean, weighted_mean, or top_k_mean)"
            ))),
        }
    }
}
