//! # artmatch
//!
//! Embedding-backed visual portfolio matching engine.
//!
//! Given a textual project brief, artmatch ranks a catalog of
//! illustrators by how well their actual portfolio images match the
//! brief, using a shared text–image embedding space (CLIP family,
//! 512-dimensional).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use artmatch::{ArtistRecord, Config, Recommender};
//!
//! // Create the engine (built-in CLIP encoder, `builtin-clip` feature)
//! let engine = Recommender::new(Config::from_env())?;
//!
//! // Ingest the artist catalog: download, encode, and cache every
//! // portfolio image
//! let report = engine.initialize(artists)?;
//! println!("indexed {} artists", report.artists_indexed);
//!
//! // Rank against a brief
//! let results = engine.recommend("watercolor children's book, soft palette", 5)?;
//! for r in &results {
//!     println!("{}: {:.3} (best: {})", r.name, r.score, r.top_illustration_url);
//! }
//! ```
//!
//! ## Key Concepts
//!
//! ### Embeddings
//!
//! Every portfolio image and every brief is encoded into a unit-length
//! 512-dimensional f32 vector. Image embeddings are computed once and
//! persisted in a durable on-disk cache keyed by URL; briefs are encoded
//! per query. Cosine similarity between unit vectors is a dot product,
//! mapped into [0, 1] scores.
//!
//! ### Ingestion
//!
//! `initialize` resolves every unique portfolio URL: cache hits skip
//! the network entirely; misses flow through a bounded
//! fetch → encode → persist pipeline (a download worker pool feeding a
//! single encoder task). Per-image failures are recorded and never
//! abort ingestion; artists with no usable image are excluded from the
//! index.
//!
//! ### Aggregation
//!
//! An artist's per-illustration scores collapse into one score under a
//! configurable strategy (`max`, `mean`, `weighted_mean`,
//! `top_k_mean`). Results are ranked deterministically: score
//! descending, artist id ascending on ties.
//!
//! ## Features
//!
//! - `builtin-clip` - Enable the built-in CLIP encoder (ONNX Runtime).
//!   Without it, supply your own [`ImageEncoder`] via
//!   [`Recommender::with_encoder`].
//!
//! ## Thread Safety
//!
//! `Recommender` is `Send + Sync` and can be shared across threads using
//! `Arc`. Queries read an immutable index snapshot; reloads build the
//! replacement aside and publish it with a pointer swap.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod error;
mod metrics;
mod recommender;
mod types;

pub mod aggregator;
pub mod cache;
pub mod embedding;
pub mod fetcher;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main engine interface
pub use recommender::{CancelToken, IngestReport, Recommender};

// Configuration
pub use config::{AggregationStrategy, Config, DEFAULT_CLIP_MODEL, KNOWN_CLIP_MODELS};

// Error handling
pub use error::{ArtMatchError, CacheError, FetchError, FetchErrorKind, Result};

// Core types
pub use types::{
    ArtistProfile, ArtistRecord, Brief, Embedding, RecommendationResult, EMBEDDING_DIM,
    EMBEDDING_FILE_BYTES,
};

// Encoder trait (for custom encoders)
pub use embedding::ImageEncoder;

// Cache (for explicit invalidation)
pub use cache::{CacheStats, EmbeddingCache};

// Metrics
pub use metrics::{MetricsSnapshot, ServiceStats};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common artmatch usage.
///
/// ```rust
/// use artmatch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{AggregationStrategy, Config};
    pub use crate::error::{ArtMatchError, Result};
    pub use crate::recommender::{IngestReport, Recommender};
    pub use crate::types::{ArtistRecord, Brief, RecommendationResult};
}
