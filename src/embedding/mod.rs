//! Embedding generation abstractions.
//!
//! This module provides the trait and implementations for the shared
//! text–image embedding space. Portfolio images and project briefs are
//! both mapped into [`EMBEDDING_DIM`]-dimensional unit vectors, so cosine
//! similarity between a brief and an illustration reduces to a dot
//! product.
//!
//! # Providers
//!
//! - `ClipEncoder` - Built-in CLIP vision+text encoder
//!   (requires the `builtin-clip` feature)
//! - Any caller-supplied type implementing [`ImageEncoder`] (used by the
//!   test suite with a deterministic synthetic encoder)
//!
//! Encoding is deterministic for a given model and input bytes; the
//! embedding cache relies on this for validity.

#[cfg(feature = "builtin-clip")]
pub mod clip;

use image::imageops::FilterType;
use image::RgbImage;

use crate::error::{ArtMatchError, Result};
use crate::types::{Embedding, EMBEDDING_DIM};

/// Encoder over the shared text–image embedding space.
///
/// Implementations must be thread-safe (`Send + Sync`); the engine
/// funnels all encode calls through a single task, but the handle is
/// shared across threads.
///
/// Every produced vector must have [`EMBEDDING_DIM`] components and unit
/// L2 norm (within 1e-5).
pub trait ImageEncoder: Send + Sync {
    /// Encodes a batch of RGB images, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns `ArtMatchError::Encode` if inference fails. A failure
    /// applies to the whole batch; the caller decides how to degrade.
    fn encode_images(&self, images: &[RgbImage]) -> Result<Vec<Embedding>>;

    /// Encodes a brief into the same space as the images.
    ///
    /// # Errors
    ///
    /// Returns `ArtMatchError::Encode` if tokenization or inference fails.
    fn encode_text(&self, text: &str) -> Result<Embedding>;

    /// Identifier of the underlying model.
    ///
    /// The embedding cache is keyed by this name: entries written under a
    /// different model are treated as misses.
    fn model_name(&self) -> &str;

    /// Dimension of the produced vectors.
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Validates that an embedding has the expected dimension.
    ///
    /// # Errors
    ///
    /// Returns `ArtMatchError::Encode` on a dimension mismatch.
    fn validate_embedding(&self, embedding: &Embedding) -> Result<()> {
        if embedding.len() != self.dimension() {
            return Err(ArtMatchError::encode(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension(),
                embedding.len()
            )));
        }
        Ok(())
    }
}

/// Creates the built-in encoder for the configured model.
///
/// # Errors
///
/// Returns an error if:
/// - the `builtin-clip` feature is not enabled
/// - the model files cannot be found or loaded
#[cfg(feature = "builtin-clip")]
pub fn create_encoder(
    config: &crate::config::Config,
) -> Result<std::sync::Arc<dyn ImageEncoder>> {
    let encoder = clip::ClipEncoder::new(&config.model_name, None)?;
    Ok(std::sync::Arc::new(encoder))
}

/// Creates the built-in encoder for the configured model.
///
/// # Errors
///
/// Always fails without the `builtin-clip` feature; supply your own
/// encoder via `Recommender::with_encoder` instead.
#[cfg(not(feature = "builtin-clip"))]
pub fn create_encoder(
    _config: &crate::config::Config,
) -> Result<std::sync::Arc<dyn ImageEncoder>> {
    Err(ArtMatchError::encode(
        "The built-in CLIP encoder requires the 'builtin-clip' feature; \
         use Recommender::with_encoder to supply a custom ImageEncoder",
    ))
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Caps the larger image dimension at `max_size`, preserving aspect
/// ratio, using Lanczos resampling.
///
/// Images already within the limit are returned unchanged. This resize
/// is a memory and latency guard; the encoder applies its own canonical
/// resize (e.g. 224×224) on top.
pub fn resize_to_limit(image: RgbImage, max_size: u32) -> RgbImage {
    let (width, height) = image.dimensions();

    if width <= max_size && height <= max_size {
        return image;
    }

    let (new_width, new_height) = if width > height {
        let scaled = (height as f32 * (max_size as f32 / width as f32)) as u32;
        (max_size, scaled.max(1))
    } else {
        let scaled = (width as f32 * (max_size as f32 / height as f32)) as u32;
        (scaled.max(1), max_size)
    };

    tracing::debug!(width, height, new_width, new_height, "Resized image");

    image::imageops::resize(&image, new_width, new_height, FilterType::Lanczos3)
}

// ---------------------------------------------------------------------------
// Vector math
// ---------------------------------------------------------------------------

/// L2 normalizes a vector to unit length.
///
/// After normalization, cosine similarity can be computed as a simple
/// dot product: `cos(a, b) = a · b` when `|a| = |b| = 1`. A zero vector
/// is returned unchanged (no division by zero).
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Returns true if `v` has unit L2 norm within `tolerance`.
pub fn is_unit_length(v: &[f32], tolerance: f32) -> bool {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    (norm - 1.0).abs() <= tolerance
}

/// Maps a cosine similarity in [-1, 1] to a score in [0, 1].
///
/// The clamp absorbs f32 rounding at the interval edges.
pub fn cosine_to_unit_score(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}
