//! CLIP-based embedding generation.
//!
//! This module provides the built-in encoder over the shared text–image
//! space using ONNX Runtime. It requires the `builtin-clip` feature to
//! be enabled.
//!
//! # Supported Models
//!
//! - **clip-ViT-B-32** (512 dimensions) - Default, fast and compact
//! - **clip-ViT-B-16** (512 dimensions) - Higher quality, slower
//!
//! # Architecture
//!
//! Two ONNX sessions share the embedding space:
//!
//! ```text
//! Image → Resize/Crop 224 → Normalize → Vision Encoder → L2 Normalize
//! Text  → BPE Tokenize (77) ──────────→ Text Encoder   → L2 Normalize
//! ```
//!
//! # Performance Notes
//!
//! - Vision inference is CPU-intensive; use `encode_images()` with full
//!   batches rather than per-image calls
//! - The engine funnels all encode calls through a single task; the
//!   sessions are still mutex-guarded because `Session::run()` requires
//!   `&mut self`

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array2, Array4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};
use tracing::{debug, info};

use crate::config::DEFAULT_CLIP_MODEL;
use crate::embedding::{l2_normalize, ImageEncoder};
use crate::error::{ArtMatchError, Result};
use crate::types::{Embedding, EMBEDDING_DIM};

// ---------------------------------------------------------------------------
// Model registry
// ---------------------------------------------------------------------------

/// CLIP token sequence length (BPE tokens, padded/truncated).
const CONTEXT_LENGTH: usize = 77;

/// End-of-text token id used for padding.
const PAD_TOKEN_ID: u32 = 49407;

/// Per-channel normalization applied after scaling pixels to [0, 1].
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// File names expected in each model directory.
const VISION_FILENAME: &str = "vision_model.onnx";
const TEXT_FILENAME: &str = "text_model.onnx";
const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// A known CLIP variant with verified download URLs.
#[derive(Debug, Clone)]
pub struct ClipModelInfo {
    /// Model identifier (matches the configuration value).
    pub name: &'static str,
    /// URL for the vision encoder ONNX model.
    pub vision_url: &'static str,
    /// URL for the text encoder ONNX model.
    pub text_url: &'static str,
    /// URL for the tokenizer JSON (BPE).
    pub tokenizer_url: &'static str,
    /// Input image resolution.
    pub input_resolution: u32,
}

/// Known CLIP models. All produce [`EMBEDDING_DIM`]-dimensional vectors.
pub static CLIP_MODELS: &[ClipModelInfo] = &[
    ClipModelInfo {
        name: "clip-ViT-B-32",
        vision_url:
            "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/onnx/vision_model.onnx",
        text_url:
            "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/onnx/text_model.onnx",
        tokenizer_url:
            "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/tokenizer.json",
        input_resolution: 224,
    },
    ClipModelInfo {
        name: "clip-ViT-B-16",
        vision_url:
            "https://huggingface.co/Xenova/clip-vit-base-patch16/resolve/main/onnx/vision_model.onnx",
        text_url:
            "https://huggingface.co/Xenova/clip-vit-base-patch16/resolve/main/onnx/text_model.onnx",
        tokenizer_url:
            "https://huggingface.co/Xenova/clip-vit-base-patch16/resolve/main/tokenizer.json",
        input_resolution: 224,
    },
];

/// Looks up model info by name, falling back to the default variant.
pub fn get_model_info(name: &str) -> &'static ClipModelInfo {
    CLIP_MODELS
        .iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| {
            CLIP_MODELS
                .iter()
                .find(|m| m.name == DEFAULT_CLIP_MODEL)
                .expect("default model present in registry")
        })
}

// ---------------------------------------------------------------------------
// ClipEncoder
// ---------------------------------------------------------------------------

/// CLIP encoder backed by ONNX Runtime.
///
/// The vision session, text session, and tokenizer are loaded eagerly at
/// construction time for fail-fast behavior — if the model files are
/// missing, you'll get an error at engine construction, not at the first
/// ingestion.
pub struct ClipEncoder {
    /// Vision encoder session. Mutex because `Session::run()` requires
    /// `&mut self` while [`ImageEncoder`] uses `&self`.
    vision: Mutex<Session>,

    /// Text encoder session.
    text: Mutex<Session>,

    /// BPE tokenizer matching the text encoder. Immutable after loading.
    tokenizer: Tokenizer,

    /// Registry entry for the loaded variant.
    info: &'static ClipModelInfo,
}

impl ClipEncoder {
    /// Creates a CLIP encoder for the named model.
    ///
    /// # Arguments
    ///
    /// * `model_name` - One of the identifiers in [`CLIP_MODELS`];
    ///   unknown names fall back to the default variant
    /// * `models_dir` - Optional directory containing `vision_model.onnx`,
    ///   `text_model.onnx` and `tokenizer.json`. If `None`, looks in the
    ///   default cache directory
    ///   (`~/.cache/artmatch/models/<model-name>/`).
    ///
    /// # Errors
    ///
    /// Returns an error if model files are not found or cannot be loaded.
    pub fn new(model_name: &str, models_dir: Option<PathBuf>) -> Result<Self> {
        let info = get_model_info(model_name);
        let model_dir = resolve_model_dir(models_dir.as_deref(), info)?;

        info!(
            model = info.name,
            model_dir = %model_dir.display(),
            "Loading CLIP encoder"
        );

        let vision = create_session(&model_dir.join(VISION_FILENAME))?;
        let text = create_session(&model_dir.join(TEXT_FILENAME))?;
        let tokenizer = load_tokenizer(&model_dir.join(TOKENIZER_FILENAME))?;

        debug!(model = info.name, dimension = EMBEDDING_DIM, "CLIP encoder loaded");

        Ok(Self {
            vision: Mutex::new(vision),
            text: Mutex::new(text),
            tokenizer,
            info,
        })
    }

    /// Downloads the model files for the named variant into the default
    /// cache directory, skipping files that already exist.
    ///
    /// Returns the path to the model directory.
    pub fn download_model_files(model_name: &str) -> Result<PathBuf> {
        let info = get_model_info(model_name);
        let cache_dir = default_models_dir(info.name);

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            ArtMatchError::encode(format!(
                "Failed to create model cache directory {}: {e}",
                cache_dir.display()
            ))
        })?;

        for (filename, url) in [
            (VISION_FILENAME, info.vision_url),
            (TEXT_FILENAME, info.text_url),
            (TOKENIZER_FILENAME, info.tokenizer_url),
        ] {
            let dest = cache_dir.join(filename);
            if !dest.exists() {
                info!(url, dest = %dest.display(), "Downloading CLIP model file");
                download_file(url, &dest)?;
            }
        }

        info!(dir = %cache_dir.display(), "Model files ready");
        Ok(cache_dir)
    }

    /// Builds the NCHW pixel tensor for a batch of images.
    ///
    /// Per image: resize the shortest edge to the model resolution
    /// (aspect preserved), center-crop to a square, scale to [0, 1] and
    /// apply the CLIP channel normalization.
    fn preprocess_batch(&self, images: &[RgbImage]) -> Array4<f32> {
        let size = self.info.input_resolution;
        let mut pixels =
            Array4::<f32>::zeros((images.len(), 3, size as usize, size as usize));

        for (n, image) in images.iter().enumerate() {
            let (w, h) = image.dimensions();

            let scale = size as f32 / w.min(h) as f32;
            let new_w = ((w as f32) * scale).round().max(1.0) as u32;
            let new_h = ((h as f32) * scale).round().max(1.0) as u32;
            let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

            let start_x = (resized.width().saturating_sub(size)) / 2;
            let start_y = (resized.height().saturating_sub(size)) / 2;

            for y in 0..size as usize {
                for x in 0..size as usize {
                    let pixel = resized.get_pixel(start_x + x as u32, start_y + y as u32);
                    for c in 0..3 {
                        let value = pixel[c] as f32 / 255.0;
                        pixels[[n, c, y, x]] = (value - CLIP_MEAN[c]) / CLIP_STD[c];
                    }
                }
            }
        }

        pixels
    }
}

impl ImageEncoder for ClipEncoder {
    fn encode_images(&self, images: &[RgbImage]) -> Result<Vec<Embedding>> {
        if images.is_empty() {
            return Ok(vec![]);
        }

        let pixel_values = self.preprocess_batch(images);
        let batch_size = images.len();

        let input_tensor = ort::value::Tensor::from_array(pixel_values)
            .map_err(|e| ArtMatchError::encode(format!("Tensor creation failed: {e}")))?;

        let mut session = self
            .vision
            .lock()
            .map_err(|e| ArtMatchError::encode(format!("Vision session lock poisoned: {e}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "pixel_values".into());

        let outputs = session
            .run(ort::inputs![input_name => input_tensor])
            .map_err(|e| ArtMatchError::encode(format!("Vision inference failed: {e}")))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ArtMatchError::encode(format!("Output extraction failed: {e}")))?;

        if data.len() != batch_size * EMBEDDING_DIM {
            return Err(ArtMatchError::encode(format!(
                "Vision output has {} values, expected {} x {}",
                data.len(),
                batch_size,
                EMBEDDING_DIM
            )));
        }

        let mut results = Vec::with_capacity(batch_size);
        for n in 0..batch_size {
            let raw = &data[n * EMBEDDING_DIM..(n + 1) * EMBEDDING_DIM];
            if raw.iter().any(|v| !v.is_finite()) {
                return Err(ArtMatchError::encode(
                    "Vision embedding contains non-finite values",
                ));
            }
            results.push(l2_normalize(raw));
        }

        debug!(batch = batch_size, "Encoded image batch");
        Ok(results)
    }

    fn encode_text(&self, text: &str) -> Result<Embedding> {
        if text.is_empty() {
            return Err(ArtMatchError::encode("Cannot encode empty text"));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ArtMatchError::encode(format!("Tokenization failed: {e}")))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let seq_len = input_ids.len();

        let ids_array = Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| ArtMatchError::encode(format!("Tensor shape error: {e}")))?;
        let mask_array = Array2::from_shape_vec((1, seq_len), attention_mask)
            .map_err(|e| ArtMatchError::encode(format!("Tensor shape error: {e}")))?;

        let ids_tensor = ort::value::Tensor::from_array(ids_array)
            .map_err(|e| ArtMatchError::encode(format!("Tensor creation failed: {e}")))?;
        let mask_tensor = ort::value::Tensor::from_array(mask_array)
            .map_err(|e| ArtMatchError::encode(format!("Tensor creation failed: {e}")))?;

        let mut session = self
            .text
            .lock()
            .map_err(|e| ArtMatchError::encode(format!("Text session lock poisoned: {e}")))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();

        // Some exported text encoders take only input_ids.
        let outputs = if input_names.len() >= 2 {
            session.run(ort::inputs![
                input_names[0].clone() => ids_tensor,
                input_names[1].clone() => mask_tensor,
            ])
        } else {
            let name = input_names
                .first()
                .cloned()
                .unwrap_or_else(|| "input_ids".to_string());
            session.run(ort::inputs![name => ids_tensor])
        }
        .map_err(|e| ArtMatchError::encode(format!("Text inference failed: {e}")))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ArtMatchError::encode(format!("Output extraction failed: {e}")))?;

        if data.len() < EMBEDDING_DIM {
            return Err(ArtMatchError::encode(format!(
                "Text output has {} values, expected at least {}",
                data.len(),
                EMBEDDING_DIM
            )));
        }

        let raw = &data[..EMBEDDING_DIM];
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(ArtMatchError::encode(
                "Text embedding contains non-finite values",
            ));
        }

        debug!(text_len = text.len(), "Encoded brief text");
        Ok(l2_normalize(raw))
    }

    fn model_name(&self) -> &str {
        self.info.name
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Creates an ONNX Runtime session with optimized settings.
fn create_session(model_path: &Path) -> Result<Session> {
    if !model_path.exists() {
        return Err(ArtMatchError::encode(format!(
            "Model file not found: {}. \
             Download with ClipEncoder::download_model_files(..)",
            model_path.display()
        )));
    }

    Session::builder()
        .map_err(|e| ArtMatchError::encode(format!("Failed to create session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| ArtMatchError::encode(format!("Failed to set optimization level: {e}")))?
        .commit_from_file(model_path)
        .map_err(|e| {
            ArtMatchError::encode(format!(
                "Failed to load ONNX model from {}: {e}",
                model_path.display()
            ))
        })
}

/// Loads the CLIP tokenizer with fixed 77-token padding and truncation.
fn load_tokenizer(tokenizer_path: &Path) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
        ArtMatchError::encode(format!(
            "Failed to load tokenizer from {}: {e}",
            tokenizer_path.display()
        ))
    })?;

    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(CONTEXT_LENGTH),
        direction: PaddingDirection::Right,
        pad_to_multiple_of: None,
        pad_id: PAD_TOKEN_ID,
        pad_type_id: 0,
        pad_token: "<|endoftext|>".to_string(),
    }));

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: CONTEXT_LENGTH,
            strategy: TruncationStrategy::LongestFirst,
            stride: 0,
            direction: TruncationDirection::Right,
        }))
        .map_err(|e| ArtMatchError::encode(format!("Failed to set truncation: {e}")))?;

    Ok(tokenizer)
}

/// Resolves the model directory from an optional user path or the
/// default per-user cache.
fn resolve_model_dir(models_dir: Option<&Path>, info: &ClipModelInfo) -> Result<PathBuf> {
    match models_dir {
        Some(path) => {
            if !path.exists() {
                return Err(ArtMatchError::encode(format!(
                    "Model directory not found: {}",
                    path.display()
                )));
            }
            Ok(path.to_path_buf())
        }
        None => {
            let cache_dir = default_models_dir(info.name);
            if !cache_dir.join(VISION_FILENAME).exists() {
                return Err(ArtMatchError::encode(format!(
                    "Model not found at {}. \
                     Download with: ClipEncoder::download_model_files(\"{}\")",
                    cache_dir.display(),
                    info.name
                )));
            }
            Ok(cache_dir)
        }
    }
}

/// Returns the default cache directory for a model.
///
/// Platform-specific:
/// - Linux: `~/.cache/artmatch/models/{name}/`
/// - macOS: `~/Library/Caches/artmatch/models/{name}/`
/// - Windows: `{LOCALAPPDATA}/artmatch/models/{name}/`
fn default_models_dir(model_name: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("artmatch")
        .join("models")
        .join(model_name)
}

/// Downloads a file from a URL to a local path.
fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = ureq::get(url)
        .call()
        .map_err(|e| ArtMatchError::encode(format!("Download failed for {url}: {e}")))?;

    let mut reader = response.body_mut().as_reader();
    let mut file = std::fs::File::create(dest).map_err(|e| {
        ArtMatchError::encode(format!("Failed to create file {}: {e}", dest.display()))
    })?;

    std::io::copy(&mut reader, &mut file).map_err(|e| {
        ArtMatchError::encode(format!("Failed to write to {}: {e}", dest.display()))
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
