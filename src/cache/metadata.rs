//! On-disk metadata schema for the embedding cache.
//!
//! The cache directory holds one `metadata.json` index plus one
//! `<hex-hash>.vec` file per embedding:
//!
//! ```text
//! <cache_dir>/
//!   metadata.json      # {version, model_name, embeddings: {hash: entry}}
//!   <hash>.vec         # 512 × f32 little-endian (2048 bytes)
//!   ...
//! ```
//!
//! The hash is the SHA-256 hex digest of the URL's UTF-8 bytes — stable,
//! content-independent, and filesystem-safe.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current metadata schema version.
pub const METADATA_VERSION: &str = "1";

/// Name of the index file inside the cache directory.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Extension of the per-embedding vector files.
pub const VECTOR_EXTENSION: &str = "vec";

/// One cached embedding: which URL it came from, when it was created,
/// and where its vector file lives (relative to the cache directory).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source image URL.
    pub url: String,

    /// When the embedding was persisted (RFC3339).
    pub created_at: DateTime<Utc>,

    /// Vector file name, `<hash>.vec`.
    pub file_path: String,
}

/// The persisted index: schema version, the encoder model that produced
/// every entry, and the hash → entry map.
///
/// A `BTreeMap` keeps the serialized file deterministic, which makes
/// diffs and test fixtures stable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Schema version, currently [`METADATA_VERSION`].
    pub version: String,

    /// Encoder model name all entries were produced under.
    pub model_name: String,

    /// Hash → entry index.
    pub embeddings: BTreeMap<String, CacheEntry>,
}

impl CacheMetadata {
    /// Creates an empty index for the given model.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            model_name: model_name.into(),
            embeddings: BTreeMap::new(),
        }
    }
}

/// Digest of a URL used as the cache key and vector file stem.
pub fn url_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Vector file name for a hash.
pub fn vector_file_name(hash: &str) -> String {
    format!("{hash}.{VECTOR_EXTENSION}")
}
