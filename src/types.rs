//! Core type definitions for the matching engine.
//!
//! This module defines the embedding vector type, the boundary records
//! exchanged with the upstream catalog services, and the result type
//! returned to callers. Upstream payloads are loosely typed; the engine
//! narrows them to these strict records at the boundary and ignores
//! everything else.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::AggregationStrategy;

/// Dimensionality of the shared text–image embedding space.
pub const EMBEDDING_DIM: usize = 512;

/// Size in bytes of one embedding persisted as little-endian f32.
pub const EMBEDDING_FILE_BYTES: usize = EMBEDDING_DIM * 4;

/// Embedding vector type alias.
///
/// Embeddings are f32 vectors of dimension [`EMBEDDING_DIM`], produced
/// unit-length by the encoder so cosine similarity reduces to a dot
/// product. They are never mutated after creation.
pub type Embedding = Vec<f32>;

/// An artist as supplied by the upstream portfolio service.
///
/// Only the fields the engine needs are deserialized; any additional
/// upstream fields are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    /// Stable identity assigned by the upstream catalog.
    pub id: i64,

    /// Opaque display label.
    pub name: String,

    /// Ordered portfolio image URLs. Duplicates are preserved as-is,
    /// but each unique URL is embedded only once.
    pub image_urls: Vec<String>,
}

impl ArtistRecord {
    /// Creates a record from its parts.
    pub fn new(id: i64, name: impl Into<String>, image_urls: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            image_urls,
        }
    }
}

/// An artist after ingestion: the upstream record plus the embeddings
/// that were successfully computed for its portfolio.
///
/// Invariants after ingestion:
/// - every URL in `embeddings` also appears in `image_urls`;
/// - `embeddings` follows the order URLs appear in `image_urls`;
/// - the successful URLs and `failed_urls` partition the unique URLs.
#[derive(Clone, Debug)]
pub struct ArtistProfile {
    /// Stable identity from upstream.
    pub id: i64,

    /// Display label.
    pub name: String,

    /// Ordered portfolio image URLs as supplied by upstream.
    pub image_urls: Vec<String>,

    /// `(url, embedding)` pairs for successfully processed URLs,
    /// in `image_urls` order.
    pub embeddings: Vec<(String, Embedding)>,

    /// URLs that were processed but failed (download, validation,
    /// or encoding).
    pub failed_urls: HashSet<String>,
}

impl ArtistProfile {
    /// Creates an empty profile from an upstream record.
    pub fn from_record(record: ArtistRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            image_urls: record.image_urls,
            embeddings: Vec::new(),
            failed_urls: HashSet::new(),
        }
    }

    /// Returns true if no portfolio image produced an embedding.
    ///
    /// Such artists are excluded from the queryable index.
    pub fn is_unmatched(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// One ranked entry returned by `recommend`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecommendationResult {
    /// Stable identity from upstream.
    pub artist_id: i64,

    /// Display label.
    pub name: String,

    /// Aggregated similarity in [0, 1].
    pub score: f32,

    /// URL of the illustration with the highest individual score,
    /// independent of the aggregation strategy.
    pub top_illustration_url: String,

    /// Number of illustrations that participated in scoring (≥ 1).
    pub num_illustrations: usize,

    /// Strategy that produced `score`.
    pub aggregation_strategy: AggregationStrategy,
}

/// A project brief as supplied by the upstream project service.
///
/// The engine consumes a brief only as a single query string built by
/// [`Brief::to_query_text()`]. All fields are optional; missing fields
/// are omitted from the query silently.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Brief {
    /// Project title.
    pub title: Option<String>,

    /// Free-text description of the work.
    pub description: Option<String>,

    /// Work arrangement (e.g. `REMOTE`, `ON_SITE`).
    pub modality: Option<String>,

    /// Contract type (e.g. `FREELANCE`, `FULL_TIME`).
    pub contract: Option<String>,

    /// Requested specialty (e.g. `CONCEPT_ART`, `COMIC_MANGA`).
    pub specialty: Option<String>,

    /// Free-text technical requirements.
    pub requirements: Option<String>,
}

impl Brief {
    /// Flattens the brief into the dense query paragraph the text
    /// encoder consumes.
    ///
    /// Enum-like values are humanized: underscores become spaces and the
    /// token is lowercased (`CONCEPT_ART` → `concept art`). Fields that
    /// are `None` are omitted.
    pub fn to_query_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(title) = &self.title {
            parts.push(format!("Project titled: {title}."));
        }
        if let Some(specialty) = &self.specialty {
            parts.push(format!(
                "We are looking for a specialist in {}.",
                humanize_token(specialty)
            ));
        }
        if let Some(description) = &self.description {
            parts.push(format!("Job description: {description}."));
        }
        if let Some(requirements) = &self.requirements {
            parts.push(format!(
                "Technical requirements and skills: {requirements}."
            ));
        }
        if let Some(modality) = &self.modality {
            parts.push(format!("Work arrangement: {}.", humanize_token(modality)));
        }
        if let Some(contract) = &self.contract {
            parts.push(format!("Contract type: {}.", humanize_token(contract)));
        }

        parts.join(" ")
    }
}

/// Rewrites an enum-like upstream value (`CONCEPT_ART`) into readable
/// lowercase tokens (`concept art`).
fn humanize_token(value: &str) -> String {
    value.replace('_', " ").to_lowercase()
}
