//! Immutable artist index snapshot.
//!
//! The queryable index is built once per (re)ingestion and shared behind
//! an `Arc`. Readers score against a snapshot for the whole query while
//! a rebuild may be preparing its replacement off to the side; the swap
//! is a pointer replacement, so a reader sees either the old or the new
//! index, never a torn view.

use crate::aggregator::aggregate;
use crate::config::AggregationStrategy;
use crate::embedding::{cosine_to_unit_score, dot};
use crate::types::{ArtistProfile, Embedding, RecommendationResult};

/// One queryable artist: identity plus its portfolio embeddings in URL
/// order of success. Always holds at least one embedding — artists whose
/// entire portfolio failed are excluded before the index is built.
#[derive(Clone, Debug)]
pub(crate) struct IndexedArtist {
    pub id: i64,
    pub name: String,
    pub embeddings: Vec<(String, Embedding)>,
}

/// Immutable set of queryable artists.
#[derive(Clone, Debug, Default)]
pub(crate) struct ArtistIndex {
    artists: Vec<IndexedArtist>,
}

impl ArtistIndex {
    /// Builds an index from ingested profiles.
    ///
    /// Profiles without embeddings must already be filtered out; debug
    /// builds assert this.
    pub fn new(profiles: Vec<ArtistProfile>) -> Self {
        let artists = profiles
            .into_iter()
            .map(|profile| {
                debug_assert!(
                    !profile.embeddings.is_empty(),
                    "unmatched artists must be excluded before indexing"
                );
                IndexedArtist {
                    id: profile.id,
                    name: profile.name,
                    embeddings: profile.embeddings,
                }
            })
            .collect();
        Self { artists }
    }

    /// Number of queryable artists.
    pub fn len(&self) -> usize {
        self.artists.len()
    }

    /// Returns true if no artist is queryable.
    pub fn is_empty(&self) -> bool {
        self.artists.is_empty()
    }

    /// Scores every artist against the query embedding and returns the
    /// `top_k` best.
    ///
    /// Per artist: each illustration scores `(qᵀv + 1) / 2` (both
    /// vectors are unit-length, so the dot product is the cosine),
    /// clamped into [0, 1]; the configured strategy collapses them; the
    /// best-scoring illustration is reported regardless of strategy.
    /// Ordering is total and deterministic: score descending, artist id
    /// ascending on ties.
    pub fn rank(
        &self,
        query: &Embedding,
        top_k: usize,
        strategy: AggregationStrategy,
        top_k_illustrations: usize,
    ) -> Vec<RecommendationResult> {
        let mut results: Vec<RecommendationResult> = self
            .artists
            .iter()
            .map(|artist| {
                let scores: Vec<f32> = artist
                    .embeddings
                    .iter()
                    .map(|(_, embedding)| cosine_to_unit_score(dot(query, embedding)))
                    .collect();

                let mut best_idx = 0;
                for (i, score) in scores.iter().enumerate() {
                    if *score > scores[best_idx] {
                        best_idx = i;
                    }
                }

                RecommendationResult {
                    artist_id: artist.id,
                    name: artist.name.clone(),
                    score: aggregate(strategy, top_k_illustrations, &scores),
                    top_illustration_url: artist.embeddings[best_idx].0.clone(),
                    num_illustrations: scores.len(),
                    aggregation_strategy: strategy,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.artist_id.cmp(&b.artist_id))
        });
        results.truncate(top_k);
        results
    }
}
