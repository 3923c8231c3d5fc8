//! The matching engine facade.
//!
//! [`Recommender`] is the primary interface of the crate. It owns the
//! fetcher, the encoder, the embedding cache, the queryable artist
//! index, and the metrics counters, and provides:
//!
//! - [`initialize(artists)`](Recommender::initialize) — ingest
//!   portfolios (download → encode → cache) and publish the index
//! - [`recommend(brief_text, top_k)`](Recommender::recommend) — rank
//!   artists against a brief
//! - [`reload(artists)`](Recommender::reload) — rebuild the index off to
//!   the side and swap it in without interrupting readers
//! - [`stats()`](Recommender::stats) — service-level statistics
//!
//! # Index lifecycle
//!
//! The index passes through three states:
//!
//! - **Empty** (before the first `initialize`): queries return an empty
//!   list.
//! - **Loading** (first `initialize` in progress): queries fail fast
//!   with [`ArtMatchError::NotReady`].
//! - **Ready**: queries are served from an immutable snapshot. A
//!   `reload` keeps serving the previous snapshot until the replacement
//!   is published, so `NotReady` is only ever observable before the
//!   first successful initialization.
//!
//! # Thread Safety
//!
//! `Recommender` is `Send + Sync` and can be shared across threads using
//! `Arc`. Queries read an index snapshot; ingestion builds its
//! replacement aside and publishes it with a pointer swap.

mod index;
mod ingest;

pub use ingest::{CancelToken, IngestReport};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::embedding::{create_encoder, ImageEncoder};
use crate::error::Result;
use crate::fetcher::ImageFetcher;
use crate::metrics::{MetricsCollector, MetricsSnapshot, ServiceStats};
use crate::types::{ArtistProfile, ArtistRecord, Brief, RecommendationResult};
use crate::ArtMatchError;

use index::ArtistIndex;

/// The visual portfolio matching engine.
///
/// Construct with [`Recommender::new`] (built-in CLIP encoder, requires
/// the `builtin-clip` feature) or [`Recommender::with_encoder`] (any
/// [`ImageEncoder`] implementation), then call
/// [`initialize`](Recommender::initialize) with the artist catalog
/// before querying.
pub struct Recommender {
    config: Config,
    fetcher: ImageFetcher,
    encoder: Arc<dyn ImageEncoder>,
    cache: Arc<EmbeddingCache>,

    /// Queryable snapshot; `None` until the first successful
    /// initialization. Readers clone the `Arc` and drop the lock.
    index: RwLock<Option<Arc<ArtistIndex>>>,

    /// True while an initial load is in flight.
    loading: AtomicBool,

    metrics: MetricsCollector,
}

impl Recommender {
    /// Creates an engine with the built-in CLIP encoder for the
    /// configured model.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the configuration is invalid (see [`Config::validate`])
    /// - the encoder model cannot be loaded
    /// - the cache directory is unusable or locked by another process
    #[instrument(skip(config), fields(model = %config.model_name))]
    pub fn new(config: Config) -> Result<Self> {
        let encoder = create_encoder(&config)?;
        Self::with_encoder(config, encoder)
    }

    /// Creates an engine with a caller-supplied encoder.
    ///
    /// The embedding cache binds to `encoder.model_name()`: entries
    /// written under a different model are treated as misses (and kept
    /// on disk for a potential revert).
    pub fn with_encoder(config: Config, encoder: Arc<dyn ImageEncoder>) -> Result<Self> {
        config.validate()?;

        if encoder.model_name() != config.model_name {
            info!(
                configured = %config.model_name,
                encoder = %encoder.model_name(),
                "Encoder model differs from configured name; cache binds to the encoder"
            );
        }

        let cache = Arc::new(EmbeddingCache::open(&config.cache_dir, encoder.model_name())?);
        let fetcher = ImageFetcher::new(&config);

        info!(
            cache_dir = %config.cache_dir.display(),
            cached_entries = cache.len(),
            workers = config.image_download_workers,
            aggregation = %config.aggregation,
            "Recommender created"
        );

        Ok(Self {
            config,
            fetcher,
            encoder,
            cache,
            index: RwLock::new(None),
            loading: AtomicBool::new(false),
            metrics: MetricsCollector::new(),
        })
    }

    /// Ingests the artist catalog and publishes the queryable index.
    ///
    /// Every unique portfolio URL is resolved through the cache or the
    /// fetch → encode → persist pipeline. Per-image failures are
    /// recorded on their artist and never abort the run; artists whose
    /// entire portfolio failed are excluded from the index with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Ingestion itself does not fail on image errors; only
    /// infrastructure problems (encoder loss, poisoned state) surface
    /// here.
    #[instrument(skip(self, artists), fields(artists = artists.len()))]
    pub fn initialize(&self, artists: Vec<ArtistRecord>) -> Result<IngestReport> {
        self.initialize_with_cancel(artists, &CancelToken::new())
    }

    /// [`initialize`](Recommender::initialize) with cooperative
    /// cancellation.
    ///
    /// On cancellation, in-flight fetches finish their current URL,
    /// queued URLs are dropped, already-persisted cache entries remain
    /// valid, and the call returns [`ArtMatchError::Cancelled`] without
    /// touching the published index.
    pub fn initialize_with_cancel(
        &self,
        artists: Vec<ArtistRecord>,
        cancel: &CancelToken,
    ) -> Result<IngestReport> {
        let started = Instant::now();

        let first_load = self.index.read().expect("index lock poisoned").is_none();
        if first_load {
            self.loading.store(true, Ordering::SeqCst);
        }

        let result = self.build_and_publish(artists, cancel, started);

        if first_load {
            self.loading.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Rebuilds the index from a fresh artist catalog.
    ///
    /// The previous snapshot keeps serving queries until the replacement
    /// is published (replace-on-complete); accepted queries are never
    /// visibly interrupted.
    #[instrument(skip(self, artists), fields(artists = artists.len()))]
    pub fn reload(&self, artists: Vec<ArtistRecord>) -> Result<IngestReport> {
        self.initialize_with_cancel(artists, &CancelToken::new())
    }

    fn build_and_publish(
        &self,
        artists: Vec<ArtistRecord>,
        cancel: &CancelToken,
        started: Instant,
    ) -> Result<IngestReport> {
        // Flatten to the unique URL set across all artists.
        let mut unique_urls: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for artist in &artists {
            for url in &artist.image_urls {
                if seen.insert(url.as_str()) {
                    unique_urls.push(url.clone());
                }
            }
        }
        let urls_unique = unique_urls.len();

        let pipeline = ingest::process_urls(
            &self.fetcher,
            self.encoder.as_ref(),
            &self.cache,
            &self.config,
            unique_urls,
            cancel,
        );

        if cancel.is_cancelled() {
            warn!("Ingestion cancelled; keeping the previous index");
            return Err(ArtMatchError::Cancelled);
        }

        self.metrics
            .record_image_processing(pipeline.embedded as u64, pipeline.failed as u64);

        // Attach embeddings per artist in URL order of success.
        let mut matched: Vec<ArtistProfile> = Vec::new();
        let mut excluded = 0usize;

        for record in artists {
            let mut profile = ArtistProfile::from_record(record);
            let mut attached: HashSet<String> = HashSet::new();

            for url in profile.image_urls.clone() {
                if attached.contains(&url) || profile.failed_urls.contains(&url) {
                    continue;
                }
                match pipeline.outcomes.get(&url) {
                    Some(Some(embedding)) => {
                        attached.insert(url.clone());
                        profile.embeddings.push((url, embedding.clone()));
                    }
                    _ => {
                        profile.failed_urls.insert(url);
                    }
                }
            }

            if profile.is_unmatched() {
                warn!(
                    artist_id = profile.id,
                    name = %profile.name,
                    urls = profile.image_urls.len(),
                    "Artist has no usable portfolio images, excluding from index"
                );
                excluded += 1;
            } else {
                matched.push(profile);
            }
        }

        let new_index = Arc::new(ArtistIndex::new(matched));
        let artists_indexed = new_index.len();

        // Publish: readers see either the old or the new snapshot.
        *self.index.write().expect("index lock poisoned") = Some(new_index);

        let report = IngestReport {
            urls_unique,
            cache_hits: pipeline.cache_hits,
            embedded: pipeline.embedded,
            failed: pipeline.failed,
            artists_indexed,
            artists_excluded: excluded,
            elapsed: started.elapsed(),
        };

        info!(
            artists_indexed,
            excluded,
            urls = urls_unique,
            cache_hits = report.cache_hits,
            embedded = report.embedded,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Index published"
        );

        Ok(report)
    }

    /// Ranks the indexed artists against a brief and returns the top
    /// `top_k`.
    ///
    /// Returns a possibly shorter-than-`top_k` list; an empty list — not
    /// an error — when no artists survived ingestion or the engine was
    /// never initialized.
    ///
    /// # Errors
    ///
    /// - [`ArtMatchError::NotReady`] while the initial load is in flight
    /// - [`ArtMatchError::Encode`] if the brief cannot be encoded
    #[instrument(skip(self, brief_text))]
    pub fn recommend(&self, brief_text: &str, top_k: usize) -> Result<Vec<RecommendationResult>> {
        let started = Instant::now();

        let snapshot = {
            let guard = self.index.read().expect("index lock poisoned");
            guard.clone()
        };

        let Some(index) = snapshot else {
            if self.loading.load(Ordering::SeqCst) {
                return Err(ArtMatchError::NotReady);
            }
            return Ok(Vec::new());
        };

        if index.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.encoder.encode_text(brief_text)?;
        self.encoder.validate_embedding(&query)?;

        let results = index.rank(
            &query,
            top_k,
            self.config.aggregation,
            self.config.top_k_illustrations,
        );

        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        self.metrics.record_recommendation(&scores, started.elapsed());

        Ok(results)
    }

    /// [`recommend`](Recommender::recommend) over a structured brief,
    /// flattened with [`Brief::to_query_text`].
    pub fn recommend_brief(
        &self,
        brief: &Brief,
        top_k: usize,
    ) -> Result<Vec<RecommendationResult>> {
        self.recommend(&brief.to_query_text(), top_k)
    }

    /// Service-level statistics for the façade's stats endpoint.
    pub fn stats(&self) -> ServiceStats {
        let snapshot = self.metrics.snapshot();
        let cache = self.cache.stats();
        let artists_indexed = self
            .index
            .read()
            .expect("index lock poisoned")
            .as_ref()
            .map(|index| index.len())
            .unwrap_or(0);

        ServiceStats {
            artists_indexed,
            cache_hit_rate: cache.hit_rate,
            avg_score: snapshot.avg_score,
            avg_latency_ms: snapshot.avg_latency_ms,
            processing_success_rate: snapshot.processing_success_rate,
            uptime_s: snapshot.uptime_s,
        }
    }

    /// Raw metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The embedding cache backing this engine.
    ///
    /// Exposed for explicit invalidation by the façade.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// The configuration this engine was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Recommender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let artists = self
            .index
            .read()
            .map(|guard| guard.as_ref().map(|i| i.len()).unwrap_or(0))
            .unwrap_or(0);
        f.debug_struct("Recommender")
            .field("model", &self.encoder.model_name())
            .field("aggregation", &self.config.aggregation)
            .field("artists_indexed", &artists)
            .finish_non_exhaustive()
    }
}
