//! Ingestion pipeline: fetch → encode → persist.
//!
//! Three stages connected by producer–consumer queues with explicit
//! capacity, giving natural backpressure without async primitives:
//!
//! ```text
//! URL queue ──> fetch workers (W threads) ──> bounded channel
//!                                               │
//!                          single encoder task <┘
//!                          (batch, encode, persist to cache)
//! ```
//!
//! The encoder task runs on the calling thread: the model is the
//! expensive resource and is not safe to assume concurrent, so every
//! encode call funnels through it. Vectors are persisted to the cache
//! before results are handed back, so a crash mid-ingestion never loses
//! completed work.
//!
//! Per-URL failures are recorded, not propagated — ingestion always runs
//! to completion (or cancellation) regardless of how many URLs fail.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::embedding::{resize_to_limit, ImageEncoder};
use crate::fetcher::ImageFetcher;
use crate::types::Embedding;

/// Cooperative cancellation signal for ingestion.
///
/// On cancel, fetch workers stop after their current URL, queued URLs
/// are dropped, and already-persisted cache entries remain valid.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Summary of one ingestion run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    /// Unique URLs across all artists.
    pub urls_unique: usize,

    /// URLs served from the embedding cache (no network).
    pub cache_hits: usize,

    /// URLs freshly fetched and encoded.
    pub embedded: usize,

    /// URLs that failed download, validation, or encoding.
    pub failed: usize,

    /// Artists published to the queryable index.
    pub artists_indexed: usize,

    /// Artists excluded because no portfolio image survived.
    pub artists_excluded: usize,

    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Per-URL results of the pipeline stage.
pub(crate) struct PipelineOutcome {
    /// URL → embedding, or `None` if the URL failed.
    pub outcomes: HashMap<String, Option<Embedding>>,
    pub cache_hits: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Runs the fetch → encode → persist pipeline over a set of unique URLs.
///
/// Cache hits are resolved first without touching the network; only
/// misses enter the worker pool. Returns partial results if `cancel`
/// fires mid-run.
pub(crate) fn process_urls(
    fetcher: &ImageFetcher,
    encoder: &dyn ImageEncoder,
    cache: &EmbeddingCache,
    config: &Config,
    unique_urls: Vec<String>,
    cancel: &CancelToken,
) -> PipelineOutcome {
    let mut outcomes: HashMap<String, Option<Embedding>> = HashMap::new();
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for url in unique_urls {
        if !seen.insert(url.clone()) {
            continue;
        }
        match cache.get(&url) {
            Some(embedding) => {
                outcomes.insert(url, Some(embedding));
            }
            None => pending.push_back(url),
        }
    }

    let cache_hits = outcomes.len();
    let mut embedded = 0usize;
    let mut failed = 0usize;

    if pending.is_empty() || cancel.is_cancelled() {
        return PipelineOutcome {
            outcomes,
            cache_hits,
            embedded,
            failed,
        };
    }

    let worker_count = config.image_download_workers.min(pending.len());
    let batch_size = config.image_batch_size;

    info!(
        pending = pending.len(),
        cache_hits,
        workers = worker_count,
        batch_size,
        "Starting image ingestion"
    );

    let queue = Mutex::new(pending);

    thread::scope(|scope| {
        // Bounded: fetch workers block once the encoder falls behind.
        let (tx, rx) = mpsc::sync_channel::<(String, Option<RgbImage>)>(batch_size * 2);

        for _ in 0..worker_count {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let url = {
                    let mut queue = queue.lock().expect("ingest queue lock poisoned");
                    queue.pop_front()
                };
                let Some(url) = url else { break };

                let fetched = match fetcher.fetch(&url) {
                    Ok(image) => Some(image),
                    Err(e) => {
                        warn!(
                            url = %e.url,
                            kind = e.kind.label(),
                            elapsed_ms = e.elapsed.as_millis() as u64,
                            "Image failed, skipping"
                        );
                        None
                    }
                };
                if tx.send((url, fetched)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        // Single encoder task: batch, encode, persist.
        let mut batch_urls: Vec<String> = Vec::with_capacity(batch_size);
        let mut batch_images: Vec<RgbImage> = Vec::with_capacity(batch_size);

        while let Ok((url, fetched)) = rx.recv() {
            if cancel.is_cancelled() {
                break;
            }
            match fetched {
                Some(image) => {
                    batch_urls.push(url);
                    batch_images.push(resize_to_limit(image, config.max_image_size));
                    if batch_urls.len() == batch_size {
                        encode_batch(
                            encoder,
                            cache,
                            &mut batch_urls,
                            &mut batch_images,
                            &mut outcomes,
                            &mut embedded,
                            &mut failed,
                        );
                    }
                }
                None => {
                    outcomes.insert(url, None);
                    failed += 1;
                }
            }
        }

        // Flush the partially-filled final batch.
        if !batch_urls.is_empty() && !cancel.is_cancelled() {
            encode_batch(
                encoder,
                cache,
                &mut batch_urls,
                &mut batch_images,
                &mut outcomes,
                &mut embedded,
                &mut failed,
            );
        }

        // Unblocks any worker still waiting on a full channel after a
        // cancellation.
        drop(rx);
    });

    info!(
        cache_hits,
        embedded, failed, "Image ingestion finished"
    );

    PipelineOutcome {
        outcomes,
        cache_hits,
        embedded,
        failed,
    }
}

/// Encodes one batch and persists each vector before reporting it.
///
/// An encoder failure marks every URL of the batch as failed; the
/// pipeline continues with the next batch. A cache write failure
/// degrades that URL to memory-only.
fn encode_batch(
    encoder: &dyn ImageEncoder,
    cache: &EmbeddingCache,
    batch_urls: &mut Vec<String>,
    batch_images: &mut Vec<RgbImage>,
    outcomes: &mut HashMap<String, Option<Embedding>>,
    embedded: &mut usize,
    failed: &mut usize,
) {
    debug!(batch = batch_urls.len(), "Encoding image batch");

    let images = std::mem::take(batch_images);
    let urls = std::mem::take(batch_urls);

    match encoder.encode_images(&images) {
        Ok(vectors) if vectors.len() == urls.len() => {
            for (url, vector) in urls.into_iter().zip(vectors) {
                if let Err(e) = cache.set(&url, &vector) {
                    warn!(
                        url = %url,
                        error = %e,
                        "Cache write failed, keeping embedding in memory only"
                    );
                }
                outcomes.insert(url, Some(vector));
                *embedded += 1;
            }
        }
        Ok(vectors) => {
            warn!(
                expected = urls.len(),
                got = vectors.len(),
                "Encoder returned a mismatched batch, marking batch failed"
            );
            *failed += urls.len();
            for url in urls {
                outcomes.insert(url, None);
            }
        }
        Err(e) => {
            warn!(
                batch = urls.len(),
                error = %e,
                "Batch encoding failed, marking batch failed"
            );
            *failed += urls.len();
            for url in urls {
                outcomes.insert(url, None);
            }
        }
    }
}
