//! Persistent embedding cache.
//!
//! A durable URL → embedding map with a disk layout of one
//! `metadata.json` index plus one 2048-byte vector file per entry (see
//! [`metadata`]). The cache guarantees:
//!
//! - **Atomic writes**: vector files and the metadata index are written
//!   via tmp-file + fsync + rename, never edited in place. A crash can
//!   leave an orphan vector file but never a metadata entry without its
//!   file after the next startup.
//! - **Startup recovery**: entries whose vector file is missing or has
//!   the wrong length are dropped (and logged); vector files not
//!   referenced by metadata are deleted; leftover `*.tmp` files are
//!   removed; an unreadable index is rebuilt empty.
//! - **Model binding**: the index records the encoder model name. If the
//!   configured model differs, the cache loads cold — existing entries
//!   are shadowed, not deleted, so reverting the model before any new
//!   writes keeps them usable.
//! - **Single-process access**: a lock file is taken at startup; a
//!   second process opening the same directory fails with
//!   [`CacheError::Locked`].
//!
//! Reads go against the in-memory index and a memoized vector map, so a
//! repeat `get` never touches disk. A single writer lock serializes
//! `set`/`invalidate` and metadata persistence. Multi-process access is
//! not supported.

pub mod metadata;

pub use metadata::{CacheEntry, CacheMetadata};

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::CacheError;
use crate::types::{Embedding, EMBEDDING_FILE_BYTES};

use metadata::{url_hash, vector_file_name, METADATA_FILENAME, METADATA_VERSION};

/// Name of the single-process lock file inside the cache directory.
const LOCK_FILENAME: &str = ".lock";

/// Cache counters and sizes as reported by [`EmbeddingCache::stats`].
#[derive(Clone, Debug, PartialEq)]
pub struct CacheStats {
    /// Number of live entries under the configured model.
    pub entries: usize,

    /// Total bytes of the live vector files on disk.
    pub disk_size_bytes: u64,

    /// Lookups that were served from the cache.
    pub hits: u64,

    /// Lookups that found nothing (or a corrupt entry).
    pub misses: u64,

    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub hit_rate: f64,
}

/// Durable URL → embedding map. See the module docs for the layout and
/// integrity rules.
pub struct EmbeddingCache {
    cache_dir: PathBuf,
    model_name: String,

    /// hash → entry index for the configured model.
    index: RwLock<HashMap<String, CacheEntry>>,

    /// hash → vector, populated on set and memoized on first read.
    vectors: Mutex<HashMap<String, Embedding>>,

    /// Serializes mutations and metadata persistence.
    writer: Mutex<()>,

    hits: AtomicU64,
    misses: AtomicU64,

    lock_path: PathBuf,
}

impl EmbeddingCache {
    /// Opens (or creates) the cache at `cache_dir` for the given encoder
    /// model, running startup recovery.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Locked` if another process holds the
    /// directory, or `CacheError::Io` if the directory is unusable.
    pub fn open(cache_dir: impl AsRef<Path>, model_name: &str) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.as_ref().to_path_buf();

        fs::create_dir_all(&cache_dir).map_err(|e| {
            CacheError::io(format!(
                "Failed to create cache directory {}: {e}",
                cache_dir.display()
            ))
        })?;

        let lock_path = take_dir_lock(&cache_dir)?;

        let cache = Self {
            cache_dir,
            model_name: model_name.to_string(),
            index: RwLock::new(HashMap::new()),
            vectors: Mutex::new(HashMap::new()),
            writer: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            lock_path,
        };

        cache.recover()?;
        Ok(cache)
    }

    /// Startup recovery: load the index, validate entries against their
    /// files, and prune whatever fails on either side.
    fn recover(&self) -> Result<(), CacheError> {
        remove_stale_tmp_files(&self.cache_dir);

        let metadata_path = self.cache_dir.join(METADATA_FILENAME);
        let loaded = match fs::read(&metadata_path) {
            Ok(bytes) => match serde_json::from_slice::<CacheMetadata>(&bytes) {
                Ok(metadata) if metadata.version == METADATA_VERSION => Some(metadata),
                Ok(metadata) => {
                    error!(
                        version = %metadata.version,
                        expected = METADATA_VERSION,
                        "Unsupported cache metadata version, rebuilding empty"
                    );
                    None
                }
                Err(e) => {
                    error!(error = %e, "Unreadable cache metadata, rebuilding empty");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(dir = %self.cache_dir.display(), "No existing cache metadata, starting cold");
                None
            }
            Err(e) => {
                error!(error = %e, "Failed to read cache metadata, rebuilding empty");
                None
            }
        };

        let Some(loaded) = loaded else {
            // Nothing referenced: every vector file is an orphan.
            self.prune_orphan_files(&HashMap::new());
            return Ok(());
        };

        if loaded.model_name != self.model_name {
            // Shadow, don't delete: a revert to the previous model keeps
            // the entries usable as long as nothing new is written.
            warn!(
                cached_model = %loaded.model_name,
                configured_model = %self.model_name,
                shadowed_entries = loaded.embeddings.len(),
                "Cache was built with a different model; treating as cold"
            );
            return Ok(());
        }

        let mut valid: HashMap<String, CacheEntry> = HashMap::new();
        let mut dropped = 0usize;

        for (hash, entry) in loaded.embeddings {
            let path = self.cache_dir.join(&entry.file_path);
            match fs::metadata(&path) {
                Ok(meta) if meta.len() == EMBEDDING_FILE_BYTES as u64 => {
                    valid.insert(hash, entry);
                }
                Ok(meta) => {
                    error!(
                        url = %entry.url,
                        file = %path.display(),
                        bytes = meta.len(),
                        expected = EMBEDDING_FILE_BYTES,
                        "Dropping cache entry with corrupt vector file"
                    );
                    let _ = fs::remove_file(&path);
                    dropped += 1;
                }
                Err(_) => {
                    error!(
                        url = %entry.url,
                        file = %path.display(),
                        "Dropping cache entry with missing vector file"
                    );
                    dropped += 1;
                }
            }
        }

        self.prune_orphan_files(&valid);

        info!(
            entries = valid.len(),
            dropped,
            model = %self.model_name,
            "Embedding cache loaded"
        );

        let needs_flush = dropped > 0;
        *self.index.write().expect("cache index lock poisoned") = valid;

        if needs_flush {
            let _writer = self.writer.lock().expect("cache writer lock poisoned");
            self.persist_metadata_locked()?;
        }

        Ok(())
    }

    /// Deletes `*.vec` files that no live entry references.
    fn prune_orphan_files(&self, valid: &HashMap<String, CacheEntry>) {
        let Ok(dir) = fs::read_dir(&self.cache_dir) else {
            return;
        };

        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(metadata::VECTOR_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !valid.contains_key(stem) {
                debug!(file = %path.display(), "Deleting orphan vector file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(file = %path.display(), error = %e, "Failed to delete orphan vector file");
                }
            }
        }
    }

    /// Looks up the embedding cached for a URL.
    ///
    /// Returns `None` on a miss. A present entry whose vector file turns
    /// out to be unreadable is invalidated and reported as a miss.
    pub fn get(&self, url: &str) -> Option<Embedding> {
        let hash = url_hash(url);

        let entry = {
            let index = self.index.read().expect("cache index lock poisoned");
            match index.get(&hash) {
                Some(entry) => entry.clone(),
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(url, "Cache miss");
                    return None;
                }
            }
        };

        if let Some(vector) = self
            .vectors
            .lock()
            .expect("cache vectors lock poisoned")
            .get(&hash)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(url, "Cache hit (memory)");
            return Some(vector.clone());
        }

        let path = self.cache_dir.join(&entry.file_path);
        match fs::read(&path).ok().and_then(|bytes| decode_vector(&bytes)) {
            Some(vector) => {
                self.vectors
                    .lock()
                    .expect("cache vectors lock poisoned")
                    .insert(hash, vector.clone());
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(url, "Cache hit (disk)");
                Some(vector)
            }
            None => {
                error!(url, file = %path.display(), "Cached vector unreadable, invalidating entry");
                self.invalidate(url);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Persists an embedding for a URL. Idempotent; last writer wins.
    ///
    /// The vector file lands on disk (tmp + fsync + rename) before the
    /// index and metadata are updated, so a crash in between leaves at
    /// worst an orphan file for the next startup to prune.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` on I/O failure. The caller may keep using
    /// the embedding it holds; the cache only degrades for this URL.
    pub fn set(&self, url: &str, embedding: &Embedding) -> Result<(), CacheError> {
        if embedding.len() * 4 != EMBEDDING_FILE_BYTES {
            return Err(CacheError::corrupted(format!(
                "embedding has {} components, expected {}",
                embedding.len(),
                EMBEDDING_FILE_BYTES / 4
            )));
        }

        let hash = url_hash(url);
        let _writer = self.writer.lock().expect("cache writer lock poisoned");

        // The digest is the authoritative identity. Two URLs colliding on
        // it is not expected to happen; if it does, last writer wins.
        if let Some(existing) = self.index.read().expect("cache index lock poisoned").get(&hash) {
            if existing.url != url {
                error!(
                    hash,
                    existing_url = %existing.url,
                    new_url = %url,
                    "URL hash collision detected; replacing existing entry"
                );
            }
        }

        let file_name = vector_file_name(&hash);
        let final_path = self.cache_dir.join(&file_name);
        write_atomic(&final_path, &encode_vector(embedding))?;

        let entry = CacheEntry {
            url: url.to_string(),
            created_at: Utc::now(),
            file_path: file_name,
        };

        self.index
            .write()
            .expect("cache index lock poisoned")
            .insert(hash.clone(), entry);
        self.vectors
            .lock()
            .expect("cache vectors lock poisoned")
            .insert(hash, embedding.clone());

        self.persist_metadata_locked()?;
        debug!(url, "Cache set");
        Ok(())
    }

    /// Removes the entry for a URL, deleting both the vector file and
    /// the index entry. Safe to call for absent URLs.
    ///
    /// Returns true if an entry existed.
    pub fn invalidate(&self, url: &str) -> bool {
        let hash = url_hash(url);
        let _writer = self.writer.lock().expect("cache writer lock poisoned");

        let removed = self
            .index
            .write()
            .expect("cache index lock poisoned")
            .remove(&hash);
        self.vectors
            .lock()
            .expect("cache vectors lock poisoned")
            .remove(&hash);

        let Some(entry) = removed else {
            return false;
        };

        let path = self.cache_dir.join(&entry.file_path);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %path.display(), error = %e, "Failed to delete vector file");
            }
        }

        if let Err(e) = self.persist_metadata_locked() {
            warn!(url, error = %e, "Failed to persist metadata after invalidation");
        }

        info!(url, "Cache entry invalidated");
        true
    }

    /// Removes every entry. Returns the number of entries removed.
    pub fn invalidate_all(&self) -> usize {
        let _writer = self.writer.lock().expect("cache writer lock poisoned");

        let drained: Vec<CacheEntry> = {
            let mut index = self.index.write().expect("cache index lock poisoned");
            index.drain().map(|(_, entry)| entry).collect()
        };
        self.vectors
            .lock()
            .expect("cache vectors lock poisoned")
            .clear();

        for entry in &drained {
            let path = self.cache_dir.join(&entry.file_path);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %path.display(), error = %e, "Failed to delete vector file");
                }
            }
        }

        if let Err(e) = self.persist_metadata_locked() {
            warn!(error = %e, "Failed to persist metadata after clearing cache");
        }

        info!(removed = drained.len(), "Cache cleared");
        drained.len()
    }

    /// Current counters and sizes.
    pub fn stats(&self) -> CacheStats {
        let index = self.index.read().expect("cache index lock poisoned");
        let disk_size_bytes = index
            .values()
            .filter_map(|entry| fs::metadata(self.cache_dir.join(&entry.file_path)).ok())
            .map(|meta| meta.len())
            .sum();

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            entries: index.len(),
            disk_size_bytes,
            hits,
            misses,
            hit_rate,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.read().expect("cache index lock poisoned").len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Directory this cache owns.
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Writes the metadata index atomically. Caller must hold `writer`.
    fn persist_metadata_locked(&self) -> Result<(), CacheError> {
        let mut metadata = CacheMetadata::new(&self.model_name);
        {
            let index = self.index.read().expect("cache index lock poisoned");
            for (hash, entry) in index.iter() {
                metadata.embeddings.insert(hash.clone(), entry.clone());
            }
        }

        let bytes = serde_json::to_vec_pretty(&metadata)?;
        write_atomic(&self.cache_dir.join(METADATA_FILENAME), &bytes)
    }
}

impl Drop for EmbeddingCache {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("dir", &self.cache_dir)
            .field("model_name", &self.model_name)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Creates the lock file, failing if another process already holds it.
fn take_dir_lock(cache_dir: &Path) -> Result<PathBuf, CacheError> {
    let lock_path = cache_dir.join(LOCK_FILENAME);

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(CacheError::Locked(lock_path));
        }
        Err(e) => {
            return Err(CacheError::io(format!(
                "Failed to create lock file {}: {e}",
                lock_path.display()
            )));
        }
    };

    let _ = writeln!(file, "{}", std::process::id());
    Ok(lock_path)
}

/// Deletes `*.tmp` leftovers from a writer that crashed mid-rename.
fn remove_stale_tmp_files(cache_dir: &Path) {
    let Ok(dir) = fs::read_dir(cache_dir) else {
        return;
    };
    for entry in dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
            debug!(file = %path.display(), "Removing stale temp file");
            let _ = fs::remove_file(&path);
        }
    }
}

/// tmp-file + fsync + rename. Never edits `path` in place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp_path = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });

    let mut file = File::create(&tmp_path).map_err(|e| {
        CacheError::io(format!("Failed to create {}: {e}", tmp_path.display()))
    })?;
    file.write_all(bytes)
        .map_err(|e| CacheError::io(format!("Failed to write {}: {e}", tmp_path.display())))?;
    file.sync_all()
        .map_err(|e| CacheError::io(format!("Failed to sync {}: {e}", tmp_path.display())))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| {
        CacheError::io(format!(
            "Failed to rename {} to {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

/// 512 × f32 little-endian.
fn encode_vector(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(EMBEDDING_FILE_BYTES);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Inverse of [`encode_vector`]; `None` unless exactly 2048 bytes.
fn decode_vector(bytes: &[u8]) -> Option<Embedding> {
    if bytes.len() != EMBEDDING_FILE_BYTES {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
