//! Journaled disk cache holding original image bytes.
//!
//! Layout under the cache directory:
//! ```text
//! {cache_dir}/journal.jsonl    record of writes, reads and removals
//! {cache_dir}/{key}.img        committed entry
//! {cache_dir}/{key}.img.tmp    write in progress
//! ```
//!
//! A write streams into the temp file and is published with a rename, so a
//! key always reads as either its previous committed value or the new one.
//! Only one writer per key may be open at a time.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::journal::{self, Journal, JournalRecord, Replay};
use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Default disk budget in bytes (50 MiB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 50 * 1024 * 1024;

const JOURNAL_FILE: &str = "journal.jsonl";
const DATA_SUFFIX: &str = ".img";
const TMP_SUFFIX: &str = ".img.tmp";

/// Redundant journal records tolerated before the journal is compacted.
const COMPACT_THRESHOLD: usize = 2000;

/// Disk-based image cache that persists raw image bytes.
pub struct DiskImageCache {
    inner: Arc<DiskInner>,
}

struct DiskInner {
    cache_dir: PathBuf,
    max_size: u64,
    state: Mutex<DiskState>,
    writers: parking_lot::Mutex<HashSet<CacheKey>>,
}

struct DiskState {
    entries: LruCache<CacheKey, u64>,
    size: u64,
    journal: Journal,
    redundant_ops: usize,
}

impl DiskImageCache {
    /// Opens (or creates) a cache in `cache_dir`, replaying its journal.
    ///
    /// Interrupted writes are discarded. A corrupt journal wipes the cache.
    ///
    /// # Errors
    /// Returns error if the directory or journal cannot be created.
    pub async fn open(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::storage(format!("Failed to create cache dir: {e}")))?;

        let journal_path = cache_dir.join(JOURNAL_FILE);
        let replay = match journal::replay(&journal_path).await {
            Ok(replay) => replay,
            Err(e) => {
                warn!(
                    dir = %cache_dir.display(),
                    error = %e,
                    "Disk cache journal is corrupt, discarding cache contents"
                );
                wipe_cache_files(&cache_dir).await?;
                Replay::empty()
            }
        };

        let Replay {
            mut entries,
            dirty,
            records,
            torn_tail,
        } = replay;

        if !dirty.is_empty() {
            debug!(count = dirty.len(), "Discarding interrupted disk cache writes");
        }
        if torn_tail {
            warn!(dir = %cache_dir.display(), "Disk cache journal ends in a torn record");
        }

        let size = verify_entries(&cache_dir, &mut entries).await;
        sweep_stray_files(&cache_dir, &entries).await?;

        let mut journal = Journal::open(journal_path)
            .await
            .map_err(|e| CacheError::storage(format!("Failed to open journal: {e}")))?;
        if records != entries.len() {
            journal
                .rewrite(&entries)
                .await
                .map_err(|e| CacheError::storage(format!("Failed to rewrite journal: {e}")))?;
        }

        info!(
            dir = %cache_dir.display(),
            entries = entries.len(),
            size = size,
            max_size = max_size,
            "Opened disk cache"
        );

        let inner = Arc::new(DiskInner {
            cache_dir,
            max_size,
            state: Mutex::new(DiskState {
                entries,
                size,
                journal,
                redundant_ops: 0,
            }),
            writers: parking_lot::Mutex::new(HashSet::new()),
        });

        {
            let mut state = inner.state.lock().await;
            inner.trim_to_size(&mut state).await?;
        }

        Ok(Self { inner })
    }

    /// Opens the cache only if the filesystem has more free space than `max_size`.
    ///
    /// Returns `None`, logging why, when space is short or the cache cannot be
    /// opened; callers continue without a disk tier.
    pub async fn open_if_space_available(cache_dir: PathBuf, max_size: u64) -> Option<Self> {
        if let Err(e) = fs::create_dir_all(&cache_dir).await {
            warn!(
                dir = %cache_dir.display(),
                error = %e,
                "Failed to create cache dir, disk cache disabled"
            );
            return None;
        }

        let probe_dir = cache_dir.clone();
        let available =
            match tokio::task::spawn_blocking(move || fs2::available_space(&probe_dir)).await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    warn!(
                        dir = %cache_dir.display(),
                        error = %e,
                        "Failed to query free space, disk cache disabled"
                    );
                    return None;
                }
                Err(e) => {
                    error!(error = %e, "Free space probe panicked");
                    return None;
                }
            };

        if available <= max_size {
            info!(
                dir = %cache_dir.display(),
                available = available,
                required = max_size,
                "Insufficient free space, disk cache disabled"
            );
            return None;
        }

        match Self::open(cache_dir, max_size).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(error = %e, "Failed to open disk cache, continuing memory-only");
                None
            }
        }
    }

    /// Returns the committed bytes for `key`, marking it most recently used.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        {
            let mut state = self.inner.state.lock().await;
            if state.entries.get(key).is_none() {
                trace!(key = %key, "Disk cache miss");
                return None;
            }
            if let Err(e) = self
                .inner
                .append(&mut state, JournalRecord::read(key))
                .await
            {
                warn!(key = %key, error = %e, "Failed to journal disk cache read");
            }
        }

        let path = self.inner.data_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache entry vanished");
                None
            }
        }
    }

    /// Starts a write for `key`.
    ///
    /// Returns `Ok(None)` if another write for the same key is in flight.
    ///
    /// # Errors
    /// Returns error if the journal or temp file cannot be written.
    pub async fn begin_write(&self, key: &CacheKey) -> CacheResult<Option<DiskWriter>> {
        if !self.inner.writers.lock().insert(key.clone()) {
            debug!(key = %key, "Disk cache write already in flight");
            return Ok(None);
        }

        match self.start_write(key).await {
            Ok(writer) => Ok(Some(writer)),
            Err(e) => {
                self.inner.release_writer(key);
                Err(e)
            }
        }
    }

    async fn start_write(&self, key: &CacheKey) -> CacheResult<DiskWriter> {
        {
            let mut state = self.inner.state.lock().await;
            self.inner
                .append(&mut state, JournalRecord::dirty(key))
                .await?;
        }

        let tmp_path = self.inner.tmp_path(key);
        let file = File::create(&tmp_path)
            .await
            .map_err(|e| CacheError::storage(format!("Failed to create cache file: {e}")))?;

        trace!(key = %key, "Started disk cache write");
        Ok(DiskWriter {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            tmp_path,
            file: Some(BufWriter::new(file)),
            written: 0,
            released: false,
        })
    }

    /// Removes an entry. Returns true if it existed.
    ///
    /// # Errors
    /// Returns error if the file or journal cannot be updated.
    pub async fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut state = self.inner.state.lock().await;
        let Some(len) = state.entries.pop(key) else {
            return Ok(false);
        };
        state.size = state.size.saturating_sub(len);
        remove_if_exists(&self.inner.data_path(key)).await?;
        self.inner
            .append(&mut state, JournalRecord::remove(key))
            .await?;
        debug!(key = %key, "Removed entry from disk cache");
        Ok(true)
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if files cannot be removed or the journal rewritten.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut state = self.inner.state.lock().await;
        let keys: Vec<CacheKey> = state.entries.iter().map(|(k, _)| k.clone()).collect();
        for key in &keys {
            remove_if_exists(&self.inner.data_path(key)).await?;
        }
        state.entries.clear();
        state.size = 0;
        state.redundant_ops = 0;
        let DiskState {
            entries, journal, ..
        } = &mut *state;
        journal
            .rewrite(entries)
            .await
            .map_err(|e| CacheError::storage(format!("Failed to rewrite journal: {e}")))?;
        debug!(count = keys.len(), "Cleared disk cache");
        Ok(())
    }

    /// Forces buffered journal records to stable storage.
    ///
    /// # Errors
    /// Returns error if the journal cannot be synced.
    pub async fn flush(&self) -> CacheResult<()> {
        let mut state = self.inner.state.lock().await;
        state
            .journal
            .sync()
            .await
            .map_err(|e| CacheError::storage(format!("Failed to flush journal: {e}")))
    }

    /// Checks if an entry is committed, without touching LRU order.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().await.entries.contains(key)
    }

    /// Returns the committed size in bytes.
    pub async fn size(&self) -> u64 {
        self.inner.state.lock().await.size
    }

    /// Returns the number of committed entries.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.entries.len()
    }

    /// Returns true if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the configured budget in bytes.
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.inner.cache_dir
    }
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.inner.cache_dir)
            .field("max_size", &self.inner.max_size)
            .finish_non_exhaustive()
    }
}

impl DiskInner {
    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{key}{DATA_SUFFIX}"))
    }

    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{key}{TMP_SUFFIX}"))
    }

    fn release_writer(&self, key: &CacheKey) {
        self.writers.lock().remove(key);
    }

    async fn append(&self, state: &mut DiskState, record: JournalRecord) -> CacheResult<()> {
        state
            .journal
            .append(&record)
            .await
            .map_err(|e| CacheError::storage(format!("Failed to append journal: {e}")))?;

        if record.is_redundant() {
            state.redundant_ops += 1;
        }
        if state.redundant_ops >= COMPACT_THRESHOLD && state.redundant_ops >= state.entries.len() {
            let DiskState {
                entries, journal, ..
            } = &mut *state;
            journal
                .rewrite(entries)
                .await
                .map_err(|e| CacheError::storage(format!("Failed to compact journal: {e}")))?;
            state.redundant_ops = 0;
            debug!(entries = state.entries.len(), "Compacted disk cache journal");
        }
        Ok(())
    }

    async fn trim_to_size(&self, state: &mut DiskState) -> CacheResult<()> {
        while state.size > self.max_size {
            let Some((key, len)) = state.entries.pop_lru() else {
                break;
            };
            state.size = state.size.saturating_sub(len);
            remove_if_exists(&self.data_path(&key)).await?;
            self.append(state, JournalRecord::remove(&key)).await?;
            debug!(key = %key, size = len, "Evicted entry from disk cache");
        }
        Ok(())
    }
}

/// Exclusive write handle for one key.
///
/// Finish with [`DiskWriter::commit`] or [`DiskWriter::abort`]. A writer that
/// is dropped unfinished behaves like an abort.
pub struct DiskWriter {
    inner: Arc<DiskInner>,
    key: CacheKey,
    tmp_path: PathBuf,
    file: Option<BufWriter<File>>,
    written: u64,
    released: bool,
}

impl DiskWriter {
    /// Key being written.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Appends `chunk` to the pending value.
    ///
    /// # Errors
    /// Returns error if the temp file cannot be written.
    pub async fn write(&mut self, chunk: &[u8]) -> CacheResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CacheError::storage("Write after writer finished"))?;
        file.write_all(chunk)
            .await
            .map_err(|e| CacheError::storage(format!("Failed to write cache file: {e}")))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Publishes the written bytes, replacing any previous value for the key.
    ///
    /// # Errors
    /// Returns error if the data cannot be synced, renamed or journaled. The
    /// previous value stays visible when the failure precedes the rename.
    pub async fn commit(mut self) -> CacheResult<()> {
        if let Err(e) = self.sync_file().await {
            if let Err(discard_err) = self.discard().await {
                warn!(key = %self.key, error = %discard_err, "Failed to discard disk cache write");
            }
            self.release();
            return Err(e);
        }

        let result = self.publish().await;
        self.release();
        result
    }

    /// Discards the written bytes. The previous value, if any, stays visible.
    ///
    /// # Errors
    /// Returns error if the temp file or journal cannot be updated.
    pub async fn abort(mut self) -> CacheResult<()> {
        self.file.take();
        let result = self.discard().await;
        self.release();
        debug!(key = %self.key, written = self.written, "Aborted disk cache write");
        result
    }

    async fn sync_file(&mut self) -> CacheResult<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| CacheError::storage("Commit after writer finished"))?;
        file.flush()
            .await
            .map_err(|e| CacheError::storage(format!("Failed to flush cache file: {e}")))?;
        file.get_ref()
            .sync_all()
            .await
            .map_err(|e| CacheError::storage(format!("Failed to sync cache file: {e}")))
    }

    async fn publish(&mut self) -> CacheResult<()> {
        let data_path = self.inner.data_path(&self.key);
        let mut state = self.inner.state.lock().await;

        if let Err(e) = fs::rename(&self.tmp_path, &data_path).await {
            drop(state);
            if let Err(discard_err) = self.discard().await {
                warn!(key = %self.key, error = %discard_err, "Failed to discard disk cache write");
            }
            return Err(CacheError::storage(format!(
                "Failed to publish cache file: {e}"
            )));
        }

        let len = self.written;
        if let Some(previous) = state.entries.put(self.key.clone(), len) {
            state.size = state.size.saturating_sub(previous);
        }
        state.size += len;
        self.inner
            .append(&mut state, JournalRecord::clean(&self.key, len))
            .await?;
        debug!(key = %self.key, size = len, "Committed disk cache entry");

        self.inner.trim_to_size(&mut state).await
    }

    async fn discard(&mut self) -> CacheResult<()> {
        remove_if_exists(&self.tmp_path).await?;
        let mut state = self.inner.state.lock().await;
        let record = match state.entries.peek(&self.key) {
            Some(len) => JournalRecord::clean(&self.key, *len),
            None => JournalRecord::remove(&self.key),
        };
        self.inner.append(&mut state, record).await
    }

    fn release(&mut self) {
        self.released = true;
        self.inner.release_writer(&self.key);
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.file.take();
        // Unlink before releasing the key; the next writer reuses this path.
        match std::fs::remove_file(&self.tmp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                error!(
                    path = %self.tmp_path.display(),
                    error = %e,
                    "Failed to remove abandoned temp file"
                );
            }
            _ => {}
        }
        self.inner.release_writer(&self.key);
        warn!(key = %self.key, "Disk cache write dropped without commit or abort");
    }
}

impl std::fmt::Debug for DiskWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskWriter")
            .field("key", &self.key)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Drops entries whose data file is missing and returns the total size of the rest.
async fn verify_entries(cache_dir: &Path, entries: &mut LruCache<CacheKey, u64>) -> u64 {
    let keys: Vec<CacheKey> = entries.iter().map(|(k, _)| k.clone()).collect();
    let mut total = 0u64;
    for key in keys {
        let path = cache_dir.join(format!("{key}{DATA_SUFFIX}"));
        match fs::metadata(&path).await {
            Ok(meta) => {
                if let Some(len) = entries.peek_mut(&key) {
                    *len = meta.len();
                }
                total += meta.len();
            }
            Err(_) => {
                debug!(key = %key, "Journaled entry has no data file, dropping");
                entries.pop(&key);
            }
        }
    }
    total
}

/// Removes temp files and data files the journal does not know about.
async fn sweep_stray_files(cache_dir: &Path, entries: &LruCache<CacheKey, u64>) -> CacheResult<()> {
    let mut dir = fs::read_dir(cache_dir)
        .await
        .map_err(|e| CacheError::storage(format!("Failed to read cache dir: {e}")))?;

    while let Ok(Some(entry)) = dir.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let stray = if name.ends_with(TMP_SUFFIX) {
            true
        } else if let Some(stem) = name.strip_suffix(DATA_SUFFIX) {
            CacheKey::parse(stem).is_none_or(|key| !entries.contains(&key))
        } else {
            false
        };
        if stray {
            let path = entry.path();
            if let Err(e) = remove_if_exists(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove stray cache file");
            } else {
                trace!(path = %path.display(), "Removed stray cache file");
            }
        }
    }
    Ok(())
}

/// Removes the journal and every data or temp file in `cache_dir`.
async fn wipe_cache_files(cache_dir: &Path) -> CacheResult<()> {
    let mut dir = fs::read_dir(cache_dir)
        .await
        .map_err(|e| CacheError::storage(format!("Failed to read cache dir: {e}")))?;

    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| CacheError::storage(format!("Failed to read entry: {e}")))?
    {
        let name = entry.file_name();
        let owned = name.to_str().is_some_and(|n| {
            n.starts_with(JOURNAL_FILE) || n.ends_with(DATA_SUFFIX) || n.ends_with(TMP_SUFFIX)
        });
        if owned {
            remove_if_exists(&entry.path()).await?;
        }
    }
    Ok(())
}
