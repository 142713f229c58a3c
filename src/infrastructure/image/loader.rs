//! Image loading through the memory, disk and network tiers.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use super::decoder::ImageCrateDecoder;
use super::disk_cache::{DiskImageCache, DiskWriter};
use super::fetcher::HttpFetcher;
use super::memory_cache::{CacheStats, MemoryImageCache};
use super::worker_pool::{PoolStats, WorkerPool};
use crate::application::services::downsampler::decode_bounded;
use crate::domain::entities::{Bitmap, CacheKey, ImageSource, LoadResult, LoadedImage};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{BitmapDecoder, DisplayTarget, ImageFetcher};
use crate::infrastructure::config::ImageLoaderConfig;
use crate::presentation::dispatcher::ResultSender;

/// Loads images by URL, checking memory, then disk, then the network.
///
/// Cloning is cheap; clones share caches and the worker pool.
#[derive(Clone)]
pub struct ImageLoader {
    core: Arc<LoaderCore>,
    pool: WorkerPool,
    runtime: Handle,
}

struct LoaderCore {
    memory_cache: MemoryImageCache,
    disk_cache: Option<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcher>,
    decoder: Arc<dyn BitmapDecoder>,
    results: ResultSender,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("memory_cache", &self.core.memory_cache.stats())
            .field("disk_cache", &self.core.disk_cache)
            .field("pool", &self.pool.stats())
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader with the HTTP fetcher and `image` crate decoder.
    ///
    /// Finished background loads are sent through `results`. The disk tier
    /// is skipped if it is disabled or there is too little free space.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub async fn build(config: &ImageLoaderConfig, results: ResultSender) -> CacheResult<Self> {
        let fetcher = HttpFetcher::new(config.timeout(), &config.user_agent)?;
        Self::with_parts(
            config,
            results,
            Arc::new(fetcher),
            Arc::new(ImageCrateDecoder::default()),
        )
        .await
    }

    /// Creates a loader from explicit fetcher and decoder implementations.
    ///
    /// # Errors
    /// Returns error if the worker pool cannot be started.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub async fn with_parts(
        config: &ImageLoaderConfig,
        results: ResultSender,
        fetcher: Arc<dyn ImageFetcher>,
        decoder: Arc<dyn BitmapDecoder>,
    ) -> CacheResult<Self> {
        let disk_cache = if config.disk_cache_enabled {
            DiskImageCache::open_if_space_available(
                config.effective_cache_dir(),
                config.disk_cache_size,
            )
            .await
        } else {
            info!("Disk cache disabled by configuration");
            None
        };

        let pool = WorkerPool::new(config.effective_worker_threads())?;
        info!(
            memory_kib = config.memory_cache_kib,
            disk_enabled = disk_cache.is_some(),
            workers = pool.size(),
            "Image loader ready"
        );

        Ok(Self {
            core: Arc::new(LoaderCore {
                memory_cache: MemoryImageCache::new(config.memory_cache_kib),
                disk_cache,
                fetcher,
                decoder,
                results,
            }),
            pool,
            runtime: Handle::current(),
        })
    }

    /// Loads `url`, downsampled so it still covers `width` x `height`.
    ///
    /// A zero dimension disables downsampling.
    ///
    /// # Errors
    /// Returns error if the image cannot be fetched, stored or decoded.
    pub async fn load(&self, url: &str, width: u32, height: u32) -> CacheResult<Bitmap> {
        self.core
            .load(url, width, height)
            .await
            .map(|loaded| loaded.image)
    }

    /// Like [`ImageLoader::load`], also reporting which tier answered.
    ///
    /// # Errors
    /// Returns error if the image cannot be fetched, stored or decoded.
    pub async fn load_with_source(
        &self,
        url: &str,
        width: u32,
        height: u32,
    ) -> CacheResult<LoadedImage> {
        self.core.load(url, width, height).await
    }

    /// Blocking form of [`ImageLoader::load`] for plain threads.
    ///
    /// # Errors
    /// Returns `CacheError::Configuration` when called on the delivery thread
    /// or from inside the async runtime, otherwise the same errors as `load`.
    pub fn load_blocking(&self, url: &str, width: u32, height: u32) -> CacheResult<Bitmap> {
        if self.core.results.is_delivery_thread() {
            error!(url = %url, "Blocking image load attempted on the delivery thread");
            return Err(CacheError::configuration(
                "load_blocking must not be called on the delivery thread",
            ));
        }
        if Handle::try_current().is_ok() {
            return Err(CacheError::configuration(
                "load_blocking must not be called from inside the async runtime",
            ));
        }
        self.runtime.block_on(self.load(url, width, height))
    }

    /// Assigns `url` to `target` and fills it asynchronously.
    ///
    /// A memory hit is applied immediately on the calling thread. Otherwise
    /// the load runs on the worker pool, bounded by the target's current
    /// size, and the result goes to the dispatcher, which drops it if the
    /// target has been reassigned in the meantime.
    ///
    /// # Errors
    /// Returns error if the worker pool has shut down.
    pub fn bind_async(&self, url: &str, target: Arc<dyn DisplayTarget>) -> CacheResult<()> {
        target.set_tag(url);

        let key = CacheKey::from_url(url);
        if let Some(image) = self.core.memory_cache.get(&key) {
            target.set_image(image);
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let url = url.to_string();
        self.pool.submit(async move {
            let (width, height) = (target.width(), target.height());
            match core.load(&url, width, height).await {
                Ok(loaded) => core.results.send(LoadResult {
                    url,
                    bitmap: loaded.image,
                    target,
                }),
                Err(e) if e.is_fatal() => {
                    error!(url = %url, error = %e, "Background image load misconfigured");
                }
                Err(e) => warn!(url = %url, error = %e, "Background image load failed"),
            }
        })
    }

    /// Returns true if the disk tier is active.
    #[must_use]
    pub fn is_disk_cache_enabled(&self) -> bool {
        self.core.disk_cache.is_some()
    }

    /// The disk tier, if active.
    #[must_use]
    pub fn disk_cache(&self) -> Option<&DiskImageCache> {
        self.core.disk_cache.as_ref()
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.core.memory_cache.stats()
    }

    /// Returns worker pool occupancy.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Clears both cache tiers.
    ///
    /// # Errors
    /// Returns error if the disk tier cannot be cleared.
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.core.memory_cache.clear();
        if let Some(disk) = &self.core.disk_cache {
            disk.clear().await?;
        }
        info!("Cleared all image caches");
        Ok(())
    }
}

impl LoaderCore {
    async fn load(&self, url: &str, width: u32, height: u32) -> CacheResult<LoadedImage> {
        let key = CacheKey::from_url(url);

        if let Some(image) = self.memory_cache.get(&key) {
            return Ok(LoadedImage::new(key, image, ImageSource::MemoryCache));
        }

        if self.results.is_delivery_thread() {
            error!(url = %url, "Image I/O attempted on the delivery thread");
            return Err(CacheError::configuration(
                "image I/O must not run on the delivery thread",
            ));
        }

        let Some(disk) = &self.disk_cache else {
            let bytes = self.download(url).await?;
            let image = self.decode(bytes, width, height).await?;
            debug!(url = %url, "Loaded image without disk tier");
            return Ok(LoadedImage::new(key, image, ImageSource::Network));
        };

        if let Some(image) = self.load_from_disk(disk, &key, width, height).await? {
            return Ok(LoadedImage::new(key, image, ImageSource::DiskCache));
        }

        self.populate_disk(disk, &key, url).await?;

        match self.load_from_disk(disk, &key, width, height).await? {
            Some(image) => Ok(LoadedImage::new(key, image, ImageSource::Network)),
            None => Err(CacheError::not_found(url)),
        }
    }

    async fn load_from_disk(
        &self,
        disk: &DiskImageCache,
        key: &CacheKey,
        width: u32,
        height: u32,
    ) -> CacheResult<Option<Bitmap>> {
        let Some(bytes) = disk.get(key).await else {
            return Ok(None);
        };

        match self.decode(bytes, width, height).await {
            Ok(image) => {
                self.memory_cache.put_if_absent(key.clone(), Arc::clone(&image));
                Ok(Some(image))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached image is undecodable, removing");
                if let Err(remove_err) = disk.remove(key).await {
                    warn!(key = %key, error = %remove_err, "Failed to remove undecodable entry");
                }
                Err(e)
            }
        }
    }

    /// Streams `url` into the disk tier. Returns without writing if another
    /// task already holds the key's writer.
    async fn populate_disk(
        &self,
        disk: &DiskImageCache,
        key: &CacheKey,
        url: &str,
    ) -> CacheResult<()> {
        let Some(mut writer) = disk.begin_write(key).await? else {
            debug!(url = %url, "Download already in flight, re-checking disk");
            return Ok(());
        };

        if let Err(e) = self.stream_into(&mut writer, url).await {
            if let Err(abort_err) = writer.abort().await {
                warn!(key = %key, error = %abort_err, "Failed to abort disk write");
            }
            return Err(e);
        }
        writer.commit().await?;

        if let Err(e) = disk.flush().await {
            warn!(error = %e, "Failed to flush disk cache journal");
        }
        Ok(())
    }

    async fn stream_into(&self, writer: &mut DiskWriter, url: &str) -> CacheResult<()> {
        let mut stream = self.fetcher.fetch(url).await?;
        while let Some(chunk) = stream.next().await {
            writer.write(&chunk?).await?;
        }
        trace!(url = %url, bytes = writer.written(), "Downloaded image into disk cache");
        Ok(())
    }

    async fn download(&self, url: &str) -> CacheResult<Vec<u8>> {
        let mut stream = self.fetcher.fetch(url).await?;
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        trace!(url = %url, bytes = body.len(), "Downloaded image");
        Ok(body)
    }

    async fn decode(&self, bytes: Vec<u8>, width: u32, height: u32) -> CacheResult<Bitmap> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decode_bounded(decoder.as_ref(), &bytes, width, height))
            .await
            .map_err(|e| CacheError::decode(format!("Decode task failed: {e}")))?
            .map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::domain::ports::mocks::{MockFetcher, MockResponse, RecordingTarget};
    use crate::presentation::dispatcher::{self, ResultDispatcher};

    const URL: &str = "https://images.example.com/photo.png";

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(width, height)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn config(dir: &TempDir, disk_cache_size: u64) -> ImageLoaderConfig {
        ImageLoaderConfig {
            cache_dir: Some(dir.path().join("bitmap")),
            disk_cache_size,
            worker_threads: Some(2),
            ..ImageLoaderConfig::default()
        }
    }

    async fn loader_with(
        dir: &TempDir,
        disk_cache_size: u64,
        fetcher: &Arc<MockFetcher>,
    ) -> (ImageLoader, ResultDispatcher) {
        let (results, dispatcher) = dispatcher::channel();
        let loader = ImageLoader::with_parts(
            &config(dir, disk_cache_size),
            results,
            Arc::clone(fetcher) as Arc<dyn ImageFetcher>,
            Arc::new(ImageCrateDecoder::default()),
        )
        .await
        .unwrap();
        (loader, dispatcher)
    }

    #[tokio::test]
    async fn test_network_then_memory() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(png(40, 20)));
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;
        assert!(loader.is_disk_cache_enabled());

        let first = loader.load_with_source(URL, 0, 0).await.unwrap();
        assert_eq!(first.source, ImageSource::Network);
        assert_eq!((first.image.width(), first.image.height()), (40, 20));

        let second = loader.load_with_source(URL, 0, 0).await.unwrap();
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_disk_hit_decodes_without_fetch() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let disk = loader.disk_cache().unwrap();
        let key = CacheKey::from_url(URL);
        let mut writer = disk.begin_write(&key).await.unwrap().unwrap();
        writer.write(&png(400, 200)).await.unwrap();
        writer.commit().await.unwrap();

        let loaded = loader.load_with_source(URL, 100, 50).await.unwrap();
        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!((loaded.image.width(), loaded.image.height()), (200, 100));
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(loader.memory_cache_stats().size, 1);
    }

    #[tokio::test]
    async fn test_disabled_disk_tier_fetches_once_per_load() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(png(16, 16)));
        let (loader, _dispatcher) = loader_with(&temp, u64::MAX, &fetcher).await;
        assert!(!loader.is_disk_cache_enabled());

        let image = loader.load(URL, 0, 0).await.unwrap();
        assert_eq!(image.width(), 16);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(loader.memory_cache_stats().size, 0);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_commits_nothing_and_retries() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::FailMidStream(png(32, 32)));
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let result = loader.load(URL, 0, 0).await;
        assert!(matches!(result, Err(CacheError::Transport { .. })));
        let disk = loader.disk_cache().unwrap();
        assert!(!disk.contains(&CacheKey::from_url(URL)).await);

        fetcher.route(URL, MockResponse::Body(png(32, 32)));
        let image = loader.load(URL, 0, 0).await.unwrap();
        assert_eq!(image.width(), 32);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_failure() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Refuse);
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let err = loader.load(URL, 0, 0).await.unwrap_err();
        assert!(err.is_transient());
        assert!(loader.disk_cache().unwrap().is_empty().await);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_removed_from_disk() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(b"<html>not an image</html>".to_vec()));
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let result = loader.load(URL, 0, 0).await;
        assert!(matches!(result, Err(CacheError::Decode { .. })));
        let disk = loader.disk_cache().unwrap();
        assert!(!disk.contains(&CacheKey::from_url(URL)).await);
        assert_eq!(loader.memory_cache_stats().size, 0);
    }

    #[tokio::test]
    async fn test_write_in_flight_rechecks_disk() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(png(8, 8)));
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let disk = loader.disk_cache().unwrap();
        let key = CacheKey::from_url(URL);
        let writer = disk.begin_write(&key).await.unwrap().unwrap();

        let result = loader.load(URL, 0, 0).await;
        assert!(matches!(result, Err(CacheError::NotFound { .. })));
        assert_eq!(fetcher.calls(), 0);
        writer.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_tiers() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(png(8, 8)));
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        loader.load(URL, 0, 0).await.unwrap();
        loader.clear_all().await.unwrap();

        assert_eq!(loader.memory_cache_stats().size, 0);
        assert!(loader.disk_cache().unwrap().is_empty().await);
        loader.load(URL, 0, 0).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_blocking_rejected_on_delivery_thread() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let (loader, dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        dispatcher.attach_current_thread().unwrap();
        let err = loader.load_blocking(URL, 0, 0).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_blocking_from_plain_thread() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(png(24, 12)));
        let (loader, _dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let worker = loader.clone();
        let image = std::thread::spawn(move || worker.load_blocking(URL, 0, 0))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!((image.width(), image.height()), (24, 12));

        assert!(matches!(
            loader.load_blocking(URL, 0, 0),
            Err(CacheError::Configuration { .. })
        ));
    }

    async fn drain_until_delivered(dispatcher: &mut ResultDispatcher, expected: u64) {
        for _ in 0..200 {
            dispatcher.drain_pending().unwrap();
            if dispatcher.delivered() + dispatcher.dropped() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for image delivery");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bind_async_delivers_bounded_image() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(png(400, 200)));
        let (loader, mut dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let target = Arc::new(RecordingTarget::new(100, 50));
        loader
            .bind_async(URL, Arc::clone(&target) as Arc<dyn DisplayTarget>)
            .unwrap();
        drain_until_delivered(&mut dispatcher, 1).await;

        assert_eq!(target.images(), vec![200]);
        assert_eq!(target.tag().as_deref(), Some(URL));

        // Second bind is a memory hit, applied without the pool.
        loader
            .bind_async(URL, Arc::clone(&target) as Arc<dyn DisplayTarget>)
            .unwrap();
        assert_eq!(target.images(), vec![200, 200]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_bind_async_delivers_when_runtime_shares_delivery_thread() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(URL, MockResponse::Body(png(40, 20)));
        let (loader, mut dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        // The single runtime thread is also the delivery thread.
        dispatcher.drain_pending().unwrap();
        let target = Arc::new(RecordingTarget::new(0, 0));
        loader
            .bind_async(URL, Arc::clone(&target) as Arc<dyn DisplayTarget>)
            .unwrap();
        drain_until_delivered(&mut dispatcher, 1).await;

        assert_eq!(target.images(), vec![40]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rebound_target_drops_stale_result() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let other = "https://images.example.com/other.png";
        fetcher.route(URL, MockResponse::Body(png(30, 30)));
        let (loader, mut dispatcher) = loader_with(&temp, 1024 * 1024, &fetcher).await;

        let target = Arc::new(RecordingTarget::new(0, 0));
        loader
            .bind_async(URL, Arc::clone(&target) as Arc<dyn DisplayTarget>)
            .unwrap();
        // Recycled for another item before the first load is delivered.
        target.set_tag(other);

        drain_until_delivered(&mut dispatcher, 1).await;
        assert!(target.images().is_empty());
        assert_eq!(dispatcher.dropped(), 1);
    }
}
