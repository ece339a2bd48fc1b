//! Request execution.
//!
//! A submitted request runs in two stages. The worker stage links the
//! request onto an identical in-flight request or loads it itself (memory
//! cache, disk cache, network, decode). The publish stage runs on the
//! interactive loop: it attaches the result to the target, reports to the
//! callback, hands the result to linked followers and retires the request.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{DecodedImage, ImageInput, LoadOrigin, SourceDescriptor, TargetSize};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{
    DisplayParams, ImageDecoder, OrientationReader, ResourceProvider, TargetSurface,
};
use crate::domain::services::{ORIENTATION_NORMAL, choose_downsample_shift, correct_shift};
use crate::infrastructure::config::{NetworkConfig, PipelineConfig};
use crate::infrastructure::image::{
    CacheStats, DirectoryResources, DiskImageCache, DiskLookup, ExifOrientationReader,
    HttpFetcher, ImageCrateDecoder, MemoryImageCache,
};

use super::interactive::InteractiveHandle;
use super::registry::RequestRegistry;
use super::request::{ImageRequest, RequestHandle, RequestState};

/// Default number of concurrent fetch/decode workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Decodes `input` for a request targeting `size`.
///
/// Probes the native size, picks a sample shift, decodes, then corrects the
/// shift for decoders that ignored it. Orientation is only read when
/// `orientation` is given.
///
/// # Errors
/// Returns `DecodeFormat` if the input is not a supported image.
pub fn decode_input(
    decoder: &dyn ImageDecoder,
    orientation: Option<&dyn OrientationReader>,
    input: &ImageInput,
    size: TargetSize,
    disable_animation: bool,
) -> LoadResult<DecodedImage> {
    let (width, height) = decoder.probe_dimensions(input)?;
    let requested = if size.constrains_decode() {
        choose_downsample_shift(width, height, size.width, size.height).shift
    } else {
        0
    };

    let frame = decoder.decode(input, requested)?;
    let shift = correct_shift(requested, width, frame.width());
    let code = orientation
        .and_then(|reader| reader.read_orientation(input))
        .unwrap_or(ORIENTATION_NORMAL);
    let animated = frame.animated && !disable_animation;

    trace!(
        width = width,
        height = height,
        target = %size,
        shift = shift,
        orientation = code,
        "Decoded image"
    );
    Ok(DecodedImage::new(frame.pixels, shift, code, animated))
}

/// Builds an [`ImagePipeline`].
pub struct ImagePipelineBuilder {
    interactive: InteractiveHandle,
    memory_cache: Option<Arc<MemoryImageCache>>,
    disk_cache: Option<Arc<DiskImageCache>>,
    decoder: Arc<dyn ImageDecoder>,
    orientation: Arc<dyn OrientationReader>,
    resources: Arc<dyn ResourceProvider>,
    network: NetworkConfig,
    max_workers: usize,
}

impl ImagePipelineBuilder {
    /// Uses the given memory cache.
    #[must_use]
    pub fn memory_cache(mut self, cache: Arc<MemoryImageCache>) -> Self {
        self.memory_cache = Some(cache);
        self
    }

    /// Enables the disk cache.
    #[must_use]
    pub fn disk_cache(mut self, cache: Arc<DiskImageCache>) -> Self {
        self.disk_cache = Some(cache);
        self
    }

    /// Replaces the decoder.
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replaces the orientation reader.
    #[must_use]
    pub fn orientation_reader(mut self, reader: Arc<dyn OrientationReader>) -> Self {
        self.orientation = reader;
        self
    }

    /// Replaces the resource provider.
    #[must_use]
    pub fn resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = resources;
        self
    }

    /// Sets network timeouts and redirect limit.
    #[must_use]
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Sets the worker count (at least one).
    #[must_use]
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Builds the pipeline. Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `Network` if the HTTP client cannot be created, or `Io` when
    /// called outside a runtime.
    pub fn build(self) -> LoadResult<ImagePipeline> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LoadError::io(format!("No async runtime: {e}")))?;
        let fetcher = HttpFetcher::new(&self.network)?;

        let inner = PipelineInner {
            registry: RequestRegistry::new(),
            memory: self
                .memory_cache
                .unwrap_or_else(|| Arc::new(MemoryImageCache::with_default_capacity())),
            disk: self.disk_cache,
            fetcher,
            decoder: self.decoder,
            orientation: self.orientation,
            resources: self.resources,
            interactive: self.interactive,
            workers: Arc::new(Semaphore::new(self.max_workers)),
            next_id: AtomicU64::new(1),
            runtime,
        };

        debug!(
            workers = self.max_workers,
            disk_cache = inner.disk.is_some(),
            "Image pipeline ready"
        );
        Ok(ImagePipeline {
            inner: Arc::new(inner),
        })
    }
}

struct PipelineInner {
    registry: RequestRegistry,
    memory: Arc<MemoryImageCache>,
    disk: Option<Arc<DiskImageCache>>,
    fetcher: HttpFetcher,
    decoder: Arc<dyn ImageDecoder>,
    orientation: Arc<dyn OrientationReader>,
    resources: Arc<dyn ResourceProvider>,
    interactive: InteractiveHandle,
    workers: Arc<Semaphore>,
    next_id: AtomicU64,
    runtime: tokio::runtime::Handle,
}

/// Image loading pipeline.
///
/// Cheap to clone; clones share caches, workers and in-flight requests.
#[derive(Clone)]
pub struct ImagePipeline {
    inner: Arc<PipelineInner>,
}

impl ImagePipeline {
    /// Starts building a pipeline publishing through `interactive`.
    #[must_use]
    pub fn builder(interactive: InteractiveHandle) -> ImagePipelineBuilder {
        ImagePipelineBuilder {
            interactive,
            memory_cache: None,
            disk_cache: None,
            decoder: Arc::new(ImageCrateDecoder),
            orientation: Arc::new(ExifOrientationReader),
            resources: Arc::new(DirectoryResources::default()),
            network: NetworkConfig::default(),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Creates a pipeline from configuration, opening the disk cache if
    /// enabled.
    ///
    /// # Errors
    /// Returns an error if the disk cache or HTTP client cannot be created.
    pub async fn from_config(
        config: &PipelineConfig,
        interactive: InteractiveHandle,
    ) -> LoadResult<Self> {
        let memory = Arc::new(MemoryImageCache::new(
            config.memory_cache.max_entries,
            config.memory_cache.max_bytes,
        ));
        let resources = Arc::new(DirectoryResources::new(
            config.resources_dir.clone(),
            config.assets_dir.clone(),
        ));

        let mut builder = Self::builder(interactive)
            .memory_cache(memory)
            .resources(resources)
            .network(config.network.clone())
            .max_workers(config.max_workers);

        if config.disk_cache.enabled {
            let disk = DiskImageCache::with_sqlite_index(
                config.effective_cache_dir(),
                config.disk_cache.max_bytes,
            )
            .await?;
            builder = builder.disk_cache(Arc::new(disk));
        }

        let pipeline = builder.build()?;
        info!("Image pipeline initialized");
        Ok(pipeline)
    }

    /// Submits a request.
    ///
    /// A memory cache hit is published without touching a worker. Otherwise
    /// any request already targeting the same surface is cancelled, the
    /// placeholder is shown when submitting from the interactive loop, and
    /// the request is queued for a worker.
    pub fn submit(&self, request: ImageRequest) -> RequestHandle {
        let inner = &self.inner;
        let mut request = request;

        if request.options.size.is_native()
            && let Some((width, height)) = request
                .target
                .as_ref()
                .and_then(|target| target.current_content_size())
        {
            request.options.size = TargetSize::new(width, height);
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(RequestState::new(id, request));
        let handle = RequestHandle::new(state.clone());
        trace!(id = id, source = %state.source, size = %state.options.size, "Request submitted");

        let hit = state
            .cache_key
            .as_deref()
            .filter(|_| state.options.cache.ram_lookup)
            .and_then(|key| inner.memory.lookup(key, state.options.size));

        if let Some(target) = &state.target {
            inner.registry.cancel_for_target(target);
        }

        if let Some(image) = hit {
            debug!(id = id, key = ?state.cache_key, "Request served from memory cache");
            state.set_result(image, LoadOrigin::MemoryCache);
            state.finish();
            inner.registry.register(&state);
            let fade = state.options.fade.for_memory_hit();
            post_publish(inner, state, fade.steps, fade.duration_ms);
            return handle;
        }

        if InteractiveHandle::is_current()
            && let (Some(target), Some(placeholder)) = (&state.target, &state.placeholder)
        {
            target.show_placeholder(placeholder);
        }

        inner.registry.register(&state);
        spawn_worker(inner.clone(), state);
        handle
    }

    /// Cancels every in-flight request. Returns how many.
    pub fn cancel_all(&self) -> usize {
        let count = self.inner.registry.cancel_all();
        if count > 0 {
            debug!(count = count, "Cancelled all pending image loads");
        }
        count
    }

    /// Cancels every request attached to `surface`. Returns how many.
    pub fn cancel_for_target(&self, surface: &Arc<dyn TargetSurface>) -> usize {
        self.inner.registry.cancel_for_target(surface)
    }

    /// Returns the number of requests not yet published.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.inner.memory.stats()
    }

    /// Drops every decoded image from the memory cache.
    pub fn clear_memory_cache(&self) {
        self.inner.memory.clear();
    }

    /// Returns the memory cache.
    #[must_use]
    pub fn memory_cache(&self) -> &Arc<MemoryImageCache> {
        &self.inner.memory
    }

    /// Returns the disk cache, if enabled.
    #[must_use]
    pub fn disk_cache(&self) -> Option<&Arc<DiskImageCache>> {
        self.inner.disk.as_ref()
    }

    /// Stops accepting work and cancels everything in flight.
    ///
    /// Requests still waiting for a worker fail with `Cancelled`.
    pub fn shutdown(&self) {
        let count = self.inner.registry.cancel_all();
        self.inner.workers.close();
        info!(cancelled = count, "Image pipeline shut down");
    }
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("in_flight", &self.in_flight_count())
            .field("disk_cache", &self.inner.disk)
            .finish_non_exhaustive()
    }
}

fn spawn_worker(inner: Arc<PipelineInner>, state: Arc<RequestState>) {
    let runtime = inner.runtime.clone();
    runtime.spawn(execute(inner, state));
}

/// Worker stage of a request.
async fn execute(inner: Arc<PipelineInner>, state: Arc<RequestState>) {
    if !state.linking_done.load(Ordering::Acquire)
        && let Some(leader) = inner.registry.try_link(&state)
    {
        trace!(id = state.id, leader = leader.id, "Waiting on linked request");
        return;
    }

    let outcome = match inner.workers.clone().acquire_owned().await {
        Ok(_permit) => load(&inner, &state).await,
        Err(_) => Err(LoadError::Cancelled),
    };

    match outcome {
        Ok((image, origin)) => state.set_result(image, origin),
        Err(e) => {
            if !e.is_cancelled() {
                debug!(id = state.id, source = %state.source, error = %e, "Request failed");
            }
            state.set_error(e);
        }
    }

    complete(&inner, state);
}

/// Finishes a request and schedules publication for it and its followers.
///
/// Followers receive the leader's result or error in link order. When the
/// leader was cancelled it has nothing to share: the first follower still
/// waiting takes over the load and the others are moved onto it.
fn complete(inner: &Arc<PipelineInner>, state: Arc<RequestState>) {
    let followers = state.finish();
    let (result, error) = {
        let outcome = state.outcome.lock();
        (outcome.result.clone(), outcome.error.clone())
    };
    let fade = state.options.fade;
    post_publish(inner, state, fade.steps, fade.duration_ms);

    let mut successor: Option<Arc<RequestState>> = None;
    for follower in followers {
        if let Some((image, origin)) = &result {
            follower.set_result(image.clone(), *origin);
        } else if let Some(error) = error.as_ref().filter(|e| !e.is_cancelled()) {
            follower.set_error(error.clone());
        } else if !follower.is_cancelled() {
            hand_over(inner, &mut successor, follower);
            continue;
        }
        follower.finish();
        let fade = follower.options.fade;
        post_publish(inner, follower, fade.steps, fade.duration_ms);
    }

    if let Some(leader) = successor {
        trace!(id = leader.id, "Resuming follower of cancelled request");
        spawn_worker(inner.clone(), leader);
    }
}

/// Moves a follower of a cancelled request onto the successor, making it
/// the successor if there is none yet.
fn hand_over(
    inner: &Arc<PipelineInner>,
    successor: &mut Option<Arc<RequestState>>,
    follower: Arc<RequestState>,
) {
    if let Some(leader) = successor.as_ref() {
        follower.leader.store(leader.id, Ordering::Release);
        if leader.add_follower(follower.clone()) {
            trace!(id = follower.id, leader = leader.id, "Follower moved to new leader");
            return;
        }
        follower.leader.store(0, Ordering::Release);
        spawn_worker(inner.clone(), follower);
        return;
    }
    follower.leader.store(0, Ordering::Release);
    *successor = Some(follower);
}

async fn load(
    inner: &Arc<PipelineInner>,
    state: &Arc<RequestState>,
) -> LoadResult<(Arc<DecodedImage>, LoadOrigin)> {
    if state.options.cache.ram_lookup
        && let Some(key) = state.cache_key.as_deref()
        && let Some(image) = inner.memory.lookup(key, state.options.size)
    {
        return Ok((image, LoadOrigin::MemoryCache));
    }

    if state.is_cancelled() {
        return Err(LoadError::Cancelled);
    }
    if state.source.is_blank() {
        return Err(LoadError::NoInput);
    }

    let (input, origin) = match &state.source {
        SourceDescriptor::Resource(id) => (inner.resources.open_resource(*id)?, LoadOrigin::Resource),
        SourceDescriptor::Asset(name) => (inner.resources.open_asset(name)?, LoadOrigin::Asset),
        SourceDescriptor::Url(url) => fetch_url(inner, state, url).await?,
    };

    if state.is_cancelled() {
        return Err(LoadError::Cancelled);
    }

    let decoder = inner.decoder.clone();
    let orientation = state
        .source
        .url()
        .is_some()
        .then(|| inner.orientation.clone());
    let size = state.options.size;
    let disable_animation = state.options.disable_animation;
    let decoded = tokio::task::spawn_blocking(move || {
        decode_input(
            decoder.as_ref(),
            orientation.as_deref(),
            &input,
            size,
            disable_animation,
        )
    })
    .await
    .map_err(|e| LoadError::decode(format!("Decode task panicked: {e}")))??;

    let image = Arc::new(decoded);
    if state.options.cache.ram_store
        && let Some(key) = &state.cache_key
    {
        inner.memory.store(key.clone(), image.clone());
    }
    Ok((image, origin))
}

/// Resolves a URL through the disk cache, downloading when needed.
async fn fetch_url(
    inner: &Arc<PipelineInner>,
    state: &Arc<RequestState>,
    url: &str,
) -> LoadResult<(ImageInput, LoadOrigin)> {
    let policy = state.options.cache;
    let cache = inner
        .disk
        .as_ref()
        .zip(state.origin_key.as_deref())
        .filter(|_| policy.needs_disk_index());

    let mut existing = None;
    if let Some((disk, key)) = cache {
        if let DiskLookup::Found { id, byte_size } = disk.lookup(key).await {
            let path = disk.entry_path(id);
            if policy.disk_lookup
                && byte_size > 0
                && tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file())
            {
                disk.touch(id).await;
                debug!(id = state.id, key = %key, entry = id, "Request served from disk cache");
                return Ok((ImageInput::File(path), LoadOrigin::DiskCache));
            }
            existing = Some((id, byte_size));
        }
    }

    if policy.cached_only {
        return Err(LoadError::not_cached(
            state.origin_key.clone().unwrap_or_else(|| url.to_string()),
        ));
    }
    if state.is_cancelled() {
        return Err(LoadError::Cancelled);
    }

    let provisional: Option<PathBuf> = cache
        .filter(|_| policy.disk_store)
        .map(|(disk, _)| disk.entry_path(disk.reserve_provisional_slot()));

    let handle = RequestHandle::new(state.clone());
    let callback = state.callback.clone();
    let mut progress = move |received: u64, total: u64| {
        if let Some(callback) = &callback {
            callback.on_progress(&handle, received, total);
        }
    };

    debug!(id = state.id, url = %url, "Downloading image from network");
    let downloaded = inner
        .fetcher
        .download(url, provisional.as_deref(), &state.cancelled, &mut progress)
        .await;

    let bytes = match downloaded {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Some(path) = &provisional {
                remove_provisional(path).await;
            }
            return Err(e);
        }
    };

    if let (Some(path), Some((disk, key))) = (&provisional, cache) {
        let size = bytes.len() as u64;
        let stored = match existing {
            Some((id, old_size)) => disk.refresh(path, id, old_size, size).await,
            None => disk.commit(path, key, size).await.map(|_| ()),
        };
        if let Err(e) = stored {
            warn!(id = state.id, key = %key, error = %e, "Failed to store image in disk cache");
            remove_provisional(path).await;
        }
    }

    Ok((ImageInput::Memory(bytes), LoadOrigin::Network))
}

async fn remove_provisional(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove partial download");
    }
}

fn post_publish(inner: &Arc<PipelineInner>, state: Arc<RequestState>, fade_steps: u32, fade_ms: u32) {
    let publisher = inner.clone();
    inner.interactive.post(Box::new(move || {
        publish(&publisher, &state, fade_steps, fade_ms);
    }));
}

/// Publish stage; runs on the interactive loop.
fn publish(inner: &PipelineInner, state: &Arc<RequestState>, fade_steps: u32, fade_ms: u32) {
    let handle = RequestHandle::new(state.clone());
    let (result, error) = {
        let outcome = state.outcome.lock();
        (outcome.result.clone(), outcome.error.clone())
    };

    let error = if state.is_cancelled() {
        Some(error.unwrap_or(LoadError::Cancelled))
    } else {
        if let Some((image, origin)) = &result {
            if let Some(target) = &state.target {
                let size = state.options.size;
                let (width, height) = if size.is_explicit() {
                    (size.width, size.height)
                } else {
                    (image.width(), image.height())
                };
                target.attach(
                    image,
                    DisplayParams {
                        width,
                        height,
                        scale: state.options.scale,
                        fade_steps,
                        fade_duration_ms: fade_ms,
                    },
                );
            }
            if let Some(callback) = &state.callback {
                callback.on_result(&handle, image, *origin);
            }
        } else if let Some(target) = &state.target
            && state.placeholder.is_none()
        {
            target.clear();
        }
        error
    };

    if let Some(error) = error {
        match &state.callback {
            Some(callback) => callback.on_error(&handle, &error),
            None if !error.is_cancelled() => {
                warn!(id = state.id, source = %state.source, error = %error, "Image request failed");
            }
            None => {}
        }
    }

    inner.registry.remove(state.id);
    trace!(id = state.id, "Request published");
}
