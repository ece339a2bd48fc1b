//! Image requests: the builder applications fill in, and the shared runtime
//! state the pipeline tracks while a request is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::domain::entities::{
    CachePolicy, DecodedImage, FadeSpec, LoadOrigin, RequestOptions, ScaleMode, SourceDescriptor,
    TargetSize,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::TargetSurface;

/// Identifier assigned to each submitted request. Never zero.
pub type RequestId = u64;

/// Receives request outcomes.
///
/// `on_result` and `on_error` run on the interactive thread. `on_progress`
/// runs on the worker performing the download.
pub trait RequestCallback: Send + Sync {
    /// Download progress; `total` is zero when the length is unknown.
    fn on_progress(&self, _request: &RequestHandle, _received: u64, _total: u64) {}

    /// The request produced an image.
    fn on_result(&self, request: &RequestHandle, image: &Arc<DecodedImage>, origin: LoadOrigin);

    /// The request failed or was cancelled.
    fn on_error(&self, request: &RequestHandle, error: &LoadError);
}

/// A request to load one image, built before submission.
#[derive(Clone)]
pub struct ImageRequest {
    pub(crate) source: SourceDescriptor,
    pub(crate) options: RequestOptions,
    pub(crate) target: Option<Arc<dyn TargetSurface>>,
    pub(crate) callback: Option<Arc<dyn RequestCallback>>,
    pub(crate) placeholder: Option<Arc<DecodedImage>>,
}

impl ImageRequest {
    /// Creates a request for the given source with default options.
    #[must_use]
    pub fn new(source: SourceDescriptor) -> Self {
        Self {
            source,
            options: RequestOptions::default(),
            target: None,
            callback: None,
            placeholder: None,
        }
    }

    /// Creates a request for a remote URL.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::new(SourceDescriptor::Url(url.into()))
    }

    /// Creates a request for a bundled resource.
    #[must_use]
    pub fn resource(id: u32) -> Self {
        Self::new(SourceDescriptor::Resource(id))
    }

    /// Creates a request for a packaged asset.
    #[must_use]
    pub fn asset(name: impl Into<String>) -> Self {
        Self::new(SourceDescriptor::Asset(name.into()))
    }

    /// Sets the decode target size.
    #[must_use]
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.options.size = TargetSize::new(width, height);
        self
    }

    /// Sets the scale mode.
    #[must_use]
    pub fn scale(mut self, scale: ScaleMode) -> Self {
        self.options.scale = scale;
        self
    }

    /// Decodes animated formats as still images.
    #[must_use]
    pub fn disable_animation(mut self) -> Self {
        self.options.disable_animation = true;
        self
    }

    /// Replaces the cache policy.
    #[must_use]
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.options.cache = policy;
        self
    }

    /// Fails instead of downloading when the image is not cached.
    #[must_use]
    pub fn cached_only(mut self) -> Self {
        self.options.cache.cached_only = true;
        self
    }

    /// Sets the cross-fade.
    #[must_use]
    pub fn fade(mut self, fade: FadeSpec) -> Self {
        self.options.fade = fade;
        self
    }

    /// Overrides the cache key derived from the source.
    #[must_use]
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.options.cache_key = Some(key.into());
        self
    }

    /// Attaches an application id.
    #[must_use]
    pub fn app_id(mut self, id: i64) -> Self {
        self.options.app_id = id;
        self
    }

    /// Attaches an application tag.
    #[must_use]
    pub fn app_tag(mut self, tag: impl Into<String>) -> Self {
        self.options.app_tag = Some(tag.into());
        self
    }

    /// Sets the surface the result is attached to.
    #[must_use]
    pub fn target(mut self, target: Arc<dyn TargetSurface>) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets the callback receiving the outcome.
    #[must_use]
    pub fn callback(mut self, callback: Arc<dyn RequestCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Sets the image shown while loading.
    #[must_use]
    pub fn placeholder(mut self, placeholder: Arc<DecodedImage>) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    /// Returns the source.
    #[must_use]
    pub const fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &RequestOptions {
        &self.options
    }
}

impl std::fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRequest")
            .field("source", &self.source)
            .field("options", &self.options)
            .field("has_target", &self.target.is_some())
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// Mutable outcome of a request, guarded by the request's own lock.
#[derive(Default)]
pub(crate) struct Outcome {
    pub result: Option<(Arc<DecodedImage>, LoadOrigin)>,
    pub error: Option<LoadError>,
    pub finished: bool,
    pub followers: Vec<Arc<RequestState>>,
}

/// Runtime state of a submitted request.
pub(crate) struct RequestState {
    pub id: RequestId,
    pub source: SourceDescriptor,
    pub options: RequestOptions,
    /// Identity of the decoded result; `None` disables caching and linking.
    pub cache_key: Option<String>,
    /// Identity of the source bytes, used by the disk cache.
    pub origin_key: Option<String>,
    pub target: Option<Arc<dyn TargetSurface>>,
    pub callback: Option<Arc<dyn RequestCallback>>,
    pub placeholder: Option<Arc<DecodedImage>>,
    pub cancelled: AtomicBool,
    pub linking_done: AtomicBool,
    /// Id of the leader this request is linked to, zero when unlinked.
    pub leader: AtomicU64,
    pub outcome: Mutex<Outcome>,
}

impl RequestState {
    pub fn new(id: RequestId, request: ImageRequest) -> Self {
        let cache_key = request.options.cache_key(&request.source);
        let origin_key = request.options.origin_key(&request.source);
        Self {
            id,
            source: request.source,
            options: request.options,
            cache_key,
            origin_key,
            target: request.target,
            callback: request.callback,
            placeholder: request.placeholder,
            cancelled: AtomicBool::new(false),
            linking_done: AtomicBool::new(false),
            leader: AtomicU64::new(0),
            outcome: Mutex::new(Outcome::default()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.lock().finished
    }

    pub fn is_linked(&self) -> bool {
        self.leader.load(Ordering::Acquire) != 0
    }

    /// Returns true if another request with `key` may link onto this one.
    pub fn accepts_followers_for(&self, key: &str) -> bool {
        self.cache_key.as_deref() == Some(key)
            && self.linking_done.load(Ordering::Acquire)
            && !self.is_linked()
            && !self.is_finished()
    }

    /// Appends a follower unless this request already finished.
    pub fn add_follower(&self, follower: Arc<Self>) -> bool {
        let mut outcome = self.outcome.lock();
        if outcome.finished {
            return false;
        }
        outcome.followers.push(follower);
        true
    }

    pub fn set_result(&self, image: Arc<DecodedImage>, origin: LoadOrigin) {
        self.outcome.lock().result = Some((image, origin));
    }

    pub fn set_error(&self, error: LoadError) {
        self.outcome.lock().error = Some(error);
    }

    pub fn result(&self) -> Option<(Arc<DecodedImage>, LoadOrigin)> {
        self.outcome.lock().result.clone()
    }

    /// Marks the request finished and hands back the followers to notify.
    ///
    /// Once this returns no further follower can be linked.
    pub fn finish(&self) -> Vec<Arc<Self>> {
        let mut outcome = self.outcome.lock();
        outcome.finished = true;
        std::mem::take(&mut outcome.followers)
    }

    /// Returns true if the request targets `surface`.
    pub fn targets(&self, surface: &Arc<dyn TargetSurface>) -> bool {
        self.target.as_ref().is_some_and(|target| {
            std::ptr::addr_eq(Arc::as_ptr(target), Arc::as_ptr(surface))
        })
    }
}

/// Handle to a submitted request.
#[derive(Clone)]
pub struct RequestHandle {
    state: Arc<RequestState>,
}

impl RequestHandle {
    pub(crate) const fn new(state: Arc<RequestState>) -> Self {
        Self { state }
    }

    /// Returns the request id.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.state.id
    }

    /// Requests cooperative cancellation.
    ///
    /// Downloads stop at the next chunk boundary and the outcome is reported
    /// as `Cancelled` unless a result was already complete.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Returns true once loading work is over.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Returns the source.
    #[must_use]
    pub fn source(&self) -> &SourceDescriptor {
        &self.state.source
    }

    /// Returns the identity of the decoded result.
    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        self.state.cache_key.as_deref()
    }

    /// Returns the application id.
    #[must_use]
    pub fn app_id(&self) -> i64 {
        self.state.options.app_id
    }

    /// Returns the application tag.
    #[must_use]
    pub fn app_tag(&self) -> Option<&str> {
        self.state.options.app_tag.as_deref()
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.state.id)
            .field("source", &self.state.source)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockSurface;

    fn state(id: RequestId, request: ImageRequest) -> Arc<RequestState> {
        Arc::new(RequestState::new(id, request))
    }

    #[test]
    fn test_builder_sets_options() {
        let request = ImageRequest::url("https://example.com/a.gif")
            .size(100, 50)
            .disable_animation()
            .cached_only()
            .app_id(9)
            .app_tag("avatar");

        assert_eq!(request.options().size, TargetSize::new(100, 50));
        assert!(request.options().disable_animation);
        assert!(request.options().cache.cached_only);

        let handle = RequestHandle::new(state(1, request));
        assert_eq!(handle.cache_key(), Some("https://example.com/a.gif#noanim"));
        assert_eq!(handle.app_id(), 9);
        assert_eq!(handle.app_tag(), Some("avatar"));
    }

    #[test]
    fn test_finished_request_refuses_followers() {
        let leader = state(1, ImageRequest::url("a"));
        let follower = state(2, ImageRequest::url("a"));

        assert!(leader.add_follower(follower.clone()));
        let followers = leader.finish();
        assert_eq!(followers.len(), 1);
        assert!(!leader.add_follower(follower));
        assert!(leader.is_finished());
    }

    #[test]
    fn test_accepts_followers_only_after_linking_pass() {
        let leader = state(1, ImageRequest::url("a"));
        assert!(!leader.accepts_followers_for("a"));

        leader.linking_done.store(true, Ordering::Release);
        assert!(leader.accepts_followers_for("a"));
        assert!(!leader.accepts_followers_for("b"));

        leader.leader.store(7, Ordering::Release);
        assert!(!leader.accepts_followers_for("a"));
    }

    #[test]
    fn test_targets_compares_surface_identity() {
        let surface: Arc<dyn TargetSurface> = Arc::new(MockSurface::default());
        let other: Arc<dyn TargetSurface> = Arc::new(MockSurface::default());
        let request = state(1, ImageRequest::url("a").target(surface.clone()));

        assert!(request.targets(&surface));
        assert!(!request.targets(&other));
    }

    #[test]
    fn test_empty_cache_key_disables_identity() {
        let handle = RequestHandle::new(state(1, ImageRequest::url("a").cache_key("")));
        assert_eq!(handle.cache_key(), None);
    }
}
