//! Registry of in-flight requests and request coalescing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::ports::TargetSurface;

use super::request::{RequestId, RequestState};

/// In-flight requests keyed by id, behind a single coarse lock.
///
/// Ids grow with submission order, so scans visit older requests first.
#[derive(Default)]
pub(crate) struct RequestRegistry {
    requests: Mutex<BTreeMap<RequestId, Arc<RequestState>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request. Registering twice is harmless.
    pub fn register(&self, request: &Arc<RequestState>) {
        self.requests
            .lock()
            .entry(request.id)
            .or_insert_with(|| request.clone());
    }

    /// Removes a request once it has been published.
    pub fn remove(&self, id: RequestId) {
        if self.requests.lock().remove(&id).is_some() {
            trace!(id = id, "Request removed from registry");
        }
    }

    /// Runs the linking pass for `request`.
    ///
    /// Looks for an unfinished, unlinked request with the same cache key
    /// that completed its own linking pass, and links onto the first one
    /// found. Returns the leader, or `None` if `request` has to do the work
    /// itself. Either way the request is registered and its linking pass is
    /// marked done before the lock is released.
    pub fn try_link(&self, request: &Arc<RequestState>) -> Option<Arc<RequestState>> {
        let mut requests = self.requests.lock();
        let mut leader = None;

        if let Some(key) = request.cache_key.as_deref() {
            for candidate in requests.values() {
                if candidate.id == request.id || !candidate.accepts_followers_for(key) {
                    continue;
                }
                if request
                    .leader
                    .compare_exchange(0, candidate.id, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    break;
                }
                if candidate.add_follower(request.clone()) {
                    debug!(id = request.id, leader = candidate.id, key = %key, "Request linked");
                    leader = Some(candidate.clone());
                    break;
                }
                // Leader finished between the check and the append.
                request.leader.store(0, Ordering::Release);
            }
        }

        request.linking_done.store(true, Ordering::Release);
        requests.entry(request.id).or_insert_with(|| request.clone());
        leader
    }

    /// Cancels every request attached to `surface`. Returns how many.
    pub fn cancel_for_target(&self, surface: &Arc<dyn TargetSurface>) -> usize {
        let requests = self.requests.lock();
        let mut count = 0;
        for request in requests.values().filter(|r| r.targets(surface)) {
            if !request.is_cancelled() {
                request.cancel();
                count += 1;
            }
        }
        if count > 0 {
            debug!(count = count, "Cancelled requests for reused target");
        }
        count
    }

    /// Cancels every in-flight request. Returns how many.
    pub fn cancel_all(&self) -> usize {
        let requests = self.requests.lock();
        for request in requests.values() {
            request.cancel();
        }
        requests.len()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }
}
