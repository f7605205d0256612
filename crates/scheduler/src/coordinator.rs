//! The render coordinator.
//!
//! Single entry point for all render demand. Serves what it can from the
//! tile cache (including stretched fallbacks at other scales), queues the
//! rest through the shared priority queue, and applies finished bitmaps
//! back into the cache when the main context drains completions.

use std::sync::Arc;

use tracing::{debug, trace};
use vellum_cache::{FallbackBitmap, TileBitmapCache};
use vellum_provider::{PageProvider, SharedBitmap};
use vellum_tiles::max_stretch_for_zoom;

use crate::queue::{RenderCompletion, SharedQueue, SubmitResult};
use crate::request::{
    CoordinatorConfig, RenderError, RenderPriority, RenderRequest, RenderRequestKind, RequestId,
};
use crate::session::RenderSessionManager;
use crate::worker::{WorkerPool, WorkerPoolConfig};

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Only critical/high work is admitted during an active gesture.
    ActiveGestureDrop,
    PageQueueFull,
    GlobalQueueFull,
}

/// Result of [`RenderCoordinator::request`].
#[derive(Debug)]
pub enum RequestOutcome {
    /// Exact-scale cache hit; nothing was queued.
    Cached(FallbackBitmap),
    /// A stretched fallback is available to draw now; the real render was
    /// queued behind `ticket`.
    Fallback {
        shown: FallbackBitmap,
        ticket: RequestId,
    },
    /// Queued (or joined an identical in-flight request).
    Pending(RequestId),
    /// Dropped by admission policy.
    Rejected(RejectReason),
}

impl RequestOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, RequestOutcome::Rejected(_))
    }
}

/// A drained completion, enriched for the consumer.
#[derive(Debug)]
pub struct TileReady {
    pub request: RenderRequest,
    /// Bitmap for full-page requests (tiles land in the cache instead).
    pub bitmap: Option<SharedBitmap>,
    pub aborted: bool,
    pub failed: Option<RenderError>,
}

/// Coordinator counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorStats {
    pub submitted: u64,
    pub deduplicated: u64,
    pub served_from_cache: u64,
    pub fallbacks_served: u64,
    pub rejected_active_gesture: u64,
    pub rejected_queue_caps: u64,
    pub completed: u64,
    pub failed: u64,
    pub aborted: u64,
    pub retries_queued: u64,
    pub queue_clears: u64,
}

/// Accepts render requests, deduplicates in-flight work, enforces queue
/// caps, and dispatches to rasterization workers.
pub struct RenderCoordinator {
    config: CoordinatorConfig,
    queue: Arc<SharedQueue>,
    pool: Option<WorkerPool>,
    sessions: RenderSessionManager,
    document_id: String,
    gesture_active: bool,
    /// Criticals aborted or rejected during a gesture, reissued at
    /// settling completion.
    retry: Vec<RenderRequest>,
    accumulated_pan: f64,
    stats: CoordinatorStats,
}

impl RenderCoordinator {
    /// Start the coordinator with a live worker pool.
    pub fn start(
        provider: Arc<dyn PageProvider>,
        config: CoordinatorConfig,
        pool_config: WorkerPoolConfig,
    ) -> Self {
        let queue = Arc::new(SharedQueue::new(config.max_concurrent));
        let document_id = provider.document_id().unwrap_or_default();
        let pool = WorkerPool::start(pool_config, Arc::clone(&queue), provider);
        Self {
            config,
            queue,
            pool: Some(pool),
            sessions: RenderSessionManager::new(),
            document_id,
            gesture_active: false,
            retry: Vec::new(),
            accumulated_pan: 0.0,
            stats: CoordinatorStats::default(),
        }
    }

    /// A coordinator with no workers; jobs queue but never execute. Used
    /// by admission tests and dry-run tooling.
    pub fn start_detached(config: CoordinatorConfig, document_id: impl Into<String>) -> Self {
        Self {
            queue: Arc::new(SharedQueue::new(config.max_concurrent)),
            config,
            pool: None,
            sessions: RenderSessionManager::new(),
            document_id: document_id.into(),
            gesture_active: false,
            retry: Vec::new(),
            accumulated_pan: 0.0,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    pub fn begin_session(&mut self) -> u64 {
        self.sessions.begin_session()
    }

    pub fn current_session(&self) -> u64 {
        self.sessions.current()
    }

    /// Admission switches to drop mode while a gesture is active: only
    /// critical and high bands enter the queue.
    pub fn set_gesture_active(&mut self, active: bool) {
        self.gesture_active = active;
        if !active {
            self.accumulated_pan = 0.0;
        }
    }

    /// Submit a render request.
    ///
    /// Tile requests are first answered from the cache: an exact-scale
    /// entry short-circuits entirely, and an acceptable stretched entry is
    /// returned for immediate display while the true render queues behind
    /// it. `zoom` and `dpr` size the fallback acceptance bound.
    pub fn request(
        &mut self,
        request: RenderRequest,
        cache: &mut TileBitmapCache,
        zoom: f64,
        dpr: f64,
    ) -> RequestOutcome {
        self.stats.submitted += 1;

        let mut fallback = None;
        if let RenderRequestKind::Tile(tile) = request.kind {
            let ideal_scale = zoom * dpr;
            let max_stretch = max_stretch_for_zoom(zoom);
            if let Some(hit) =
                cache.get_best_available(&request.document_id, &tile, ideal_scale, max_stretch)
            {
                if hit.fallback_tile.key() == tile.key() {
                    self.stats.served_from_cache += 1;
                    return RequestOutcome::Cached(hit);
                }
                fallback = Some(hit);
            }
        }

        match self.admit(&request) {
            Ok(()) => {}
            Err(reason) => {
                if request.priority == RenderPriority::Critical {
                    self.retry.push(request);
                    self.stats.retries_queued += 1;
                }
                return match fallback {
                    // A rejected request with a usable fallback still
                    // paints something.
                    Some(shown) => {
                        self.stats.fallbacks_served += 1;
                        RequestOutcome::Fallback { shown, ticket: 0 }
                    }
                    None => RequestOutcome::Rejected(reason),
                };
            }
        }

        match self.queue.submit(request) {
            SubmitResult::Queued(id, _token) => match fallback {
                Some(shown) => {
                    self.stats.fallbacks_served += 1;
                    RequestOutcome::Fallback { shown, ticket: id }
                }
                None => RequestOutcome::Pending(id),
            },
            SubmitResult::Deduplicated(id) => {
                self.stats.deduplicated += 1;
                match fallback {
                    Some(shown) => {
                        self.stats.fallbacks_served += 1;
                        RequestOutcome::Fallback { shown, ticket: id }
                    }
                    None => RequestOutcome::Pending(id),
                }
            }
        }
    }

    fn admit(&mut self, request: &RenderRequest) -> Result<(), RejectReason> {
        if self.gesture_active && request.priority > RenderPriority::High {
            self.stats.rejected_active_gesture += 1;
            return Err(RejectReason::ActiveGestureDrop);
        }
        if self.queue.queued_len() >= self.config.max_queued_global {
            self.stats.rejected_queue_caps += 1;
            return Err(RejectReason::GlobalQueueFull);
        }
        // Criticals may exceed the per-page cap; everything else respects
        // it.
        if request.priority != RenderPriority::Critical
            && self.queue.queued_for_page(&request.document_id, request.page())
                >= self.config.max_queued_per_page
        {
            self.stats.rejected_queue_caps += 1;
            return Err(RejectReason::PageQueueFull);
        }
        Ok(())
    }

    /// Collect finished work, applying successful tile bitmaps to the
    /// cache (even aborted ones; a completed rasterization is useful on a
    /// later pan). Returns the events consumers re-composite from.
    pub fn drain_completions(&mut self, cache: &mut TileBitmapCache) -> Vec<TileReady> {
        let completions = self.queue.drain_completions();
        let mut out = Vec::with_capacity(completions.len());
        for completion in completions {
            out.push(self.finish(completion, cache));
        }
        out
    }

    fn finish(&mut self, completion: RenderCompletion, cache: &mut TileBitmapCache) -> TileReady {
        let RenderCompletion {
            request,
            result,
            aborted,
            ..
        } = completion;

        if aborted {
            self.stats.aborted += 1;
            if request.priority == RenderPriority::Critical {
                self.retry.push(request.clone());
                self.stats.retries_queued += 1;
            }
        }

        match result {
            Ok(bitmap) => {
                self.stats.completed += 1;
                match request.kind {
                    RenderRequestKind::Tile(tile) => {
                        cache.put(
                            &request.document_id,
                            tile,
                            Arc::clone(&bitmap),
                            request.scale_epoch,
                        );
                        TileReady {
                            request,
                            bitmap: None,
                            aborted,
                            failed: None,
                        }
                    }
                    RenderRequestKind::FullPage { .. } => TileReady {
                        request,
                        bitmap: Some(bitmap),
                        aborted,
                        failed: None,
                    },
                }
            }
            Err(error) => {
                if !aborted && !matches!(error, RenderError::Aborted) {
                    self.stats.failed += 1;
                    debug!(%error, page = request.page(), "render completed with failure");
                }
                TileReady {
                    request,
                    bitmap: None,
                    aborted,
                    failed: Some(error),
                }
            }
        }
    }

    /// Take the criticals parked during the gesture for reissue.
    pub fn take_retry_requests(&mut self) -> Vec<RenderRequest> {
        std::mem::take(&mut self.retry)
    }

    /// Blanket abort.
    pub fn abort_all_pending(&mut self) -> usize {
        self.stats.queue_clears += 1;
        self.queue.abort_where(|_| true)
    }

    /// Abort requests from sessions older than the newest `keep_recent`,
    /// scaled up for slow high-scale renders (an in-flight 32x tile is
    /// worth more patience than a 2x one).
    pub fn abort_stale_sessions(&mut self, keep_recent: usize, current_scale: u32) -> usize {
        let keep = keep_recent + (current_scale / 8) as usize;
        let retired = self.sessions.retire_stale(keep);
        if retired.is_empty() {
            return 0;
        }
        trace!(?retired, "aborting stale sessions");
        self.queue
            .abort_where(move |r| retired.contains(&r.session_id))
    }

    /// Abort queued tiles rendered for a superseded scale tier.
    pub fn abort_stale_scale_tiles(&mut self, current_scale: u32, stale_scale: u32) -> usize {
        if current_scale == stale_scale {
            return 0;
        }
        self.queue.abort_where(move |r| {
            matches!(r.kind, RenderRequestKind::Tile(t) if t.scale == stale_scale)
        })
    }

    /// Queue-clearing rule, zoom half: a jump of ratio >= 2 in either
    /// direction aborts everything pending.
    pub fn note_zoom_change(&mut self, old_zoom: f64, new_zoom: f64) -> bool {
        if old_zoom <= 0.0 || new_zoom <= 0.0 {
            return false;
        }
        let ratio = (new_zoom / old_zoom).max(old_zoom / new_zoom);
        if ratio >= self.config.clear_on_zoom_ratio {
            self.abort_all_pending();
            self.accumulated_pan = 0.0;
            return true;
        }
        false
    }

    /// Queue-clearing rule, pan half: cumulative pan of half a viewport at
    /// high zoom aborts everything pending.
    pub fn note_pan(&mut self, dx: f64, dy: f64, viewport_extent: f64, zoom: f64) -> bool {
        self.accumulated_pan += (dx * dx + dy * dy).sqrt();
        if zoom >= self.config.pan_clear_min_zoom
            && viewport_extent > 0.0
            && self.accumulated_pan >= viewport_extent * self.config.clear_on_pan_viewport_fraction
        {
            self.abort_all_pending();
            self.accumulated_pan = 0.0;
            return true;
        }
        false
    }

    pub fn queued_len(&self) -> usize {
        self.queue.queued_len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Stop the worker pool, waiting for threads to exit.
    pub fn shutdown(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            pool.shutdown();
        }
        self.pool = None;
    }
}

impl Drop for RenderCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
