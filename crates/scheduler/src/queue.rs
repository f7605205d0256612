//! Shared queue state between the main-context coordinator and the worker
//! pool.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;

use vellum_provider::SharedBitmap;

use crate::cancel::CancellationToken;
use crate::request::{RenderError, RenderRequest, RequestId, RequestIdentity};

/// A queued job, ordered by band then FIFO within a band.
#[derive(Debug, Clone)]
pub(crate) struct QueuedJob {
    pub id: RequestId,
    pub request: RenderRequest,
    pub token: CancellationToken,
    insertion_order: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert the band (Critical = 0 must win)
        // and the insertion order (earlier submissions first).
        other
            .request
            .priority
            .cmp(&self.request.priority)
            .then_with(|| other.insertion_order.cmp(&self.insertion_order))
    }
}

/// A finished (or aborted) render delivered back to the main context.
#[derive(Debug)]
pub struct RenderCompletion {
    pub id: RequestId,
    pub request: RenderRequest,
    pub result: Result<SharedBitmap, RenderError>,
    /// Set when the request was cancelled. A completed bitmap may still
    /// accompany an aborted completion; it goes to the cache but is never
    /// drawn directly.
    pub aborted: bool,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    /// Dedup index over queued + running requests.
    inflight: HashMap<RequestIdentity, RequestId>,
    /// Requests currently held by a worker.
    running: HashMap<RequestId, RenderRequest>,
    tokens: HashMap<RequestId, CancellationToken>,
    completions: Vec<RenderCompletion>,
    queued_per_page: HashMap<(String, u32), usize>,
    next_id: RequestId,
    insertion_counter: u64,
}

/// Mutex-guarded queue shared with worker threads. Only the coordinator
/// mutates admission state; workers take jobs and push completions.
pub(crate) struct SharedQueue {
    state: Mutex<QueueState>,
    /// Jobs handed to workers at once. Extra idle workers get nothing
    /// until a running job completes.
    max_concurrent: usize,
}

impl SharedQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Enqueue a request. Returns the new ticket and token, or the
    /// existing ticket when an identical request is already in flight.
    pub fn submit(&self, request: RenderRequest) -> SubmitResult {
        let mut state = self.state.lock().unwrap();
        let identity = request.identity();
        if let Some(&existing) = state.inflight.get(&identity) {
            return SubmitResult::Deduplicated(existing);
        }

        state.next_id += 1;
        state.insertion_counter += 1;
        let id = state.next_id;
        let token = CancellationToken::new();
        let job = QueuedJob {
            id,
            request: request.clone(),
            token: token.clone(),
            insertion_order: state.insertion_counter,
        };
        state.inflight.insert(identity, id);
        state.tokens.insert(id, token.clone());
        *state
            .queued_per_page
            .entry((request.document_id.clone(), request.page()))
            .or_default() += 1;
        state.heap.push(job);
        SubmitResult::Queued(id, token)
    }

    /// Worker side: take the next job, highest band first. Returns `None`
    /// while the concurrent-render cap is saturated.
    pub fn take_job(&self) -> Option<QueuedJob> {
        let mut state = self.state.lock().unwrap();
        if state.running.len() >= self.max_concurrent {
            return None;
        }
        let job = state.heap.pop()?;
        let page_key = (job.request.document_id.clone(), job.request.page());
        if let Some(count) = state.queued_per_page.get_mut(&page_key) {
            *count = count.saturating_sub(1);
        }
        state.running.insert(job.id, job.request.clone());
        Some(job)
    }

    /// Worker side: deliver a result.
    pub fn complete(
        &self,
        id: RequestId,
        request: RenderRequest,
        result: Result<SharedBitmap, RenderError>,
        aborted: bool,
    ) {
        let mut state = self.state.lock().unwrap();
        state.running.remove(&id);
        state.tokens.remove(&id);
        state.inflight.remove(&request.identity());
        state.completions.push(RenderCompletion {
            id,
            request,
            result,
            aborted,
        });
    }

    /// Main side: collect finished work.
    pub fn drain_completions(&self) -> Vec<RenderCompletion> {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.completions)
    }

    /// Cancel queued and running requests matching `predicate`.
    ///
    /// Queued matches are removed immediately and surface as aborted
    /// completions; running matches have their tokens cancelled and
    /// complete (aborted) when their worker notices.
    pub fn abort_where(&self, predicate: impl Fn(&RenderRequest) -> bool) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut aborted = 0;

        let jobs: Vec<QueuedJob> = state.heap.drain().collect();
        let mut kept = Vec::with_capacity(jobs.len());
        for job in jobs {
            if predicate(&job.request) {
                aborted += 1;
                job.token.cancel();
                state.tokens.remove(&job.id);
                state.inflight.remove(&job.request.identity());
                let page_key = (job.request.document_id.clone(), job.request.page());
                if let Some(count) = state.queued_per_page.get_mut(&page_key) {
                    *count = count.saturating_sub(1);
                }
                state.completions.push(RenderCompletion {
                    id: job.id,
                    request: job.request,
                    result: Err(RenderError::Aborted),
                    aborted: true,
                });
            } else {
                kept.push(job);
            }
        }
        state.heap = kept.into_iter().collect();

        let running: Vec<(RequestId, RenderRequest)> = state
            .running
            .iter()
            .map(|(id, r)| (*id, r.clone()))
            .collect();
        for (id, request) in running {
            if predicate(&request) {
                if let Some(token) = state.tokens.get(&id) {
                    token.cancel();
                    aborted += 1;
                }
            }
        }
        aborted
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn queued_for_page(&self, document: &str, page: u32) -> usize {
        self.state
            .lock()
            .unwrap()
            .queued_per_page
            .get(&(document.to_string(), page))
            .copied()
            .unwrap_or(0)
    }

    pub fn running_len(&self) -> usize {
        self.state.lock().unwrap().running.len()
    }

    pub fn pending_completions(&self) -> usize {
        self.state.lock().unwrap().completions.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.heap.is_empty() && state.running.is_empty()
    }
}

/// Result of [`SharedQueue::submit`].
pub(crate) enum SubmitResult {
    Queued(RequestId, CancellationToken),
    Deduplicated(RequestId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RenderPriority, RenderRequestKind};
    use vellum_tiles::TileCoordinate;

    fn request(page: u32, x: u32, priority: RenderPriority) -> RenderRequest {
        RenderRequest {
            kind: RenderRequestKind::Tile(TileCoordinate {
                page,
                tile_x: x,
                tile_y: 0,
                scale: 4,
                tile_size: 256,
            }),
            priority,
            document_id: "doc".into(),
            session_id: 1,
            scale_epoch: 0,
            render_params_id: 0,
            exact_scale: None,
        }
    }

    #[test]
    fn test_band_order_then_fifo() {
        let q = SharedQueue::new(4);
        q.submit(request(1, 0, RenderPriority::Low));
        q.submit(request(1, 1, RenderPriority::Critical));
        q.submit(request(1, 2, RenderPriority::Critical));
        q.submit(request(1, 3, RenderPriority::High));

        let order: Vec<u32> = std::iter::from_fn(|| q.take_job())
            .map(|j| match j.request.kind {
                RenderRequestKind::Tile(t) => t.tile_x,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_identity_dedup() {
        let q = SharedQueue::new(4);
        let first = q.submit(request(1, 0, RenderPriority::High));
        let SubmitResult::Queued(id, _) = first else {
            panic!("expected queued")
        };
        match q.submit(request(1, 0, RenderPriority::Low)) {
            SubmitResult::Deduplicated(existing) => assert_eq!(existing, id),
            _ => panic!("expected dedup"),
        }
        assert_eq!(q.queued_len(), 1);
    }

    #[test]
    fn test_dedup_covers_running_jobs() {
        let q = SharedQueue::new(4);
        q.submit(request(1, 0, RenderPriority::High));
        let job = q.take_job().unwrap();
        // Still in flight while running.
        assert!(matches!(
            q.submit(request(1, 0, RenderPriority::High)),
            SubmitResult::Deduplicated(_)
        ));
        // After completion the identity is free again.
        q.complete(job.id, job.request, Err(RenderError::Aborted), false);
        assert!(matches!(
            q.submit(request(1, 0, RenderPriority::High)),
            SubmitResult::Queued(..)
        ));
    }

    #[test]
    fn test_running_jobs_capped() {
        let q = SharedQueue::new(2);
        q.submit(request(1, 0, RenderPriority::High));
        q.submit(request(1, 1, RenderPriority::High));
        q.submit(request(1, 2, RenderPriority::High));

        let a = q.take_job().unwrap();
        let _b = q.take_job().unwrap();
        // Two renders are running; a third idle worker gets nothing.
        assert!(q.take_job().is_none());
        assert_eq!(q.running_len(), 2);

        // A completion frees a slot.
        q.complete(a.id, a.request, Err(RenderError::Aborted), false);
        assert!(q.take_job().is_some());
    }

    #[test]
    fn test_abort_where_queued() {
        let q = SharedQueue::new(4);
        q.submit(request(1, 0, RenderPriority::High));
        q.submit(request(2, 0, RenderPriority::High));
        let aborted = q.abort_where(|r| r.page() == 1);
        assert_eq!(aborted, 1);
        assert_eq!(q.queued_len(), 1);
        let completions = q.drain_completions();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].aborted);
        assert_eq!(completions[0].request.page(), 1);
    }

    #[test]
    fn test_abort_where_running_cancels_token() {
        let q = SharedQueue::new(4);
        q.submit(request(1, 0, RenderPriority::High));
        let job = q.take_job().unwrap();
        let aborted = q.abort_where(|_| true);
        assert_eq!(aborted, 1);
        assert!(job.token.is_cancelled());
    }

    #[test]
    fn test_per_page_counts() {
        let q = SharedQueue::new(4);
        q.submit(request(1, 0, RenderPriority::High));
        q.submit(request(1, 1, RenderPriority::High));
        q.submit(request(2, 0, RenderPriority::High));
        assert_eq!(q.queued_for_page("doc", 1), 2);
        assert_eq!(q.queued_for_page("doc", 2), 1);
        q.take_job();
        assert_eq!(q.queued_for_page("doc", 1), 1);
    }

    #[test]
    fn test_drain_completions_empties() {
        let q = SharedQueue::new(4);
        q.submit(request(1, 0, RenderPriority::High));
        let job = q.take_job().unwrap();
        q.complete(job.id, job.request, Err(RenderError::Aborted), false);
        assert_eq!(q.drain_completions().len(), 1);
        assert!(q.drain_completions().is_empty());
        assert!(q.is_idle());
    }
}
