//! Rasterization worker pool.
//!
//! Workers pull jobs from the shared queue, rasterize through the page
//! provider, decode the returned blob into an RGBA bitmap, and push a
//! completion. They hold no long-lived state of their own; all
//! communication is through the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};
use vellum_provider::{decode_blob, PageImageOptions, PageProvider, TileRenderSpec};

use crate::queue::SharedQueue;
use crate::request::{RenderError, RenderRequestKind};

/// Worker pool sizing and polling.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads. Defaults to twice the logical core
    /// count, capped at 12.
    pub num_workers: usize,
    /// How long an idle worker sleeps before re-checking the queue.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            num_workers: (cores * 2).min(12),
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }
}

/// Pool of rasterization/decoding threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub(crate) fn start(
        config: WorkerPoolConfig,
        queue: Arc<SharedQueue>,
        provider: Arc<dyn PageProvider>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = (0..config.num_workers.max(1))
            .map(|index| {
                let queue = Arc::clone(&queue);
                let provider = Arc::clone(&provider);
                let shutdown = Arc::clone(&shutdown);
                let poll_interval = config.poll_interval;
                thread::Builder::new()
                    .name(format!("vellum-render-{index}"))
                    .spawn(move || worker_loop(queue, provider, shutdown, poll_interval))
                    .expect("spawn render worker")
            })
            .collect();
        Self { handles, shutdown }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop all workers and wait for them to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    queue: Arc<SharedQueue>,
    provider: Arc<dyn PageProvider>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::Acquire) {
        let Some(job) = queue.take_job() else {
            thread::sleep(poll_interval);
            continue;
        };

        // A request cancelled before dispatch is not rasterized at all.
        if job.token.is_cancelled() {
            trace!(id = job.id, "skipping cancelled job");
            queue.complete(job.id, job.request, Err(RenderError::Aborted), true);
            continue;
        }

        let result = execute(&*provider, &job.request.kind, job.request.exact_scale);
        // Cancelled mid-render: the bitmap still lands in the completion
        // (and from there the cache), flagged aborted.
        let aborted = job.token.is_cancelled();
        match result {
            Ok(bitmap) => queue.complete(job.id, job.request, Ok(bitmap), aborted),
            Err(error) => {
                debug!(id = job.id, %error, "render failed");
                queue.complete(job.id, job.request, Err(error), aborted);
            }
        }
    }
}

fn execute(
    provider: &dyn PageProvider,
    kind: &RenderRequestKind,
    exact_scale: Option<f64>,
) -> Result<vellum_provider::SharedBitmap, RenderError> {
    let blob = match kind {
        RenderRequestKind::Tile(tile) => {
            let (page_w, page_h) = provider.page_size(tile.page)?;
            let rect = tile.page_rect(page_w, page_h);
            let scale = exact_scale.unwrap_or(tile.scale as f64);
            let (px, py) = tile.pixel_size(page_w, page_h);
            provider.render_tile(&TileRenderSpec {
                page: tile.page,
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                scale,
                pixel_width: px,
                pixel_height: py,
            })?
        }
        RenderRequestKind::FullPage { page, scale } => provider.page_image(
            *page,
            &PageImageOptions {
                scale: *scale,
                dpi: 96.0,
            },
        )?,
    };
    Ok(Arc::new(decode_blob(&blob)?))
}
