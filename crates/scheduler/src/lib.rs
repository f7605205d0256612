//! Render scheduling: sessions, the render coordinator, and the worker
//! pool.
//!
//! The coordinator accepts tile and full-page render requests from the
//! main context, deduplicates identical in-flight work, enforces per-page
//! and global queue caps, and dispatches to a pool of rasterization
//! workers. Completed bitmaps come back with their scale-epoch metadata
//! attached and are drained into the tile cache by the main context at its
//! own pace.
//!
//! Cancellation has three granularities: a single request (token), a
//! session (a contiguous group of requests issued for one scroll), and
//! blanket aborts (mode transition, large zoom jump). A cancelled
//! rasterization that completes anyway still delivers its bitmap into the
//! cache (it is useful on a later pan) but its completion is marked
//! aborted so nothing draws it against a newer epoch.

mod cancel;
mod coordinator;
mod queue;
mod request;
mod session;
mod worker;

pub use cancel::CancellationToken;
pub use coordinator::{
    CoordinatorStats, RejectReason, RenderCoordinator, RequestOutcome, TileReady,
};
pub use queue::RenderCompletion;
pub use request::{
    CoordinatorConfig, RenderError, RenderPriority, RenderRequest, RenderRequestKind, RequestId,
};
pub use session::RenderSessionManager;
pub use worker::{WorkerPool, WorkerPoolConfig};
