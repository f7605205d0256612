//! L1 bitmap tile cache with priority-aware eviction.
//!
//! The cache is owned by the main context and mutated only there, so it is
//! a plain struct with no interior locking; worker results are applied to
//! it when the coordinator's completions are drained.

mod l1;
mod pressure;
mod priority;

pub use l1::{CacheStats, FallbackBitmap, TileBitmapCache, TileCacheEntry};
pub use pressure::MemoryPressure;
pub use priority::{InteractionKind, PriorityContext, PriorityZone};
