//! Infinite-canvas PDF viewer core.
//!
//! Ties the camera, tile engine, cache, scheduler, and zoom state machine
//! together into a viewer: page elements composed from tiles or full-page
//! bitmaps, a viewport tracker that bounds live elements under memory
//! pressure, debounced scroll and zoom rerender paths, and a top-level
//! controller that consumes host input events and drives a frame loop.
//!
//! The host embeds this by constructing an
//! [`InfiniteCanvasController`] with a [`vellum_provider::PageProvider`],
//! forwarding input events, calling `update` once per frame, and applying
//! [`InfiniteCanvasController::canvas_transform`] to its canvas node.

mod controller;
mod element;
mod frame;
mod options;
mod prefetch;
mod surface;
mod tracker;

pub use controller::{
    ControllerStats, InfiniteCanvasController, InputEvent, KeyCommand, ViewerError,
};
pub use element::{PageElement, TileImage, TransformSnapshot, MIN_TILE_COVERAGE};
pub use frame::{FrameBudget, FRAME_BUDGET_120FPS, FRAME_BUDGET_60FPS};
pub use options::{DisplayMode, ViewerOptions};
pub use prefetch::{prefetch_tiles, VelocityTracker};
pub use surface::{ElementStyle, Surface};
pub use tracker::{ViewportTracker, VisibleUpdate};
