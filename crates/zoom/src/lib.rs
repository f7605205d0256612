//! Zoom state machine and epoch discipline.
//!
//! Everything that makes zooming feel right lives here: gesture phase
//! detection with settling, render-mode hysteresis, trackpad rebound
//! suppression, focal-point retention, and the monotonic epoch counter
//! that lets the rest of the pipeline discard stale in-flight work.
//!
//! The machine is poll-driven: it stores deadlines and the controller
//! calls [`ZoomStateMachine::poll`] every frame with the current time, so
//! tests drive it with synthetic clocks and never sleep.

mod machine;
mod mode;

pub use machine::{
    FocalKind, GesturePhase, ZoomConfig, ZoomEvent, ZoomSnapshot, ZoomStateMachine, ZoomStats,
};
pub use mode::{decide_render_mode, RenderMode};
