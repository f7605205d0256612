//! Gesture phase machine, epochs, and rebound suppression.

use std::time::{Duration, Instant};

use tracing::{debug, trace};
use vellum_camera::{Camera, Point};

use crate::mode::{decide_render_mode, RenderMode};

/// Timing and mode-decision parameters.
#[derive(Debug, Clone, Copy)]
pub struct ZoomConfig {
    /// Inactivity gap that ends a gesture.
    pub gesture_end_delay: Duration,
    /// Time spent settling before the final render phase.
    pub settling_delay: Duration,
    /// Cadence of speculative progress events while settling.
    pub settling_tick: Duration,
    /// Window after a boundary-ended gesture in which opposite-direction
    /// events are treated as trackpad inertia.
    pub rebound_window: Duration,
    /// Render-mode threshold zoom.
    pub mode_threshold: f64,
    /// Multiplicative hysteresis band around the threshold.
    pub hysteresis_band: f64,
    /// Above this zoom tiling is abandoned for capped full-page renders.
    pub max_tiled_zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            gesture_end_delay: Duration::from_millis(300),
            settling_delay: Duration::from_millis(200),
            settling_tick: Duration::from_millis(50),
            rebound_window: Duration::from_millis(600),
            mode_threshold: 4.0,
            hysteresis_band: 0.1,
            max_tiled_zoom: 64.0,
            min_zoom: 0.1,
            max_zoom: 32.0,
        }
    }
}

/// Where a zoom gesture currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Idle,
    Active,
    Settling,
    Rendering,
}

/// What the focal point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocalKind {
    Zoom,
    Pan,
}

/// Immutable capture used by downstream tile math and prioritization.
///
/// Work computed from a snapshot stays consistent even when the live
/// camera moves before the work completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomSnapshot {
    pub camera: Camera,
    pub focal_point: Point,
    pub epoch: u64,
    pub render_scale: f64,
}

/// Events produced by phase transitions, returned from the entry points
/// and from [`ZoomStateMachine::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ZoomEvent {
    GestureStarted { epoch: u64 },
    SettlingProgress { elapsed_ms: u64, at_boundary: bool },
    SettlingComplete { zoom: f64 },
    ModeChanged { mode: RenderMode, epoch: u64 },
}

/// Telemetry counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoomStats {
    pub gestures: u64,
    pub rebounds_filtered: u64,
    pub epoch_bumps: u64,
    pub mode_changes: u64,
}

/// The zoom state machine.
///
/// Owned by the main context; every entry point takes `now` so the
/// controller's frame clock is the only clock.
pub struct ZoomStateMachine {
    config: ZoomConfig,
    phase: GesturePhase,
    epoch: u64,
    zoom: f64,
    mode: RenderMode,
    focal: Point,
    focal_kind: FocalKind,
    snapshot: Option<ZoomSnapshot>,
    /// Deadline for Active -> Settling.
    gesture_deadline: Option<Instant>,
    /// When settling began, for progress elapsed and the final deadline.
    settling_started: Option<Instant>,
    next_settling_tick: Option<Instant>,
    /// Set when a gesture ended pinned at max (+1) or min (-1) zoom.
    boundary_end: Option<(i8, Instant)>,
    /// Fresh gestures announced via `signal_ongoing_activity` bypass
    /// rebound suppression so the user can immediately reverse.
    fresh_gesture: bool,
    scale_version: u64,
    rendered_tiers: Vec<u32>,
    stats: ZoomStats,
}

impl ZoomStateMachine {
    pub fn new(config: ZoomConfig, initial_zoom: f64) -> Self {
        let mode = decide_render_mode(
            initial_zoom,
            RenderMode::FullPage,
            config.mode_threshold,
            config.hysteresis_band,
            config.max_tiled_zoom,
        );
        Self {
            config,
            phase: GesturePhase::Idle,
            epoch: 0,
            zoom: initial_zoom,
            mode,
            focal: Point::ZERO,
            focal_kind: FocalKind::Pan,
            snapshot: None,
            gesture_deadline: None,
            settling_started: None,
            next_settling_tick: None,
            boundary_end: None,
            fresh_gesture: false,
            scale_version: 0,
            rendered_tiers: Vec::new(),
            stats: ZoomStats::default(),
        }
    }

    pub fn config(&self) -> &ZoomConfig {
        &self.config
    }

    /// Renders may be scheduled only while idle or in the final render
    /// phase; mid-gesture work would be stale before it completed.
    pub fn can_render(&self) -> bool {
        matches!(self.phase, GesturePhase::Idle | GesturePhase::Rendering)
    }

    pub fn gesture_phase(&self) -> GesturePhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn render_mode(&self) -> RenderMode {
        self.mode
    }

    pub fn focal_point(&self) -> (Point, FocalKind) {
        (self.focal, self.focal_kind)
    }

    pub fn stats(&self) -> ZoomStats {
        self.stats
    }

    /// Record the focal point for tile prioritization and cache zoning.
    pub fn set_focal_point(&mut self, p: Point, kind: FocalKind) {
        self.focal = p;
        self.focal_kind = kind;
    }

    /// Capture an immutable snapshot of the current camera for a render
    /// phase; tile calculations use this, not the live camera.
    pub fn capture_snapshot(&mut self, camera: Camera, render_scale: f64) -> ZoomSnapshot {
        let snapshot = ZoomSnapshot {
            camera,
            focal_point: self.focal,
            epoch: self.epoch,
            render_scale,
        };
        self.snapshot = Some(snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> Option<ZoomSnapshot> {
        self.snapshot
    }

    /// Monotonic counter for progressive (multi-resolution) renders; a new
    /// version obsoletes results tagged with older ones.
    pub fn next_scale_version(&mut self) -> u64 {
        self.scale_version += 1;
        self.scale_version
    }

    pub fn scale_version(&self) -> u64 {
        self.scale_version
    }

    /// Record that a scale tier reached the screen.
    pub fn on_scale_rendered(&mut self, tier: u32) {
        if !self.rendered_tiers.contains(&tier) {
            self.rendered_tiers.push(tier);
        }
    }

    pub fn rendered_tiers(&self) -> &[u32] {
        &self.rendered_tiers
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
        self.stats.epoch_bumps += 1;
    }

    /// Explicit invalidation: display-mode, layout, or page-count change.
    /// The epoch advances so all in-flight work becomes stale.
    pub fn invalidate(&mut self) {
        self.bump_epoch();
        self.rendered_tiers.clear();
        debug!(epoch = self.epoch, "explicit invalidation");
    }

    /// Announce activity before the first measurable event of a gesture
    /// (e.g. `gesturestart`). Enters Active immediately and marks the
    /// gesture fresh, which bypasses rebound suppression.
    pub fn signal_ongoing_activity(&mut self, now: Instant) -> Vec<ZoomEvent> {
        self.fresh_gesture = true;
        self.enter_active(now)
    }

    /// Feed a zoom gesture event. Returns the transition events, or `None`
    /// when the event was suppressed as trackpad rebound (the camera must
    /// not change in that case).
    pub fn on_zoom_gesture(
        &mut self,
        new_zoom: f64,
        focal: Point,
        now: Instant,
    ) -> Option<Vec<ZoomEvent>> {
        if !new_zoom.is_finite() || new_zoom <= 0.0 {
            return None;
        }

        if !self.fresh_gesture && self.is_rebound(new_zoom, now) {
            self.stats.rebounds_filtered += 1;
            trace!(new_zoom, "suppressed rebound zoom event");
            return None;
        }

        self.set_focal_point(focal, FocalKind::Zoom);
        let events = self.enter_active(now);
        self.zoom = new_zoom;
        Some(events)
    }

    /// Would a zoom-in event right now be filtered as rebound?
    pub fn is_rebound_zoom_in(&self, window: Duration, now: Instant) -> bool {
        matches!(self.boundary_end, Some((-1, at)) if now.duration_since(at) <= window)
    }

    /// Would a zoom-out event right now be filtered as rebound?
    pub fn is_rebound_zoom_out(&self, window: Duration, now: Instant) -> bool {
        matches!(self.boundary_end, Some((1, at)) if now.duration_since(at) <= window)
    }

    fn is_rebound(&self, new_zoom: f64, now: Instant) -> bool {
        let zooming_in = new_zoom > self.zoom;
        (zooming_in && self.is_rebound_zoom_in(self.config.rebound_window, now))
            || (!zooming_in && self.is_rebound_zoom_out(self.config.rebound_window, now))
    }

    fn enter_active(&mut self, now: Instant) -> Vec<ZoomEvent> {
        let mut events = Vec::new();
        if self.phase != GesturePhase::Active {
            // Any phase (including an in-flight render) yields to a new
            // gesture; the epoch bump strands the superseded work.
            self.phase = GesturePhase::Active;
            self.bump_epoch();
            self.stats.gestures += 1;
            self.settling_started = None;
            self.next_settling_tick = None;
            events.push(ZoomEvent::GestureStarted { epoch: self.epoch });
        }
        self.gesture_deadline = Some(now + self.config.gesture_end_delay);
        events
    }

    /// Advance timers. Call once per frame.
    pub fn poll(&mut self, now: Instant) -> Vec<ZoomEvent> {
        let mut events = Vec::new();
        match self.phase {
            GesturePhase::Active => {
                if self.gesture_deadline.is_some_and(|d| now >= d) {
                    self.end_gesture(now, &mut events);
                }
            }
            GesturePhase::Settling => {
                let started = self.settling_started.expect("settling has a start");
                if now.duration_since(started) >= self.config.settling_delay {
                    self.phase = GesturePhase::Rendering;
                    self.next_settling_tick = None;
                    events.push(ZoomEvent::SettlingComplete { zoom: self.zoom });
                } else if self.next_settling_tick.is_some_and(|t| now >= t) {
                    self.next_settling_tick = Some(now + self.config.settling_tick);
                    events.push(ZoomEvent::SettlingProgress {
                        elapsed_ms: now.duration_since(started).as_millis() as u64,
                        at_boundary: self.at_zoom_boundary(),
                    });
                }
            }
            GesturePhase::Idle | GesturePhase::Rendering => {}
        }
        events
    }

    /// The final render finished; the machine returns to idle.
    pub fn complete_render_phase(&mut self) {
        if self.phase == GesturePhase::Rendering {
            self.phase = GesturePhase::Idle;
        }
    }

    /// Adopt the camera's zoom outside of a gesture (keyboard zoom,
    /// fit-to-width, programmatic navigation). Re-decides the render mode
    /// immediately since no gesture commitment is in force.
    pub fn sync_from_camera(&mut self, camera: Camera) {
        if !camera.is_valid() {
            return;
        }
        self.zoom = camera.z;
        if self.phase == GesturePhase::Idle {
            self.redecide_mode();
        }
    }

    fn at_zoom_boundary(&self) -> bool {
        self.zoom >= self.config.max_zoom || self.zoom <= self.config.min_zoom
    }

    fn end_gesture(&mut self, now: Instant, events: &mut Vec<ZoomEvent>) {
        self.phase = GesturePhase::Settling;
        self.settling_started = Some(now);
        self.next_settling_tick = Some(now + self.config.settling_tick);
        self.gesture_deadline = None;
        self.fresh_gesture = false;

        // Rebound suppression arms when the gesture ends pinned at a
        // zoom boundary.
        self.boundary_end = if self.zoom >= self.config.max_zoom {
            Some((1, now))
        } else if self.zoom <= self.config.min_zoom {
            Some((-1, now))
        } else {
            None
        };

        // The mode committed at gesture start is reconsidered only now.
        if let Some(event) = self.redecide_mode() {
            events.push(event);
        }
    }

    fn redecide_mode(&mut self) -> Option<ZoomEvent> {
        let next = decide_render_mode(
            self.zoom,
            self.mode,
            self.config.mode_threshold,
            self.config.hysteresis_band,
            self.config.max_tiled_zoom,
        );
        if next != self.mode {
            self.mode = next;
            self.bump_epoch();
            self.stats.mode_changes += 1;
            debug!(?next, epoch = self.epoch, "render mode changed");
            return Some(ZoomEvent::ModeChanged {
                mode: next,
                epoch: self.epoch,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ZoomStateMachine {
        ZoomStateMachine::new(ZoomConfig::default(), 1.0)
    }

    fn t0() -> Instant {
        Instant::now()
    }

    #[test]
    fn test_initial_state() {
        let m = machine();
        assert_eq!(m.gesture_phase(), GesturePhase::Idle);
        assert_eq!(m.epoch(), 0);
        assert!(m.can_render());
        assert_eq!(m.render_mode(), RenderMode::FullPage);
    }

    #[test]
    fn test_gesture_enters_active_and_bumps_epoch() {
        let mut m = machine();
        let now = t0();
        let events = m.on_zoom_gesture(1.2, Point::new(10.0, 10.0), now).unwrap();
        assert_eq!(events, vec![ZoomEvent::GestureStarted { epoch: 1 }]);
        assert_eq!(m.gesture_phase(), GesturePhase::Active);
        assert!(!m.can_render());
        assert_eq!(m.zoom(), 1.2);

        // Further events while active do not bump the epoch again.
        let events = m.on_zoom_gesture(1.4, Point::new(10.0, 10.0), now).unwrap();
        assert!(events.is_empty());
        assert_eq!(m.epoch(), 1);
    }

    #[test]
    fn test_full_phase_lifecycle() {
        let mut m = machine();
        let now = t0();
        m.on_zoom_gesture(2.0, Point::ZERO, now).unwrap();

        // Nothing fires before the inactivity gap.
        assert!(m.poll(now + Duration::from_millis(100)).is_empty());
        assert_eq!(m.gesture_phase(), GesturePhase::Active);

        // Gap elapses: settling.
        m.poll(now + Duration::from_millis(301));
        assert_eq!(m.gesture_phase(), GesturePhase::Settling);

        // Speculative progress ticks fire during settling.
        let events = m.poll(now + Duration::from_millis(360));
        assert!(matches!(
            events.as_slice(),
            [ZoomEvent::SettlingProgress { .. }]
        ));

        // Settling completes into the render phase.
        let events = m.poll(now + Duration::from_millis(510));
        assert_eq!(events, vec![ZoomEvent::SettlingComplete { zoom: 2.0 }]);
        assert_eq!(m.gesture_phase(), GesturePhase::Rendering);
        assert!(m.can_render());

        m.complete_render_phase();
        assert_eq!(m.gesture_phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_event_during_settling_restarts_gesture() {
        let mut m = machine();
        let now = t0();
        m.on_zoom_gesture(2.0, Point::ZERO, now).unwrap();
        m.poll(now + Duration::from_millis(301));
        assert_eq!(m.gesture_phase(), GesturePhase::Settling);

        let events = m
            .on_zoom_gesture(2.5, Point::ZERO, now + Duration::from_millis(320))
            .unwrap();
        assert!(matches!(events.as_slice(), [ZoomEvent::GestureStarted { .. }]));
        assert_eq!(m.gesture_phase(), GesturePhase::Active);
    }

    #[test]
    fn test_mode_transition_deferred_to_gesture_end() {
        let mut m = machine();
        let now = t0();
        // Zoom straight past the tiled threshold mid-gesture.
        m.on_zoom_gesture(8.0, Point::ZERO, now).unwrap();
        assert_eq!(m.render_mode(), RenderMode::FullPage); // still committed

        let events = m.poll(now + Duration::from_millis(301));
        assert!(events.contains(&ZoomEvent::ModeChanged {
            mode: RenderMode::Tiled,
            epoch: 2,
        }));
        assert_eq!(m.render_mode(), RenderMode::Tiled);
    }

    #[test]
    fn test_rebound_suppression_at_max_zoom() {
        let mut m = machine();
        let now = t0();
        m.on_zoom_gesture(32.0, Point::ZERO, now).unwrap();
        m.poll(now + Duration::from_millis(301)); // gesture ends at max zoom

        // An opposite-direction event inside the window is filtered.
        let filtered = m.on_zoom_gesture(30.0, Point::ZERO, now + Duration::from_millis(400));
        assert!(filtered.is_none());
        assert_eq!(m.zoom(), 32.0);
        assert_eq!(m.stats().rebounds_filtered, 1);
        assert!(m.is_rebound_zoom_out(Duration::from_millis(600), now + Duration::from_millis(400)));

        // After the window the same event works.
        let ok = m.on_zoom_gesture(30.0, Point::ZERO, now + Duration::from_millis(1000));
        assert!(ok.is_some());
        assert_eq!(m.zoom(), 30.0);
    }

    #[test]
    fn test_fresh_gesture_bypasses_rebound() {
        let mut m = machine();
        let now = t0();
        m.on_zoom_gesture(32.0, Point::ZERO, now).unwrap();
        m.poll(now + Duration::from_millis(301));
        m.poll(now + Duration::from_millis(550)); // settling complete
        m.complete_render_phase();

        // A deliberate new gesture announces itself first, still inside
        // the rebound window.
        m.signal_ongoing_activity(now + Duration::from_millis(600));
        let ok = m.on_zoom_gesture(30.0, Point::ZERO, now + Duration::from_millis(610));
        assert!(ok.is_some());
        assert_eq!(m.zoom(), 30.0);
        assert_eq!(m.stats().rebounds_filtered, 0);
    }

    #[test]
    fn test_invalid_zoom_dropped() {
        let mut m = machine();
        assert!(m.on_zoom_gesture(f64::NAN, Point::ZERO, t0()).is_none());
        assert!(m.on_zoom_gesture(0.0, Point::ZERO, t0()).is_none());
        assert_eq!(m.epoch(), 0);
    }

    #[test]
    fn test_invalidate_bumps_epoch_monotonically() {
        let mut m = machine();
        let mut last = m.epoch();
        for _ in 0..5 {
            m.invalidate();
            assert!(m.epoch() > last);
            last = m.epoch();
        }
    }

    #[test]
    fn test_snapshot_captures_epoch_and_focal() {
        let mut m = machine();
        m.set_focal_point(Point::new(5.0, 6.0), FocalKind::Zoom);
        m.invalidate();
        let snap = m.capture_snapshot(Camera::new(1.0, 2.0, 3.0), 4.0);
        assert_eq!(snap.epoch, 1);
        assert_eq!(snap.focal_point, Point::new(5.0, 6.0));
        assert_eq!(snap.render_scale, 4.0);
        assert_eq!(m.snapshot(), Some(snap));
    }

    #[test]
    fn test_sync_from_camera_redecides_when_idle() {
        let mut m = machine();
        m.sync_from_camera(Camera::new(0.0, 0.0, 8.0));
        assert_eq!(m.render_mode(), RenderMode::Tiled);
        assert_eq!(m.zoom(), 8.0);
        m.sync_from_camera(Camera::new(0.0, 0.0, f64::NAN));
        assert_eq!(m.zoom(), 8.0);
    }

    #[test]
    fn test_scale_version_monotonic() {
        let mut m = machine();
        assert_eq!(m.next_scale_version(), 1);
        assert_eq!(m.next_scale_version(), 2);
        assert_eq!(m.scale_version(), 2);
    }

    #[test]
    fn test_rendered_tiers_deduplicate() {
        let mut m = machine();
        m.on_scale_rendered(4);
        m.on_scale_rendered(4);
        m.on_scale_rendered(8);
        assert_eq!(m.rendered_tiers(), &[4, 8]);
    }

    #[test]
    fn test_settling_progress_reports_boundary() {
        let mut m = machine();
        let now = t0();
        m.on_zoom_gesture(32.0, Point::ZERO, now).unwrap();
        m.poll(now + Duration::from_millis(301));
        let events = m.poll(now + Duration::from_millis(360));
        assert!(matches!(
            events.as_slice(),
            [ZoomEvent::SettlingProgress { at_boundary: true, .. }]
        ));
    }
}
