//! The infinite-canvas controller.
//!
//! Top-level coordinator: turns input events into camera updates, drives
//! the zoom state machine, recomputes visibility, schedules renders
//! through the coordinator, and applies finished bitmaps to page
//! elements. The host calls [`InfiniteCanvasController::handle_event`]
//! for each input event and [`InfiniteCanvasController::update`] once per
//! frame.
//!
//! Data flows one way: input event -> camera -> zoom machine (phase,
//! epoch, mode) -> viewport tracker (visible set) -> render coordinator ->
//! workers -> tile cache -> page element composition. Every downstream
//! stage carries the epoch it was created under and stale work is
//! discarded at consumption time, not at creation time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use vellum_cache::{InteractionKind, PriorityContext, TileBitmapCache};
use vellum_camera::{
    camera_transform, constrain, content_to_screen, fit_page_zoom, fit_width_zoom, pan_camera,
    transform_matches_camera, visible_content_rect, zoom_camera_to_point, Camera, CoordinateSpace,
    Point, Rect, ZoomConstraints,
};
use vellum_provider::{PageImageOptions, PageProvider, ProviderError};
use vellum_scheduler::{
    CoordinatorConfig, RenderCoordinator, RenderPriority, RenderRequest, RenderRequestKind,
    RequestOutcome, TileReady, WorkerPoolConfig,
};
use vellum_tiles::{
    place_pages, target_scale_tier, tile_size_for_zoom, visible_tiles, LayoutGrid, PageLayout,
    TileCoordinate,
};
use vellum_zoom::{
    FocalKind, GesturePhase, RenderMode, ZoomConfig, ZoomEvent, ZoomStateMachine,
};

use crate::element::{TileImage, TransformSnapshot};
use crate::frame::FrameBudget;
use crate::options::{DisplayMode, ViewerOptions};
use crate::prefetch::{prefetch_tiles, VelocityTracker};
use crate::tracker::ViewportTracker;

/// Debounce for the scroll rerender path (one frame at 30 Hz).
const SCROLL_DEBOUNCE: Duration = Duration::from_millis(32);

/// Wheel delta to zoom-delta conversion.
const WHEEL_ZOOM_FACTOR: f64 = 0.01;

/// Keyboard zoom step.
const KEY_ZOOM_STEP: f64 = 0.25;

/// Arrow-key pan distance in screen pixels.
const KEY_PAN_STEP: f64 = 50.0;

/// Above this zoom the full-page intermediate is skipped when entering
/// tiled mode; its capped scale would be softer than the tiles it delays.
const DIRECT_TILED_ZOOM: f64 = 8.0;

/// Full-page render scale cap.
const MAX_FULL_PAGE_SCALE: f64 = 4.0;

/// Completions always applied per frame before the frame budget can
/// defer the rest, so progress survives arbitrarily slow frames.
const MIN_COMPLETIONS_PER_FRAME: usize = 8;

/// Host input events, in CSS pixels relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerDown { x: f64, y: f64 },
    PointerMove { x: f64, y: f64 },
    PointerUp,
    PointerCancel,
    Wheel { delta_x: f64, delta_y: f64, ctrl: bool, x: f64, y: f64 },
    GestureStart,
    GestureChange { scale: f64, x: f64, y: f64 },
    GestureEnd,
    DoubleClick { x: f64, y: f64 },
    Key(KeyCommand),
    Resize { width: f64, height: f64 },
}

/// Keyboard bindings (Ctrl/Cmd +/-/0, arrows, page keys) resolved to
/// commands by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    ZoomIn,
    ZoomOut,
    ZoomReset,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
    PageUp,
    PageDown,
}

/// Controller-level counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerStats {
    pub scroll_renders: u64,
    pub zoom_renders: u64,
    pub speculative_renders: u64,
    pub blank_page_rerenders: u64,
    pub coherence_violations: u64,
    pub invalid_events_dropped: u64,
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("document has no pages")]
    EmptyDocument,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Top-level infinite-canvas viewer core.
pub struct InfiniteCanvasController {
    options: ViewerOptions,
    space: CoordinateSpace,
    provider: Arc<dyn PageProvider>,
    document_id: String,

    camera: Camera,
    constraints: ZoomConstraints,
    viewport_w: f64,
    viewport_h: f64,

    zoom_machine: ZoomStateMachine,
    coordinator: RenderCoordinator,
    cache: TileBitmapCache,
    tracker: ViewportTracker,

    layouts: Vec<PageLayout>,
    grid: LayoutGrid,
    content_bounds: Rect,

    pointer: Option<Point>,
    pinch_last_scale: f64,
    /// Direction of the in-progress zoom gesture, for cache zoning.
    zooming_in: bool,
    velocity: VelocityTracker,

    scroll_dirty: bool,
    last_scroll_event: Option<Instant>,
    /// Set when the settling-complete render was issued; cleared (and the
    /// machine returned to idle) once the queue drains.
    final_render_pending: bool,
    /// Wanted tiles per page for the current composite, for recomposition
    /// on tile arrival.
    wanted_tiles: HashMap<u32, Vec<TileCoordinate>>,
    snapshots: HashMap<u32, TransformSnapshot>,
    render_params_counter: u64,
    last_visible: Vec<u32>,
    /// Completions deferred by the frame budget, applied next frame.
    deferred_ready: Vec<TileReady>,

    stats: ControllerStats,
}

impl InfiniteCanvasController {
    /// Mount the viewer: read page dimensions, place the layout, fit the
    /// initial camera, and start the worker pool.
    pub fn new(
        provider: Arc<dyn PageProvider>,
        options: ViewerOptions,
        viewport_w: f64,
        viewport_h: f64,
    ) -> Result<Self, ViewerError> {
        let page_count = provider.page_count();
        if page_count == 0 {
            return Err(ViewerError::EmptyDocument);
        }
        let mut sizes = Vec::with_capacity(page_count as usize);
        for page in 1..=page_count {
            sizes.push(provider.page_size(page)?);
        }
        let (layouts, grid) = place_pages(
            &sizes,
            options.display_mode.layout_mode(page_count),
            options.page_gap,
        );
        let content_bounds = content_bounds_of(&layouts);

        let space = if options.use_unified_coordinate_space {
            CoordinateSpace::Unified
        } else {
            CoordinateSpace::Legacy
        };
        let constraints = ZoomConstraints::new(options.min_zoom, options.max_zoom);

        let zoom = initial_zoom(&options, &layouts[0], viewport_w, viewport_h, constraints);
        let camera = initial_camera(&layouts[0], zoom, viewport_w, viewport_h, space);

        let zoom_config = ZoomConfig {
            min_zoom: options.min_zoom,
            max_zoom: options.max_zoom,
            ..ZoomConfig::default()
        };
        let coordinator = RenderCoordinator::start(
            Arc::clone(&provider),
            CoordinatorConfig::default(),
            WorkerPoolConfig::default(),
        );
        let document_id = coordinator.document_id().to_string();

        let mut controller = Self {
            cache: TileBitmapCache::with_mb_budget(options.cache_budget_mb),
            zoom_machine: ZoomStateMachine::new(zoom_config, zoom),
            tracker: ViewportTracker::new(),
            provider,
            document_id,
            camera,
            constraints,
            viewport_w,
            viewport_h,
            space,
            layouts,
            grid,
            content_bounds,
            pointer: None,
            pinch_last_scale: 1.0,
            zooming_in: false,
            velocity: VelocityTracker::new(),
            scroll_dirty: true,
            last_scroll_event: None,
            final_render_pending: false,
            wanted_tiles: HashMap::new(),
            snapshots: HashMap::new(),
            render_params_counter: 0,
            last_visible: Vec::new(),
            deferred_ready: Vec::new(),
            stats: ControllerStats::default(),
            coordinator,
            options,
        };
        controller.first_paint();
        Ok(controller)
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn zoom(&self) -> f64 {
        self.camera.z
    }

    pub fn gesture_phase(&self) -> GesturePhase {
        self.zoom_machine.gesture_phase()
    }

    pub fn epoch(&self) -> u64 {
        self.zoom_machine.epoch()
    }

    pub fn render_mode(&self) -> RenderMode {
        self.zoom_machine.render_mode()
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    pub fn zoom_stats(&self) -> vellum_zoom::ZoomStats {
        self.zoom_machine.stats()
    }

    pub fn coordinator(&self) -> &RenderCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &TileBitmapCache {
        &self.cache
    }

    pub fn tracker(&self) -> &ViewportTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ViewportTracker {
        &mut self.tracker
    }

    pub fn layouts(&self) -> &[PageLayout] {
        &self.layouts
    }

    pub fn visible_pages(&self) -> &[u32] {
        &self.last_visible
    }

    /// The CSS transform the host should apply for the current camera.
    /// Checked for coherence against the camera; violations are logged and
    /// counted, never fatal.
    pub fn canvas_transform(&mut self) -> String {
        let transform = camera_transform(self.camera, self.space);
        if !transform_matches_camera(&transform, self.camera, self.space) {
            self.stats.coherence_violations += 1;
        }
        transform
    }

    /// Dual-resolution first paint: ask the provider for whatever it has
    /// for page 1 right now, then let the normal pipeline upgrade it.
    fn first_paint(&mut self) {
        let scale = (self.camera.z * self.options.device_pixel_ratio).min(MAX_FULL_PAGE_SCALE);
        let dual = self.provider.page_image_dual_res(
            1,
            &PageImageOptions {
                scale,
                dpi: 96.0,
            },
        );
        let Ok(dual) = dual else { return };
        let Ok(bitmap) = vellum_provider::decode_blob(&dual.initial) else {
            return;
        };
        let zoom = self.camera.z;
        let unified = self.space == CoordinateSpace::Unified;
        let layout = self.layouts[0];
        if self.tracker.element(1).is_none() {
            // Element creation normally happens in the visibility update;
            // run one early so page 1 has somewhere to paint.
            let rect = self.visible_rect();
            let update = self.tracker.update_visible_pages(
                rect,
                &self.layouts,
                &self.grid,
                zoom,
                self.options.use_adaptive_tile_size,
            );
            self.last_visible = update.visible;
        }
        if let Some(element) = self.tracker.element_mut(1) {
            element.set_final_dimensions(layout.width, layout.height, zoom, unified);
            element.render_full_page(&bitmap, 0);
        }
    }

    fn visible_rect(&self) -> Rect {
        visible_content_rect(self.camera, self.viewport_w, self.viewport_h, self.space)
    }

    fn pdf_to_element_scale(&self) -> f64 {
        if self.space == CoordinateSpace::Unified {
            self.camera.z
        } else {
            1.0
        }
    }

    // ---- input ---------------------------------------------------------

    /// Feed one host input event.
    pub fn handle_event(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::PointerDown { x, y } => {
                self.pointer = Some(Point::new(x, y));
                self.velocity.reset();
            }
            InputEvent::PointerMove { x, y } => {
                if let Some(prev) = self.pointer {
                    let dx = x - prev.x;
                    let dy = y - prev.y;
                    self.pointer = Some(Point::new(x, y));
                    self.pan_by(dx, dy, true, now);
                }
            }
            InputEvent::PointerUp | InputEvent::PointerCancel => {
                if self.pointer.take().is_some() {
                    // Hard constraint applies at gesture end.
                    self.camera = constrain(
                        self.camera,
                        self.content_bounds,
                        self.viewport_w,
                        self.viewport_h,
                        false,
                        self.space,
                    );
                    self.mark_scroll_dirty(now);
                }
            }
            InputEvent::Wheel { delta_x, delta_y, ctrl, x, y } => {
                if !delta_x.is_finite() || !delta_y.is_finite() {
                    self.stats.invalid_events_dropped += 1;
                    return;
                }
                if ctrl {
                    self.zoom_gesture(delta_y * WHEEL_ZOOM_FACTOR, Point::new(x, y), now);
                } else {
                    self.pan_by(-delta_x, -delta_y, false, now);
                }
            }
            InputEvent::GestureStart => {
                self.pinch_last_scale = 1.0;
                for event in self.zoom_machine.signal_ongoing_activity(now) {
                    self.apply_zoom_event(event);
                }
            }
            InputEvent::GestureChange { scale, x, y } => {
                if !scale.is_finite() || scale <= 0.0 {
                    self.stats.invalid_events_dropped += 1;
                    return;
                }
                let ratio = scale / self.pinch_last_scale;
                self.pinch_last_scale = scale;
                self.zoom_gesture(1.0 - ratio, Point::new(x, y), now);
            }
            InputEvent::GestureEnd => {
                self.pinch_last_scale = 1.0;
            }
            InputEvent::DoubleClick { x, y } => {
                let focal = Point::new(x, y);
                let target = if self.camera.z < self.zoom_machine.config().mode_threshold {
                    self.zoom_machine.config().mode_threshold * 2.0
                } else {
                    initial_zoom(
                        &self.options,
                        &self.layouts[0],
                        self.viewport_w,
                        self.viewport_h,
                        self.constraints,
                    )
                };
                let delta = 1.0 - target / self.camera.z;
                self.programmatic_zoom(delta, focal, now);
            }
            InputEvent::Key(command) => self.handle_key(command, now),
            InputEvent::Resize { width, height } => {
                if width <= 0.0 || height <= 0.0 {
                    self.stats.invalid_events_dropped += 1;
                    return;
                }
                self.viewport_w = width;
                self.viewport_h = height;
                self.mark_scroll_dirty(now);
            }
        }
    }

    fn handle_key(&mut self, command: KeyCommand, now: Instant) {
        let center = Point::new(self.viewport_w / 2.0, self.viewport_h / 2.0);
        match command {
            KeyCommand::ZoomIn => self.programmatic_zoom(-KEY_ZOOM_STEP, center, now),
            KeyCommand::ZoomOut => self.programmatic_zoom(KEY_ZOOM_STEP, center, now),
            KeyCommand::ZoomReset => {
                let target = initial_zoom(
                    &self.options,
                    &self.layouts[0],
                    self.viewport_w,
                    self.viewport_h,
                    self.constraints,
                );
                let delta = 1.0 - target / self.camera.z;
                self.programmatic_zoom(delta, center, now);
            }
            KeyCommand::ScrollUp => self.pan_by(0.0, KEY_PAN_STEP, false, now),
            KeyCommand::ScrollDown => self.pan_by(0.0, -KEY_PAN_STEP, false, now),
            KeyCommand::ScrollLeft => self.pan_by(KEY_PAN_STEP, 0.0, false, now),
            KeyCommand::ScrollRight => self.pan_by(-KEY_PAN_STEP, 0.0, false, now),
            KeyCommand::PageUp => self.pan_by(0.0, self.viewport_h, false, now),
            KeyCommand::PageDown => self.pan_by(0.0, -self.viewport_h, false, now),
        }
    }

    fn pan_by(&mut self, dx: f64, dy: f64, in_gesture: bool, now: Instant) {
        if !self.camera.is_valid() {
            self.stats.invalid_events_dropped += 1;
            return;
        }
        let before = self.visible_rect();
        self.camera = pan_camera(self.camera, dx, dy, self.space);
        if self.options.display_mode.constrains_pan() {
            self.camera = constrain(
                self.camera,
                self.content_bounds,
                self.viewport_w,
                self.viewport_h,
                in_gesture,
                self.space,
            );
        }
        let after = self.visible_rect();

        self.velocity.sample(Point::new(after.x, after.y), now);
        self.zoom_machine
            .set_focal_point(Point::new(after.x + after.width / 2.0, after.y + after.height / 2.0), FocalKind::Pan);

        // Queue-clearing rule, pan half, in content units.
        let moved_x = after.x - before.x;
        let moved_y = after.y - before.y;
        self.coordinator.note_pan(
            moved_x,
            moved_y,
            after.width.min(after.height),
            self.camera.z,
        );
        self.mark_scroll_dirty(now);
    }

    fn zoom_gesture(&mut self, delta: f64, focal: Point, now: Instant) {
        if !delta.is_finite() {
            self.stats.invalid_events_dropped += 1;
            return;
        }
        let candidate = self
            .constraints
            .clamp(self.camera.z * (1.0 - delta));
        self.zooming_in = candidate > self.camera.z;
        let Some(events) = self.zoom_machine.on_zoom_gesture(candidate, focal, now) else {
            // Suppressed rebound: camera untouched.
            return;
        };
        let old_zoom = self.camera.z;
        self.camera =
            zoom_camera_to_point(self.camera, focal, delta, self.constraints, self.space);
        // Soft rubber-band only during gestures; no centering here.
        if self.options.display_mode.constrains_pan() {
            self.camera = constrain(
                self.camera,
                self.content_bounds,
                self.viewport_w,
                self.viewport_h,
                true,
                self.space,
            );
        }
        self.coordinator.note_zoom_change(old_zoom, self.camera.z);
        for event in events {
            self.apply_zoom_event(event);
        }
    }

    fn programmatic_zoom(&mut self, delta: f64, focal: Point, now: Instant) {
        let old_zoom = self.camera.z;
        self.camera =
            zoom_camera_to_point(self.camera, focal, delta, self.constraints, self.space);
        if self.options.display_mode.constrains_pan() {
            self.camera = constrain(
                self.camera,
                self.content_bounds,
                self.viewport_w,
                self.viewport_h,
                false,
                self.space,
            );
        }
        // The queue-clearing rule applies to keyboard and double-click
        // zooms the same as to gestures; a reset from deep zoom strands
        // everything pending.
        self.coordinator.note_zoom_change(old_zoom, self.camera.z);
        self.zoom_machine.sync_from_camera(self.camera);
        self.mark_scroll_dirty(now);
    }

    fn mark_scroll_dirty(&mut self, now: Instant) {
        self.scroll_dirty = true;
        self.last_scroll_event = Some(now);
    }

    // ---- frame driving -------------------------------------------------

    /// Advance one frame: poll the zoom machine, run the debounced scroll
    /// path, drain completions, and apply them to elements.
    pub fn update(&mut self, now: Instant) {
        for event in self.zoom_machine.poll(now) {
            self.apply_zoom_event(event);
        }

        if self.scroll_dirty
            && self.zoom_machine.can_render()
            && self
                .last_scroll_event
                .map_or(true, |at| now.duration_since(at) >= SCROLL_DEBOUNCE)
        {
            self.scroll_dirty = false;
            self.run_scroll_render();
        }

        self.apply_completions(FrameBudget::for_60fps(now));

        if self.final_render_pending && self.coordinator.is_idle() {
            self.final_render_pending = false;
            let tier = target_scale_tier(
                self.camera.z,
                self.options.device_pixel_ratio,
                self.current_tile_size(),
            )
            .tier;
            self.zoom_machine.on_scale_rendered(tier);
            self.zoom_machine.complete_render_phase();
            self.run_blank_sweep();
        }
    }

    fn apply_zoom_event(&mut self, event: ZoomEvent) {
        match event {
            ZoomEvent::GestureStarted { epoch } => {
                debug!(epoch, "zoom gesture started");
                self.coordinator.set_gesture_active(true);
                self.provider.suspend_thumbnail_generation();
                self.install_priority_context();
            }
            ZoomEvent::SettlingProgress { .. } => {
                if self.options.use_multi_res_zoom {
                    self.stats.speculative_renders += 1;
                    let _version = self.zoom_machine.next_scale_version();
                    self.schedule_renders(RenderPriority::High, true);
                }
            }
            ZoomEvent::SettlingComplete { zoom } => {
                debug!(zoom, "settling complete, final render");
                self.coordinator.set_gesture_active(false);
                self.provider.resume_thumbnail_generation();
                self.stats.zoom_renders += 1;
                // Reissue criticals parked during the gesture.
                let retries = self.coordinator.take_retry_requests();
                for request in retries {
                    let zoom = self.camera.z;
                    let dpr = self.options.device_pixel_ratio;
                    let _ = self
                        .coordinator
                        .request(request, &mut self.cache, zoom, dpr);
                }
                self.install_priority_context();
                self.schedule_renders(RenderPriority::Critical, false);
                self.final_render_pending = true;
            }
            ZoomEvent::ModeChanged { mode, epoch } => {
                debug!(?mode, epoch, "render mode transition");
                self.begin_mode_transition(mode);
            }
        }
    }

    fn install_priority_context(&mut self) {
        let (focal, kind) = self.zoom_machine.focal_point();
        let visible = self.visible_span();
        let interaction = match kind {
            FocalKind::Pan => InteractionKind::Pan,
            FocalKind::Zoom => {
                if self.zooming_in {
                    InteractionKind::ZoomIn
                } else {
                    InteractionKind::ZoomOut
                }
            }
        };
        // The focal point arrives in screen coordinates for zoom; convert
        // to content space for radial distance math.
        let focal_content = match kind {
            FocalKind::Zoom => {
                vellum_camera::screen_to_content(self.camera, focal, self.space)
            }
            FocalKind::Pan => focal,
        };
        self.cache.set_priority_context(PriorityContext {
            kind: interaction,
            focal: focal_content,
            visible_pages: visible,
            layouts: self.layouts.clone(),
            focal_radius: (self.current_tile_size() as f64) * 2.0,
        });
    }

    fn visible_span(&self) -> (u32, u32) {
        match (self.last_visible.first(), self.last_visible.last()) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => (1, 1),
        }
    }

    fn current_tile_size(&self) -> u32 {
        tile_size_for_zoom(self.camera.z, self.options.use_adaptive_tile_size)
    }

    /// The scroll rerender path: snapshot the camera, open a session,
    /// retire stale ones, and queue renders for the visible set.
    fn run_scroll_render(&mut self) {
        self.stats.scroll_renders += 1;
        let tier = target_scale_tier(
            self.camera.z,
            self.options.device_pixel_ratio,
            self.current_tile_size(),
        );
        self.coordinator.begin_session();
        self.coordinator.abort_stale_sessions(2, tier.tier);
        self.install_priority_context();
        self.schedule_renders(RenderPriority::High, false);

        // Warm tiles ahead of the pan.
        let velocity = self.velocity.velocity();
        if self.render_mode() == RenderMode::Tiled {
            let tiles = prefetch_tiles(
                self.visible_rect(),
                velocity,
                &self.layouts,
                self.camera.z,
                tier.tier,
                self.current_tile_size(),
            );
            for tile in tiles {
                self.request_tile(tile, RenderPriority::Low);
            }
        }
    }

    /// Recompute visibility and queue the renders the current mode needs.
    fn schedule_renders(&mut self, base_priority: RenderPriority, speculative: bool) {
        let rect = self.visible_rect();
        if rect.is_empty() {
            warn!("zero viewport, skipping visibility update");
            return;
        }
        let zoom = self.camera.z;
        let unified = self.space == CoordinateSpace::Unified;
        let update = self.tracker.update_visible_pages(
            rect,
            &self.layouts,
            &self.grid,
            zoom,
            self.options.use_adaptive_tile_size,
        );
        self.last_visible = update.visible.clone();

        for &page in &update.created {
            let layout = self.layouts[(page - 1) as usize];
            if let Some(element) = self.tracker.element_mut(page) {
                element.set_final_dimensions(layout.width, layout.height, zoom, unified);
            }
        }

        // Providers without tile support force full-page rendering
        // regardless of the mode decision.
        let mode = if self.provider.is_tile_rendering_available() {
            self.zoom_machine.render_mode()
        } else {
            RenderMode::FullPage
        };
        match mode {
            RenderMode::Tiled => self.schedule_tiled(&update.to_render, base_priority, speculative),
            RenderMode::FullPage | RenderMode::Adaptive => {
                self.schedule_full_pages(&update.to_render, base_priority)
            }
        }

        // Cold pages and blank rewarns always re-render at top priority.
        for &page in &update.rewarmed {
            self.request_full_page(page, RenderPriority::Critical);
        }
    }

    fn schedule_tiled(&mut self, pages: &[u32], base: RenderPriority, speculative: bool) {
        let tile_size = self.current_tile_size();
        let selection = target_scale_tier(
            self.camera.z,
            self.options.device_pixel_ratio,
            tile_size,
        );
        let raw_rect = self.visible_rect();
        // Buffer by one tile around the viewport except in an active
        // gesture at very high zoom, where viewport-only is mandatory.
        let buffered = if self.camera.z >= 16.0 && !self.zoom_machine.can_render() {
            raw_rect
        } else {
            raw_rect.expanded(tile_size as f64)
        };

        let page_layouts: Vec<PageLayout> = pages
            .iter()
            .filter_map(|&p| self.layouts.get((p - 1) as usize).copied())
            .collect();
        let tiles = visible_tiles(
            buffered,
            &page_layouts,
            self.camera.z,
            selection.tier,
            tile_size,
        );

        self.render_params_counter += 1;
        let epoch = self.zoom_machine.epoch();
        let scale = self.pdf_to_element_scale();
        self.wanted_tiles.clear();
        for &page in pages {
            self.snapshots.insert(
                page,
                TransformSnapshot {
                    container_width: self.layouts[(page - 1) as usize].width * scale,
                    container_height: self.layouts[(page - 1) as usize].height * scale,
                    pdf_to_element_scale: scale,
                    expected_tile_bounds: Some(buffered),
                    epoch,
                },
            );
        }

        for tile in tiles {
            self.wanted_tiles.entry(tile.page).or_default().push(tile);
            let in_viewport = self
                .layouts
                .get((tile.page - 1) as usize)
                .map(|l| tile.content_rect(l).intersects(&raw_rect))
                .unwrap_or(false);
            let priority = if speculative {
                RenderPriority::High
            } else if in_viewport && self.last_visible.contains(&tile.page) {
                base
            } else if self.last_visible.contains(&tile.page) {
                RenderPriority::High
            } else {
                RenderPriority::Medium
            };
            self.request_tile(tile, priority);
        }
        self.recomposite_all_wanted();
    }

    fn schedule_full_pages(&mut self, pages: &[u32], base: RenderPriority) {
        for &page in pages {
            let priority = if self.last_visible.contains(&page) {
                base
            } else {
                RenderPriority::Medium
            };
            self.request_full_page(page, priority);
        }
    }

    fn request_tile(&mut self, tile: TileCoordinate, priority: RenderPriority) {
        let exact_scale = if self.options.use_exact_scale_rendering {
            Some(self.camera.z * self.options.device_pixel_ratio)
        } else {
            None
        };
        let request = RenderRequest {
            kind: RenderRequestKind::Tile(tile),
            priority,
            document_id: self.document_id.clone(),
            session_id: self.coordinator.current_session(),
            scale_epoch: self.zoom_machine.epoch(),
            render_params_id: self.render_params_counter,
            exact_scale,
        };
        let zoom = self.camera.z;
        let dpr = self.options.device_pixel_ratio;
        match self
            .coordinator
            .request(request, &mut self.cache, zoom, dpr)
        {
            RequestOutcome::Cached(_) | RequestOutcome::Fallback { .. } => {
                // Pixels are already in the cache; the recomposite pass
                // picks them up.
            }
            RequestOutcome::Pending(_) | RequestOutcome::Rejected(_) => {}
        }
    }

    fn request_full_page(&mut self, page: u32, priority: RenderPriority) {
        let scale = (self.camera.z * self.options.device_pixel_ratio).min(MAX_FULL_PAGE_SCALE);
        let request = RenderRequest {
            kind: RenderRequestKind::FullPage { page, scale },
            priority,
            document_id: self.document_id.clone(),
            session_id: self.coordinator.current_session(),
            scale_epoch: self.zoom_machine.epoch(),
            render_params_id: self.render_params_counter,
            exact_scale: None,
        };
        let zoom = self.camera.z;
        let dpr = self.options.device_pixel_ratio;
        let _ = self
            .coordinator
            .request(request, &mut self.cache, zoom, dpr);
    }

    /// Mode-transition contract (two-track):
    /// tiled -> full-page uses overlay swap so old pixels stay visible;
    /// full-page -> tiled keeps the page image underneath incoming tiles,
    /// except at very high zoom where the intermediate is skipped.
    fn begin_mode_transition(&mut self, mode: RenderMode) {
        let visible = self.last_visible.clone();
        match mode {
            RenderMode::FullPage | RenderMode::Adaptive => {
                for &page in &visible {
                    if let Some(element) = self.tracker.element_mut(page) {
                        if element.has_rendered_content() {
                            element.prepare_for_full_page_render_with_overlay();
                        }
                    }
                    self.request_full_page(page, RenderPriority::Critical);
                }
            }
            RenderMode::Tiled => {
                let direct = self.camera.z > DIRECT_TILED_ZOOM;
                for &page in &visible {
                    if let Some(element) = self.tracker.element_mut(page) {
                        element.capture_snapshot_surface();
                        element.prepare_for_tiled_render();
                        element.reset_css_for_zoom_change();
                    }
                    if !direct {
                        // Keep a fresh full-page image as the base layer.
                        self.request_full_page(page, RenderPriority::High);
                    }
                }
                self.schedule_renders(RenderPriority::Critical, false);
            }
        }
    }

    /// Drain worker completions and apply them to the page elements.
    ///
    /// Application is bounded by the frame budget: at least
    /// [`MIN_COMPLETIONS_PER_FRAME`] items always land, and the rest defer
    /// to the next frame once the budget is spent.
    fn apply_completions(&mut self, budget: FrameBudget) {
        let mut ready = std::mem::take(&mut self.deferred_ready);
        ready.extend(self.coordinator.drain_completions(&mut self.cache));
        if ready.is_empty() {
            return;
        }
        let epoch = self.zoom_machine.epoch();
        let mut pages_with_tiles: Vec<u32> = Vec::new();

        let mut queue: std::collections::VecDeque<TileReady> = ready.into();
        let mut applied = 0usize;
        while let Some(item) = queue.pop_front() {
            if applied >= MIN_COMPLETIONS_PER_FRAME && budget.should_yield(Instant::now()) {
                self.deferred_ready.push(item);
                self.deferred_ready.extend(queue);
                break;
            }
            applied += 1;
            if let Some(message) = &item.failed {
                if !item.aborted {
                    // RenderFailure: fall back to whatever the cache has;
                    // the recomposite below stretches a lower tier in.
                    debug!(page = item.request.page(), %message, "render failed, using fallback");
                    pages_with_tiles.push(item.request.page());
                }
                continue;
            }
            match (&item.request.kind, item.bitmap) {
                (RenderRequestKind::Tile(tile), _) => {
                    if !item.aborted {
                        pages_with_tiles.push(tile.page);
                    }
                }
                (RenderRequestKind::FullPage { .. }, Some(bitmap)) => {
                    if item.aborted {
                        continue;
                    }
                    let page = item.request.page();
                    let request_epoch = item.request.scale_epoch;
                    let mut rendered = false;
                    if let Some(element) = self.tracker.element_mut(page) {
                        let stale = epoch > request_epoch + 1 && element.has_rendered_content();
                        if !stale {
                            if element.has_overlay() {
                                element.commit_overlay(&bitmap, request_epoch);
                            } else {
                                element.render_full_page(&bitmap, request_epoch);
                            }
                            rendered = true;
                        }
                    }
                    if rendered {
                        self.attach_text_layer(page);
                    }
                }
                (RenderRequestKind::FullPage { .. }, None) => {}
            }
        }

        pages_with_tiles.sort_unstable();
        pages_with_tiles.dedup();
        for page in pages_with_tiles {
            self.recomposite_page(page);
        }
    }

    /// Rebuild a page's tile composite from the cache: exact tiles where
    /// available, stretched fallbacks where not: a blurry tile strictly
    /// beats a blank gap.
    fn recomposite_page(&mut self, page: u32) {
        let Some(wanted) = self.wanted_tiles.get(&page).cloned() else {
            return;
        };
        let Some(snapshot) = self.snapshots.get(&page).copied() else {
            return;
        };
        if wanted.is_empty() {
            return;
        }
        let ideal_scale = self.camera.z * self.options.device_pixel_ratio;
        let max_stretch = vellum_tiles::max_stretch_for_zoom(self.camera.z);

        let mut images = Vec::with_capacity(wanted.len());
        for tile in &wanted {
            if let Some(hit) =
                self.cache
                    .get_best_available(&self.document_id, tile, ideal_scale, max_stretch)
            {
                images.push(TileImage {
                    coordinate: hit.fallback_tile,
                    bitmap: hit.bitmap,
                    css_stretch: hit.css_stretch,
                });
            }
        }
        let epoch = self.zoom_machine.epoch();
        let (drew, has_content) = match self.tracker.element_mut(page) {
            Some(element) => {
                let drew = element.render_tiles(&images, None, &snapshot, epoch, wanted.len());
                (drew, element.has_rendered_content())
            }
            None => return,
        };
        if drew {
            self.attach_text_layer(page);
        } else if !has_content && !images.is_empty() {
            // IntegrityFailure path: coverage too sparse and nothing on
            // screen. A full-page render repairs it.
            self.request_full_page(page, RenderPriority::Critical);
        }
    }

    /// Fetch the text layer once per element after its first successful
    /// render. Extraction failure is tolerated.
    fn attach_text_layer(&mut self, page: u32) {
        let needs = self
            .tracker
            .element(page)
            .is_some_and(|e| e.text_layer().is_none());
        if !needs {
            return;
        }
        match self.provider.page_text_layer(page) {
            Ok(layer) => {
                if let Some(element) = self.tracker.element_mut(page) {
                    element.set_text_layer(layer);
                }
            }
            Err(error) => debug!(page, %error, "text layer unavailable"),
        }
    }

    fn recomposite_all_wanted(&mut self) {
        let pages: Vec<u32> = self.wanted_tiles.keys().copied().collect();
        for page in pages {
            self.recomposite_page(page);
        }
    }

    /// Post-gesture sweep: visible elements claiming content but showing
    /// none get re-rendered.
    fn run_blank_sweep(&mut self) {
        let blank = self.tracker.blank_pages(&self.last_visible);
        for page in blank {
            self.stats.blank_page_rerenders += 1;
            if let Some(element) = self.tracker.element_mut(page) {
                element.clear_rendered();
            }
            self.request_full_page(page, RenderPriority::Critical);
        }
    }

    /// Switch display modes: destroy all elements, bump the epoch, relay
    /// out, and refit. Elements are never reused across modes.
    pub fn set_display_mode(&mut self, mode: DisplayMode, now: Instant) {
        self.options.display_mode = mode;
        self.tracker.destroy_all();
        self.wanted_tiles.clear();
        self.snapshots.clear();
        self.deferred_ready.clear();
        self.zoom_machine.invalidate();
        self.coordinator.abort_all_pending();

        let page_count = self.layouts.len() as u32;
        let sizes: Vec<(f64, f64)> = self.layouts.iter().map(|l| (l.width, l.height)).collect();
        let (layouts, grid) = place_pages(
            &sizes,
            mode.layout_mode(page_count),
            self.options.page_gap,
        );
        self.layouts = layouts;
        self.grid = grid;
        self.content_bounds = content_bounds_of(&self.layouts);

        let zoom = initial_zoom(
            &self.options,
            &self.layouts[0],
            self.viewport_w,
            self.viewport_h,
            self.constraints,
        );
        self.camera = initial_camera(
            &self.layouts[0],
            zoom,
            self.viewport_w,
            self.viewport_h,
            self.space,
        );
        self.zoom_machine.sync_from_camera(self.camera);
        self.mark_scroll_dirty(now);
    }

    /// Navigate to a page (1-indexed), keeping the current zoom.
    pub fn go_to_page(&mut self, page: u32, now: Instant) {
        let Some(layout) = self.layouts.get(page.saturating_sub(1) as usize) else {
            return;
        };
        self.camera = vellum_camera::center_on(
            layout.rect(),
            self.camera.z,
            self.viewport_w,
            self.viewport_h,
            self.space,
        );
        if self.options.display_mode.constrains_pan() {
            self.camera = constrain(
                self.camera,
                self.content_bounds,
                self.viewport_w,
                self.viewport_h,
                false,
                self.space,
            );
        }
        self.mark_scroll_dirty(now);
    }

    /// The page nearest the viewport center.
    pub fn current_page(&self) -> u32 {
        let rect = self.visible_rect();
        let center = rect.center();
        self.grid.page_at_point(center.x, center.y)
    }

    /// Screen position of a content point, for hosts placing annotations.
    pub fn content_point_to_screen(&self, p: Point) -> Point {
        content_to_screen(self.camera, p, self.space)
    }
}

fn content_bounds_of(layouts: &[PageLayout]) -> Rect {
    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;
    for layout in layouts {
        min_x = min_x.min(layout.x);
        min_y = min_y.min(layout.y);
        max_x = max_x.max(layout.x + layout.width);
        max_y = max_y.max(layout.y + layout.height);
    }
    if layouts.is_empty() {
        Rect::ZERO
    } else {
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

fn initial_zoom(
    options: &ViewerOptions,
    first_page: &PageLayout,
    viewport_w: f64,
    viewport_h: f64,
    constraints: ZoomConstraints,
) -> f64 {
    if options.display_mode.initial_fit_page() {
        fit_page_zoom(
            first_page.width,
            first_page.height,
            viewport_w,
            viewport_h,
            options.page_gap,
            constraints,
        )
    } else {
        fit_width_zoom(first_page.width, viewport_w, 0.0, constraints)
    }
}

fn initial_camera(
    first_page: &PageLayout,
    zoom: f64,
    viewport_w: f64,
    viewport_h: f64,
    space: CoordinateSpace,
) -> Camera {
    // Top of the first page, horizontally centered.
    let centered = vellum_camera::center_on(first_page.rect(), zoom, viewport_w, viewport_h, space);
    match space {
        CoordinateSpace::Legacy => Camera::new(centered.x, -first_page.y, zoom),
        CoordinateSpace::Unified => Camera::new(centered.x, -first_page.y * zoom, zoom),
    }
}
