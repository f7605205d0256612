//! End-to-end viewer scenarios against the synthetic provider.
//!
//! These drive the controller the way a host would: input events, then a
//! frame loop. The logical clock is synthetic (passed into every call);
//! only waiting for the worker threads uses real time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vellum_provider::SyntheticProvider;
use vellum_viewer::{
    DisplayMode, InfiniteCanvasController, InputEvent, KeyCommand, ViewerOptions,
};
use vellum_zoom::{GesturePhase, RenderMode};

const VIEWPORT_W: f64 = 800.0;
const VIEWPORT_H: f64 = 600.0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn controller(pages: u32) -> (InfiniteCanvasController, Instant) {
    init_tracing();
    let provider = Arc::new(SyntheticProvider::new(pages, 612.0, 792.0));
    let controller = InfiniteCanvasController::new(
        provider,
        ViewerOptions::default(),
        VIEWPORT_W,
        VIEWPORT_H,
    )
    .expect("controller mounts");
    (controller, Instant::now())
}

/// Run frames from `at` onward (logical clock advancing 10 ms per frame)
/// until the render queue drains and the gesture machine is idle, giving
/// worker threads real time to finish.
fn pump_until_idle(c: &mut InfiniteCanvasController, at: Instant) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut at = at;
    loop {
        at += Duration::from_millis(10);
        c.update(at);
        if c.coordinator().is_idle() && c.gesture_phase() == GesturePhase::Idle {
            // One more frame to apply the last drained completions.
            c.update(at + Duration::from_millis(10));
            break;
        }
        if Instant::now() > deadline {
            panic!("render queue failed to drain");
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn pinch_to(c: &mut InfiniteCanvasController, t0: Instant, events: u32, delta_y: f64) -> Instant {
    let mut at = t0;
    for i in 0..events {
        at = t0 + Duration::from_millis(10 * i as u64);
        c.handle_event(
            InputEvent::Wheel {
                delta_x: 0.0,
                delta_y,
                ctrl: true,
                x: 400.0,
                y: 300.0,
            },
            at,
        );
        c.update(at);
    }
    // Let the gesture end and settling complete.
    let settled = at + Duration::from_millis(320);
    c.update(settled);
    let done = settled + Duration::from_millis(220);
    c.update(done);
    done
}

#[test]
fn test_cold_start_three_page_vertical() {
    let (mut c, t0) = controller(3);

    // Initial zoom fits page 1 width: 800 / 612.
    assert!((c.zoom() - VIEWPORT_W / 612.0).abs() < 0.01, "{}", c.zoom());
    // The dual-res first paint already put pixels on page 1.
    assert!(c.tracker().element(1).unwrap().has_rendered_content());

    // Run the scroll path and wait for the real renders.
    c.update(t0 + Duration::from_millis(40));
    pump_until_idle(&mut c, t0 + Duration::from_millis(80));

    assert_eq!(c.visible_pages(), &[1]);
    assert!(c.tracker().element(1).unwrap().has_visible_pixels());
    // Page 2 sits in the element buffer below the fold; page 3 may too,
    // but nothing beyond the buffered span exists.
    assert!(c.tracker().element(2).is_some());
    assert!(c.tracker().element_count() <= 3);
}

#[test]
fn test_pinch_to_max_zoom_preserves_focal_point() {
    let (mut c, t0) = controller(3);
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));

    let focal = vellum_camera::Point::new(400.0, 300.0);
    let space = vellum_camera::CoordinateSpace::Legacy;
    let content_before = vellum_camera::screen_to_content(c.camera(), focal, space);

    let done = pinch_to(&mut c, t0 + Duration::from_secs(1), 10, -50.0);

    // 1.5^10 overshoots 32; the camera clamps at max zoom.
    assert_eq!(c.zoom(), 32.0);
    // The content point under the focal point moved less than a pixel.
    let content_after = vellum_camera::screen_to_content(c.camera(), focal, space);
    let drift_px = ((content_after.x - content_before.x).powi(2)
        + (content_after.y - content_before.y).powi(2))
    .sqrt()
        * c.zoom();
    assert!(drift_px <= 1.0, "focal drift {drift_px}px");

    // Mode committed tiled at gesture end; the queue drains.
    assert_eq!(c.render_mode(), RenderMode::Tiled);
    pump_until_idle(&mut c, done + Duration::from_millis(40));

    // All cached tiles for the visible pages are within tier 32 and
    // display within a 2x stretch.
    let stats = c.cache().stats();
    assert!(stats.tile_count > 0);
    assert_eq!(c.zoom_stats().epoch_bumps, c.epoch());
    assert!(c.epoch() >= 2); // gesture + mode change
}

#[test]
fn test_rapid_pan_at_high_zoom_clears_queue() {
    let (mut c, t0) = controller(3);
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));

    // Get to zoom 16: 1.5^7 ~ 17, clamped by the wheel loop at 16.
    let mut at = t0 + Duration::from_secs(1);
    while c.zoom() < 16.0 {
        c.handle_event(
            InputEvent::Wheel { delta_x: 0.0, delta_y: -50.0, ctrl: true, x: 400.0, y: 300.0 },
            at,
        );
        at = at + Duration::from_millis(10);
        c.update(at);
    }
    let at = at + Duration::from_millis(550);
    c.update(at);
    pump_until_idle(&mut c, at);
    let clears_before = c.coordinator().stats().queue_clears;

    // Drag 2000 px up over 200 ms.
    c.handle_event(InputEvent::PointerDown { x: 400.0, y: 500.0 }, at);
    let mut drag = at;
    for i in 1..=20 {
        drag = at + Duration::from_millis(10 * i);
        c.handle_event(
            InputEvent::PointerMove {
                x: 400.0,
                y: 500.0 - 100.0 * i as f64,
            },
            drag,
        );
        c.update(drag);
    }
    c.handle_event(InputEvent::PointerUp, drag);

    // Cumulative pan crossed half a viewport in content units at high
    // zoom, so pending work was aborted at least once more.
    assert!(c.coordinator().stats().queue_clears > clears_before);

    pump_until_idle(&mut c, drag + Duration::from_millis(100));
    // Whatever is visible now has content.
    for &page in c.visible_pages() {
        assert!(
            c.tracker().element(page).map(|e| e.has_visible_pixels()).unwrap_or(false),
            "page {page} blank after rapid pan"
        );
    }
}

#[test]
fn test_trackpad_rebound_at_boundary() {
    let (mut c, t0) = controller(3);
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));

    // Pinch to max zoom and let the gesture end (boundary arm).
    let mut at = t0 + Duration::from_secs(1);
    for i in 0..10 {
        at = t0 + Duration::from_secs(1) + Duration::from_millis(10 * i);
        c.handle_event(
            InputEvent::Wheel { delta_x: 0.0, delta_y: -50.0, ctrl: true, x: 400.0, y: 300.0 },
            at,
        );
    }
    let gesture_end = at + Duration::from_millis(310);
    c.update(gesture_end);
    assert_eq!(c.zoom(), 32.0);

    // An opposite-direction wheel 300 ms later is trackpad inertia.
    let rebound_at = gesture_end + Duration::from_millis(300);
    c.handle_event(
        InputEvent::Wheel { delta_x: 0.0, delta_y: 30.0, ctrl: true, x: 400.0, y: 300.0 },
        rebound_at,
    );
    assert_eq!(c.zoom(), 32.0, "rebound must not move the camera");
    assert_eq!(c.zoom_stats().rebounds_filtered, 1);

    // The same event after the window zooms out normally.
    let later = gesture_end + Duration::from_millis(700);
    c.handle_event(
        InputEvent::Wheel { delta_x: 0.0, delta_y: 30.0, ctrl: true, x: 400.0, y: 300.0 },
        later,
    );
    assert!(c.zoom() < 32.0);
}

#[test]
fn test_mode_transition_never_blanks() {
    let (mut c, t0) = controller(3);
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));

    // Zoom into tiled territory (z = 1.3 * 1.5^4 ~ 6.6) and settle.
    let done = pinch_to(&mut c, t0 + Duration::from_secs(1), 4, -50.0);
    pump_until_idle(&mut c, done + Duration::from_millis(40));
    assert_eq!(c.render_mode(), RenderMode::Tiled);
    let page = c.visible_pages()[0];
    assert!(c.tracker().element(page).unwrap().has_rendered_content());

    // Zoom back out below the threshold band (ratio 0.5 per event).
    let t1 = done + Duration::from_secs(1);
    let mut at = t1;
    for i in 0..2 {
        at = t1 + Duration::from_millis(10 * i);
        c.handle_event(
            InputEvent::Wheel { delta_x: 0.0, delta_y: 50.0, ctrl: true, x: 400.0, y: 300.0 },
            at,
        );
        c.update(at);
        // Mid-gesture the committed mode holds; the canvas stays lit.
        assert_eq!(c.render_mode(), RenderMode::Tiled);
        assert!(c.tracker().element(page).unwrap().has_rendered_content());
    }

    // Gesture end executes the transition to full-page via overlay swap;
    // at no sampled point does the page lose content.
    let end = at + Duration::from_millis(320);
    c.update(end);
    assert_eq!(c.render_mode(), RenderMode::FullPage);
    assert!(c.tracker().element(page).unwrap().has_rendered_content());

    c.update(end + Duration::from_millis(220));
    pump_until_idle(&mut c, end + Duration::from_millis(260));
    let element = c.tracker().element(page).unwrap();
    assert!(element.has_rendered_content());
    assert!(element.has_visible_pixels());
    assert!(!element.has_overlay(), "overlay must have swapped in");
}

#[test]
fn test_cold_page_recovery_forces_rerender() {
    let provider = Arc::new(SyntheticProvider::new(50, 612.0, 792.0));
    let mut c = InfiniteCanvasController::new(
        provider.clone(),
        ViewerOptions::default(),
        VIEWPORT_W,
        VIEWPORT_H,
    )
    .unwrap();
    let t0 = Instant::now();
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));
    assert!(c.tracker().element(1).unwrap().has_rendered_content());

    // Jump 40 pages away; page 1 leaves the keep buffer and goes cold.
    c.go_to_page(41, t0 + Duration::from_secs(1));
    c.update(t0 + Duration::from_secs(1) + Duration::from_millis(40));
    pump_until_idle(&mut c, t0 + Duration::from_secs(1) + Duration::from_millis(80));
    assert!(c.tracker().element(1).is_none());
    assert!(c.tracker().is_cold(1));

    // Come back: the page must rerender despite having been rendered
    // before.
    let renders_before = provider.render_count();
    c.go_to_page(1, t0 + Duration::from_secs(2));
    c.update(t0 + Duration::from_secs(2) + Duration::from_millis(40));
    pump_until_idle(&mut c, t0 + Duration::from_secs(2) + Duration::from_millis(80));

    let element = c.tracker().element(1).expect("element recreated");
    assert!(element.has_rendered_content());
    assert!(element.has_visible_pixels());
    assert!(provider.render_count() > renders_before);
    assert!(!c.tracker().is_cold(1));
}

#[test]
fn test_display_mode_change_resets_epoch_and_elements() {
    let (mut c, t0) = controller(9);
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));
    let epoch_before = c.epoch();
    assert!(c.tracker().element_count() > 0);

    c.set_display_mode(DisplayMode::AutoGrid, t0 + Duration::from_secs(1));
    assert!(c.epoch() > epoch_before);
    assert_eq!(c.tracker().element_count(), 0);

    c.update(t0 + Duration::from_secs(1) + Duration::from_millis(40));
    pump_until_idle(&mut c, t0 + Duration::from_secs(1) + Duration::from_millis(80));
    assert!(c.tracker().element_count() > 0);
    // Grid layout: three pages per row for nine pages.
    let layouts = c.layouts();
    assert_eq!(layouts[0].y, layouts[2].y);
    assert!(layouts[3].y > layouts[0].y);
}

#[test]
fn test_keyboard_zoom_and_navigation() {
    let (mut c, t0) = controller(5);
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));
    let z0 = c.zoom();

    c.handle_event(InputEvent::Key(KeyCommand::ZoomIn), t0 + Duration::from_secs(1));
    assert!(c.zoom() > z0);
    c.handle_event(InputEvent::Key(KeyCommand::ZoomReset), t0 + Duration::from_secs(2));
    assert!((c.zoom() - z0).abs() < 1e-6);

    let page_before = c.current_page();
    c.handle_event(InputEvent::Key(KeyCommand::PageDown), t0 + Duration::from_secs(3));
    assert!(c.current_page() >= page_before);
}

#[test]
fn test_programmatic_zoom_jump_clears_queue() {
    let (mut c, t0) = controller(3);
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));

    // Double-click from fit zoom (~1.3) doubles past the mode threshold:
    // a ratio-6 jump, so everything pending is aborted.
    let clears_before = c.coordinator().stats().queue_clears;
    c.handle_event(
        InputEvent::DoubleClick { x: 400.0, y: 300.0 },
        t0 + Duration::from_secs(1),
    );
    assert!(c.zoom() > 4.0);
    assert!(c.coordinator().stats().queue_clears > clears_before);

    // Ctrl+0 back down to fit is another large jump.
    let clears = c.coordinator().stats().queue_clears;
    c.handle_event(
        InputEvent::Key(KeyCommand::ZoomReset),
        t0 + Duration::from_secs(2),
    );
    assert!(c.zoom() < 2.0);
    assert!(c.coordinator().stats().queue_clears > clears);
}

#[test]
fn test_thumbnails_suspended_during_gesture() {
    let provider = Arc::new(SyntheticProvider::new(3, 612.0, 792.0));
    let mut c = InfiniteCanvasController::new(
        provider.clone(),
        ViewerOptions::default(),
        VIEWPORT_W,
        VIEWPORT_H,
    )
    .unwrap();
    let t0 = Instant::now();
    pump_until_idle(&mut c, t0 + Duration::from_millis(40));

    c.handle_event(
        InputEvent::Wheel { delta_x: 0.0, delta_y: -50.0, ctrl: true, x: 400.0, y: 300.0 },
        t0 + Duration::from_secs(1),
    );
    assert!(provider.thumbnails_suspended());

    // Settle out; thumbnails resume.
    c.update(t0 + Duration::from_secs(1) + Duration::from_millis(310));
    c.update(t0 + Duration::from_secs(1) + Duration::from_millis(520));
    assert!(!provider.thumbnails_suspended());
}

#[test]
fn test_zero_viewport_resize_is_dropped() {
    let (mut c, t0) = controller(3);
    c.handle_event(InputEvent::Resize { width: 0.0, height: 600.0 }, t0);
    // The camera and visibility machinery remain intact.
    assert!(c.camera().is_valid());
    assert_eq!(c.stats().invalid_events_dropped, 1);
    c.update(t0 + Duration::from_millis(40));
}
