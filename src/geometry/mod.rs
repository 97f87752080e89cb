//! Rendering Geometry Controller.
//!
//! Computes logical/CSS dimensions of the media surface from
//! device-pixel-ratio, window size, manual override, and scale-to-fit
//! policy; debounces window resize; emits resolution updates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Rendering hint applied to the media surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRendering {
    Pixelated,
    Smooth,
}

/// CSS application target the geometry controller drives. The orchestrator
/// binary supplies a concrete implementation (or a logging stub, since
/// rendering widgets are out of scope for this crate).
pub trait SurfaceSink: Send + Sync {
    fn apply_css(&self, width: u32, height: u32, rendering: ImageRendering, letterbox: Option<(u32, u32)>);
}

/// Events the controller raises for the orchestrator to route to the
/// transport (resolution message) and dashboard.
#[derive(Debug, Clone)]
pub enum GeometryEvent {
    ResolutionDue { width: u32, height: u32 },
}

/// Round `value` down to the nearest even integer; never returns an odd
/// width or height.
pub fn round_down_even(value: f64) -> u32 {
    let floor = value.floor().max(0.0) as u64;
    (if floor % 2 == 0 { floor } else { floor - 1 }) as u32
}

/// `effective_dpr = (manual_mode || use_css_scaling) ? 1 : devicePixelRatio`
pub fn effective_dpr(manual_mode: bool, use_css_scaling: bool, device_pixel_ratio: f64) -> f64 {
    if manual_mode || use_css_scaling {
        1.0
    } else {
        device_pixel_ratio
    }
}

/// Compute a scale-to-fit letterbox: the largest `(w, h)` with the target
/// aspect ratio that fits inside `container_w x container_h`.
pub fn scale_to_fit(container_w: u32, container_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    if target_w == 0 || target_h == 0 || container_w == 0 || container_h == 0 {
        return (container_w, container_h);
    }
    let container_ratio = container_w as f64 / container_h as f64;
    let target_ratio = target_w as f64 / target_h as f64;

    if container_ratio > target_ratio {
        // container is wider than target: letterbox left/right
        let h = container_h;
        let w = round_down_even(container_h as f64 * target_ratio);
        (w, h)
    } else {
        let w = container_w;
        let h = round_down_even(container_w as f64 / target_ratio);
        (w, h)
    }
}

struct DebounceState {
    generation: AtomicU64,
    enabled: AtomicBool,
}

/// Rendering geometry controller. Not `Clone`; shared via `Arc`.
pub struct RenderingGeometryController {
    debounce: Arc<DebounceState>,
    debounce_period: Duration,
    events: mpsc::UnboundedSender<GeometryEvent>,
    manual_mode: AtomicBool,
    manual_width: AtomicU64,
    manual_height: AtomicU64,
    use_css_scaling: AtomicBool,
}

impl RenderingGeometryController {
    pub fn new(debounce_period: Duration) -> (Self, mpsc::UnboundedReceiver<GeometryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            debounce: Arc::new(DebounceState {
                generation: AtomicU64::new(0),
                enabled: AtomicBool::new(true),
            }),
            debounce_period,
            events: tx,
            manual_mode: AtomicBool::new(false),
            manual_width: AtomicU64::new(0),
            manual_height: AtomicU64::new(0),
            use_css_scaling: AtomicBool::new(false),
        };
        (controller, rx)
    }

    pub fn enable_auto_resize(&self) {
        self.debounce.enabled.store(true, Ordering::SeqCst);
    }

    /// Cancel any pending debounce timer; subsequent resize events are
    /// ignored until `enable_auto_resize()` is called again.
    pub fn disable_auto_resize(&self) {
        self.debounce.enabled.store(false, Ordering::SeqCst);
        self.debounce.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a window resize event; (re-)arms the trailing-edge debounce
    /// timer. Call on every `resize` notification from the embedder.
    pub fn on_window_resize(&self, width: u32, height: u32) {
        if !self.debounce.enabled.load(Ordering::SeqCst) {
            return;
        }
        let generation = self.debounce.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.debounce.clone();
        let period = self.debounce_period;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(period).await;
            if state.generation.load(Ordering::SeqCst) == generation && state.enabled.load(Ordering::SeqCst) {
                let _ = events.send(GeometryEvent::ResolutionDue { width, height });
            }
        });
    }

    pub fn apply_manual_style(&self, width: u32, height: u32) {
        self.manual_mode.store(true, Ordering::SeqCst);
        self.manual_width.store(width as u64, Ordering::SeqCst);
        self.manual_height.store(height as u64, Ordering::SeqCst);
        self.disable_auto_resize();
        let _ = self.events.send(GeometryEvent::ResolutionDue { width, height });
    }

    pub fn reset_to_window_resolution(&self, width: u32, height: u32) {
        self.manual_mode.store(false, Ordering::SeqCst);
        self.enable_auto_resize();
        let _ = self.events.send(GeometryEvent::ResolutionDue { width, height });
    }

    pub fn set_use_css_scaling(&self, enabled: bool) {
        self.use_css_scaling.store(enabled, Ordering::SeqCst);
    }

    pub fn is_manual_mode(&self) -> bool {
        self.manual_mode.load(Ordering::SeqCst)
    }

    pub fn manual_dimensions(&self) -> (u32, u32) {
        (
            self.manual_width.load(Ordering::SeqCst) as u32,
            self.manual_height.load(Ordering::SeqCst) as u32,
        )
    }

    /// Resolve the logical rendering dimensions for a given window size and
    /// device-pixel-ratio: `round_down_even(target * dpr)`.
    pub fn logical_dimensions(&self, window_w: u32, window_h: u32, device_pixel_ratio: f64) -> (u32, u32) {
        let manual_mode = self.is_manual_mode();
        let use_css_scaling = self.use_css_scaling.load(Ordering::SeqCst);
        let dpr = effective_dpr(manual_mode, use_css_scaling, device_pixel_ratio);

        let (target_w, target_h) = if manual_mode {
            self.manual_dimensions()
        } else {
            (window_w, window_h)
        };

        (
            round_down_even(target_w as f64 * dpr),
            round_down_even(target_h as f64 * dpr),
        )
    }

    pub fn image_rendering(&self, device_pixel_ratio: f64) -> ImageRendering {
        let manual_mode = self.is_manual_mode();
        let use_css_scaling = self.use_css_scaling.load(Ordering::SeqCst);
        let dpr = effective_dpr(manual_mode, use_css_scaling, device_pixel_ratio);
        if dpr <= 1.0 {
            ImageRendering::Pixelated
        } else {
            ImageRendering::Smooth
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_down_even_rounds_odd_down() {
        assert_eq!(round_down_even(1921.0), 1920);
        assert_eq!(round_down_even(1920.0), 1920);
        assert_eq!(round_down_even(1.9), 0);
    }

    #[test]
    fn effective_dpr_forces_one_in_manual_mode() {
        assert_eq!(effective_dpr(true, false, 2.0), 1.0);
        assert_eq!(effective_dpr(false, true, 2.0), 1.0);
        assert_eq!(effective_dpr(false, false, 2.0), 2.0);
    }

    #[test]
    fn scale_to_fit_letterboxes_shorter_axis() {
        let (w, h) = scale_to_fit(1000, 500, 16, 9);
        assert_eq!(h, 500);
        assert!(w <= 1000);
        assert_eq!(w % 2, 0);
    }

    #[tokio::test]
    async fn manual_style_disables_auto_resize_and_emits_once() {
        let (controller, mut rx) = RenderingGeometryController::new(Duration::from_millis(20));
        controller.apply_manual_style(1920, 1080);
        let event = rx.recv().await.unwrap();
        match event {
            GeometryEvent::ResolutionDue { width, height } => {
                assert_eq!((width, height), (1920, 1080));
            }
        }
        assert!(controller.is_manual_mode());
        assert_eq!(controller.manual_dimensions(), (1920, 1080));
    }

    #[tokio::test]
    async fn resize_burst_emits_once_after_debounce() {
        let (controller, mut rx) = RenderingGeometryController::new(Duration::from_millis(30));
        for i in 0..5u32 {
            controller.on_window_resize(800 + i, 600);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let event = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            GeometryEvent::ResolutionDue { width, .. } => assert_eq!(width, 804),
        }
        let nothing = tokio::time::timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn disable_auto_resize_cancels_pending_debounce() {
        let (controller, mut rx) = RenderingGeometryController::new(Duration::from_millis(30));
        controller.on_window_resize(800, 600);
        controller.disable_auto_resize();
        let nothing = tokio::time::timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(nothing.is_err());
    }
}
