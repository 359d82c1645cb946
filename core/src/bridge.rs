//! Awaitable capture and gesture operations over callback-based platform
//! primitives.
//!
//! Every operation hides the status overlay first and restores it on every
//! exit path: success, failure, timeout, and the caller dropping the future
//! mid-flight (the guard's `Drop` schedules the restore).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::GestureConfig;
use crate::error::AgentError;
use crate::overlay::OverlayStateMachine;
use crate::screen::{Point, ScreenSize, Screenshot};

const TAP_DURATION: Duration = Duration::from_millis(50);

/// Frame as delivered by the platform, before we copy it out.
pub enum RawFrame {
    Encoded(Vec<u8>),
    Rgba { width: u32, height: u32, pixels: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureResult {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub path: Vec<Point>,
    pub start_delay: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GestureDescription {
    pub strokes: Vec<Stroke>,
}

impl GestureDescription {
    pub fn single(path: Vec<Point>, duration: Duration) -> Self {
        Self {
            strokes: vec![Stroke { path, start_delay: Duration::ZERO, duration }],
        }
    }
}

pub type CaptureCallback = Box<dyn FnOnce(Result<RawFrame, String>) + Send + 'static>;
pub type GestureCallback = Box<dyn FnOnce(GestureResult) + Send + 'static>;

/// Perception and gesture side of the device. Both primitives are single-shot
/// and report through a callback, possibly from another thread.
#[async_trait]
pub trait PlatformPrimitives: Send + Sync {
    fn screen_size(&self) -> ScreenSize;

    fn take_screenshot(&self, on_result: CaptureCallback);

    /// Returns false when the platform refuses the gesture outright; the
    /// callback is then never invoked.
    fn dispatch_gesture(&self, gesture: GestureDescription, on_done: GestureCallback) -> bool;

    /// Identifier of the foreground app, when the platform can tell.
    async fn current_app(&self) -> Option<String> {
        None
    }
}

/// On-screen trail drawn for swipes, independent of the status overlay.
pub trait GestureTrail: Send + Sync {
    fn show_trail(&self, from: Point, to: Point, duration: Duration);
}

/// Restores the overlay when released or dropped.
struct SuspendGuard {
    overlay: Option<Arc<OverlayStateMachine>>,
}

impl SuspendGuard {
    /// Armed before suspending so a drop during the suspend wait still
    /// schedules a restore.
    async fn suspend(overlay: &Arc<OverlayStateMachine>) -> Self {
        let mut guard = Self { overlay: Some(overlay.clone()) };
        if !overlay.suspend().await {
            guard.overlay = None;
        }
        guard
    }

    async fn release(mut self) {
        if let Some(overlay) = self.overlay.take() {
            overlay.restore().await;
        }
    }
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        let Some(overlay) = self.overlay.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("[Bridge] Operation dropped mid-flight; scheduling overlay restore");
                handle.spawn(async move {
                    overlay.restore().await;
                });
            }
            Err(_) => warn!("[Bridge] No runtime to restore overlay on drop"),
        }
    }
}

pub struct GestureBridge {
    platform: Arc<dyn PlatformPrimitives>,
    overlay: Arc<OverlayStateMachine>,
    trail: Option<Arc<dyn GestureTrail>>,
    config: GestureConfig,
}

impl GestureBridge {
    pub fn new(
        platform: Arc<dyn PlatformPrimitives>,
        overlay: Arc<OverlayStateMachine>,
        config: GestureConfig,
    ) -> Self {
        Self {
            platform,
            overlay,
            trail: None,
            config,
        }
    }

    pub fn with_trail(mut self, trail: Arc<dyn GestureTrail>) -> Self {
        self.trail = Some(trail);
        self
    }

    pub fn overlay(&self) -> &Arc<OverlayStateMachine> {
        &self.overlay
    }

    pub fn screen_size(&self) -> ScreenSize {
        self.platform.screen_size()
    }

    pub async fn current_app(&self) -> Option<String> {
        self.platform.current_app().await
    }

    pub async fn capture(&self, timeout: Duration) -> Option<Screenshot> {
        self.capture_detailed(timeout).await.ok()
    }

    /// Like `capture`, but says why it failed.
    pub async fn capture_detailed(&self, timeout: Duration) -> Result<Screenshot, AgentError> {
        let guard = SuspendGuard::suspend(&self.overlay).await;

        let (tx, rx) = oneshot::channel();
        self.platform.take_screenshot(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        let outcome = tokio::time::timeout(timeout, rx).await;

        guard.release().await;

        let frame = match outcome {
            Ok(Ok(Ok(frame))) => frame,
            Ok(Ok(Err(e))) => {
                warn!("[Bridge] Capture failed: {}", e);
                return Err(AgentError::CaptureFailure(e));
            }
            Ok(Err(_)) => {
                warn!("[Bridge] Capture callback dropped");
                return Err(AgentError::CaptureFailure("capture callback dropped".to_string()));
            }
            Err(_) => {
                warn!("[Bridge] Capture timed out after {:?}", timeout);
                return Err(AgentError::CaptureTimeout(timeout.as_millis() as u64));
            }
        };

        match frame {
            RawFrame::Encoded(bytes) => {
                Screenshot::decode(&bytes).map_err(|e| AgentError::CaptureFailure(e.to_string()))
            }
            RawFrame::Rgba { width, height, pixels } => image::RgbaImage::from_raw(width, height, pixels)
                .map(Screenshot::from_rgba)
                .ok_or_else(|| AgentError::CaptureFailure("pixel buffer does not match frame size".to_string())),
        }
    }

    /// Single-point tap. Points outside the screen are rejected without
    /// touching the platform.
    pub async fn dispatch_tap(&self, x: i32, y: i32) -> bool {
        let screen = self.platform.screen_size();
        if !screen.contains(x, y) {
            warn!("[Bridge] Tap ({}, {}) outside {}x{}", x, y, screen.width, screen.height);
            return false;
        }

        self.overlay.avoid_point(x, y, screen).await;
        let gesture = GestureDescription::single(vec![Point::new(x, y)], TAP_DURATION);
        self.perform(gesture).await
    }

    /// Two-point swipe. The platform stroke always uses the configured short
    /// duration so it registers as a fling; the trail uses `duration`.
    pub async fn dispatch_swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration: Duration) -> bool {
        let screen = self.platform.screen_size();
        if !screen.contains(x1, y1) || !screen.contains(x2, y2) {
            warn!("[Bridge] Swipe ({}, {}) -> ({}, {}) leaves the screen", x1, y1, x2, y2);
            return false;
        }

        let (from, to) = (Point::new(x1, y1), Point::new(x2, y2));
        if let Some(trail) = &self.trail {
            trail.show_trail(from, to, duration);
        }
        let gesture = GestureDescription::single(vec![from, to], self.config.swipe_gesture);
        self.perform(gesture).await
    }

    /// A swipe that does not move.
    pub async fn long_press(&self, x: i32, y: i32, duration: Duration) -> bool {
        self.dispatch_swipe(x, y, x, y, duration).await
    }

    async fn perform(&self, gesture: GestureDescription) -> bool {
        let guard = SuspendGuard::suspend(&self.overlay).await;

        let (tx, rx) = oneshot::channel();
        let accepted = self.platform.dispatch_gesture(
            gesture,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let result = if accepted {
            rx.await.ok()
        } else {
            warn!("[Bridge] Platform refused gesture");
            None
        };

        guard.release().await;
        matches!(result, Some(GestureResult::Completed))
    }

    /// Restores the overlay if something left it suspended. Safe to call at
    /// any time.
    pub async fn ensure_restored(&self) {
        self.overlay.restore().await;
    }
}
