use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

use super::machine::{FrameCallback, OverlaySurface};
use super::state::OverlayState;
use crate::bridge::GestureTrail;
use crate::screen::{Point, Rect, ScreenSize};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const INDICATOR_HEIGHT: i32 = 160;

/// Headless surface: prints state changes and keeps a virtual indicator
/// rectangle so avoidance logic behaves as on a device.
pub struct ConsoleOverlay {
    screen: ScreenSize,
    rect: Mutex<Rect>,
    shown: Mutex<bool>,
}

impl ConsoleOverlay {
    pub fn new(screen: ScreenSize, top_offset_px: i32) -> Self {
        Self {
            screen,
            rect: Mutex::new(Rect::new(0, top_offset_px, screen.width, INDICATOR_HEIGHT)),
            shown: Mutex::new(false),
        }
    }

    fn describe(state: &OverlayState) -> Option<String> {
        match state {
            OverlayState::Hidden | OverlayState::Suspended { .. } => None,
            OverlayState::Visible(v) => Some(if v.is_running {
                format!("⏳ {}", v.status_text)
            } else {
                v.status_text.clone()
            }),
            OverlayState::RecordingOverlay { .. } => Some("🎙️ Listening...".to_string()),
            OverlayState::ReviewOverlay { text, .. } => Some(format!("📝 \"{}\"", text)),
            OverlayState::TaskCompleted { status_text } => Some(format!("✅ {}", status_text)),
        }
    }
}

impl OverlaySurface for ConsoleOverlay {
    fn render(&self, state: &OverlayState) {
        let line = Self::describe(state);
        if let Ok(mut shown) = self.shown.lock() {
            *shown = line.is_some();
        }
        if let Some(line) = line {
            println!("   [overlay] {}", line);
        }
    }

    fn request_frame(&self, on_frame: FrameCallback) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(FRAME_INTERVAL).await;
                    on_frame();
                });
            }
            Err(_) => on_frame(),
        }
    }

    fn bounds(&self) -> Rect {
        let shown = self.shown.lock().map(|s| *s).unwrap_or(false);
        if !shown {
            return Rect::default();
        }
        self.rect.lock().map(|r| *r).unwrap_or_default()
    }

    fn move_to_top(&self, offset_px: i32) {
        if let Ok(mut rect) = self.rect.lock() {
            rect.top = offset_px;
        }
    }

    fn move_to_bottom(&self, offset_px: i32) {
        if let Ok(mut rect) = self.rect.lock() {
            rect.top = self.screen.height - offset_px - rect.height;
        }
    }
}

impl GestureTrail for ConsoleOverlay {
    fn show_trail(&self, from: Point, to: Point, duration: Duration) {
        info!(
            "[Overlay] Trail ({}, {}) -> ({}, {}) over {}ms",
            from.x,
            from.y,
            to.x,
            to.y,
            duration.as_millis()
        );
    }
}
