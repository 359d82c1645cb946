use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use super::state::{OverlayKind, OverlayState, StopHandle, VisibleState};
use crate::config::OverlayConfig;
use crate::screen::{Rect, ScreenSize};

pub type FrameCallback = Box<dyn FnOnce() + Send + 'static>;

/// Render side of the overlay (the UI collaborator). Only
/// `OverlayStateMachine` talks to it.
pub trait OverlaySurface: Send + Sync {
    /// Draw `state`. `Hidden` and `Suspended` must leave the indicator
    /// zero-sized and non-interactive.
    fn render(&self, state: &OverlayState);

    /// Call `on_frame` once the next frame has been composed. Dropping the
    /// callback without calling it is treated as a missed frame.
    fn request_frame(&self, on_frame: FrameCallback);

    /// Current on-screen rectangle of the indicator.
    fn bounds(&self) -> Rect;

    fn move_to_top(&self, offset_px: i32);

    fn move_to_bottom(&self, offset_px: i32);
}

/// Owns the single `OverlayState`. Every change goes through one async mutex
/// which stays locked for the whole transition, frame waits included, so
/// loop-driven and UI-driven requests cannot interleave.
pub struct OverlayStateMachine {
    state: Mutex<OverlayState>,
    published: watch::Sender<OverlayState>,
    surface: Arc<dyn OverlaySurface>,
    config: OverlayConfig,
}

impl OverlayStateMachine {
    pub fn new(surface: Arc<dyn OverlaySurface>, config: OverlayConfig) -> Self {
        let (published, _) = watch::channel(OverlayState::Hidden);
        Self {
            state: Mutex::new(OverlayState::Hidden),
            published,
            surface,
            config,
        }
    }

    /// Last committed state. Never waits on an in-flight transition.
    pub fn current(&self) -> OverlayState {
        self.published.borrow().clone()
    }

    pub fn kind(&self) -> OverlayKind {
        self.published.borrow().kind()
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayState> {
        self.published.subscribe()
    }

    /// Validated transition to an explicit target. Illegal requests are
    /// logged and ignored; the return value says whether it was applied.
    pub async fn transition(&self, target: OverlayState) -> bool {
        self.transition_with("transition", move |_| Some(target)).await
    }

    /// Computes the target from the current state under the lock. `None`
    /// means "nothing to do" and is not logged as an error.
    async fn transition_with<F>(&self, op: &str, build: F) -> bool
    where
        F: FnOnce(&OverlayState) -> Option<OverlayState>,
    {
        let mut state = self.state.lock().await;
        let Some(target) = build(&state) else {
            debug!("[Overlay] {} skipped in {:?}", op, state.kind());
            return false;
        };

        let (from, to) = (state.kind(), target.kind());
        if !from.can_transition_to(to) {
            warn!("[Overlay] Ignoring illegal {} {:?} -> {:?}", op, from, to);
            return false;
        }

        self.surface.render(&target);
        // Commit before waiting on frames so a dropped caller still leaves
        // the machine describing what is actually on screen.
        *state = target;
        self.published.send_replace(state.clone());
        debug!("[Overlay] {:?} -> {:?}", from, to);

        if to == OverlayKind::Suspended {
            self.wait_until_absent().await;
        }
        true
    }

    /// Waits `settle_frames` frame acknowledgements plus a fixed margin so the
    /// hidden indicator is out of the compositor output.
    async fn wait_until_absent(&self) {
        for frame in 0..self.config.settle_frames {
            let (tx, rx) = oneshot::channel();
            self.surface.request_frame(Box::new(move || {
                let _ = tx.send(());
            }));
            match tokio::time::timeout(self.config.frame_timeout, rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("[Overlay] Frame callback {} dropped", frame + 1),
                Err(_) => warn!("[Overlay] Frame {} not acknowledged in {:?}", frame + 1, self.config.frame_timeout),
            }
        }
        tokio::time::sleep(self.config.settle_margin).await;
    }

    /// Shows a status line. While suspended or behind a voice overlay the
    /// text lands in the saved visible state and appears when it returns.
    pub async fn show_status(&self, text: &str, is_running: bool, stop_handle: Option<StopHandle>) -> bool {
        let mut state = self.state.lock().await;
        let next = VisibleState::new(text, is_running, stop_handle);
        let updated = match std::mem::replace(&mut *state, OverlayState::Hidden) {
            OverlayState::Suspended { voice, .. } => OverlayState::Suspended { cached: next, voice },
            OverlayState::RecordingOverlay { .. } => OverlayState::RecordingOverlay { underlying: next },
            OverlayState::ReviewOverlay { text, .. } => OverlayState::ReviewOverlay { underlying: next, text },
            OverlayState::Hidden | OverlayState::Visible(_) | OverlayState::TaskCompleted { .. } => {
                OverlayState::Visible(next)
            }
        };
        if updated.kind() != OverlayKind::Suspended {
            self.surface.render(&updated);
        }
        *state = updated;
        self.published.send_replace(state.clone());
        true
    }

    /// Hides the indicator, and any voice overlay over it, for a capture or
    /// gesture. Returns true only when this call moved the overlay into
    /// `Suspended`.
    pub async fn suspend(&self) -> bool {
        self.transition_with("suspend", OverlayState::suspended).await
    }

    /// Brings back what `suspend` hid. No-op unless suspended.
    pub async fn restore(&self) -> bool {
        self.transition_with("restore", OverlayState::resumed).await
    }

    pub async fn start_recording(&self) -> bool {
        self.transition_with("start_recording", |current| match current {
            OverlayState::Visible(v) => Some(OverlayState::RecordingOverlay { underlying: v.clone() }),
            OverlayState::ReviewOverlay { underlying, .. } => {
                Some(OverlayState::RecordingOverlay { underlying: underlying.clone() })
            }
            _ => None,
        })
        .await
    }

    pub async fn show_review(&self, text: &str) -> bool {
        let text = text.to_string();
        self.transition_with("show_review", move |current| match current {
            OverlayState::RecordingOverlay { underlying } => Some(OverlayState::ReviewOverlay {
                underlying: underlying.clone(),
                text,
            }),
            _ => None,
        })
        .await
    }

    /// Leaves a voice overlay, returning to the visible state underneath.
    pub async fn dismiss(&self) -> bool {
        self.transition_with("dismiss", |current| match current {
            OverlayState::RecordingOverlay { underlying } | OverlayState::ReviewOverlay { underlying, .. } => {
                Some(OverlayState::Visible(underlying.clone()))
            }
            _ => None,
        })
        .await
    }

    /// Shows the completion card. Behind a voice overlay or while suspended
    /// the message folds into the saved visible state instead, as an idle
    /// status without a stop button.
    pub async fn complete(&self, status_text: &str) -> bool {
        if matches!(
            self.kind(),
            OverlayKind::Recording | OverlayKind::Review | OverlayKind::Suspended
        ) {
            return self.show_status(status_text, false, None).await;
        }
        let status_text = status_text.to_string();
        self.transition_with("complete", move |_| Some(OverlayState::TaskCompleted { status_text }))
            .await
    }

    pub async fn hide(&self) -> bool {
        self.transition_with("hide", |current| match current {
            OverlayState::Hidden => None,
            _ => Some(OverlayState::Hidden),
        })
        .await
    }

    /// Moves a visible indicator off `(x, y)` to the opposite screen half.
    /// Moves smaller than the hysteresis threshold are skipped to avoid
    /// jitter on targets near the boundary.
    pub async fn avoid_point(&self, x: i32, y: i32, screen: ScreenSize) -> bool {
        let state = self.state.lock().await;
        if !matches!(&*state, OverlayState::Visible(_)) {
            return false;
        }

        let bounds = self.surface.bounds();
        if bounds.is_empty() || !bounds.contains(x, y) {
            return false;
        }

        let to_bottom = y < screen.height / 2;
        let new_top = if to_bottom {
            screen.height - self.config.bottom_offset_px - bounds.height
        } else {
            self.config.top_offset_px
        };
        let displacement = (new_top - bounds.top).abs();
        if displacement <= self.config.avoid_hysteresis_px {
            debug!("[Overlay] Skipping {}px move (hysteresis {}px)", displacement, self.config.avoid_hysteresis_px);
            return false;
        }

        if to_bottom {
            self.surface.move_to_bottom(self.config.bottom_offset_px);
        } else {
            self.surface.move_to_top(self.config.top_offset_px);
        }
        info!("[Overlay] Moved {} to clear ({}, {})", if to_bottom { "down" } else { "up" }, x, y);
        true
    }
}
