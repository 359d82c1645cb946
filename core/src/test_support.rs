//! Fakes shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::bridge::{CaptureCallback, GestureCallback, GestureDescription, GestureResult, PlatformPrimitives, RawFrame};
use crate::decision::DecisionService;
use crate::error::AgentError;
use crate::executor::DeviceControl;
use crate::history::HistoryTurn;
use crate::orchestrator::TaskOutcome;
use crate::overlay::{FrameCallback, OverlayKind, OverlayState, OverlaySurface};
use crate::screen::{Rect, ScreenSize};
use crate::session_store::SessionRecorder;

enum FrameMode {
    Immediate,
    Delayed(Duration),
    Silent,
}

pub struct FakeSurface {
    frames: FrameMode,
    bounds: Option<Rect>,
    frame_requests: Mutex<usize>,
    held: Mutex<Vec<FrameCallback>>,
    last_on_screen: Mutex<bool>,
    moves: Mutex<Vec<&'static str>>,
}

impl FakeSurface {
    fn build(frames: FrameMode, bounds: Option<Rect>) -> Self {
        Self {
            frames,
            bounds,
            frame_requests: Mutex::new(0),
            held: Mutex::new(Vec::new()),
            last_on_screen: Mutex::new(false),
            moves: Mutex::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        Self::build(FrameMode::Immediate, None)
    }

    pub fn with_frame_delay(delay: Duration) -> Self {
        Self::build(FrameMode::Delayed(delay), None)
    }

    /// Never acknowledges frames.
    pub fn silent() -> Self {
        Self::build(FrameMode::Silent, None)
    }

    /// Reports `bounds` no matter what was rendered.
    pub fn with_bounds(bounds: Rect) -> Self {
        Self::build(FrameMode::Immediate, Some(bounds))
    }

    pub fn frame_requests(&self) -> usize {
        *self.frame_requests.lock().unwrap()
    }

    pub fn last_rendered_on_screen(&self) -> bool {
        *self.last_on_screen.lock().unwrap()
    }

    pub fn moves(&self) -> Vec<&'static str> {
        self.moves.lock().unwrap().clone()
    }
}

impl OverlaySurface for FakeSurface {
    fn render(&self, state: &OverlayState) {
        *self.last_on_screen.lock().unwrap() = state.is_on_screen();
    }

    fn request_frame(&self, on_frame: FrameCallback) {
        *self.frame_requests.lock().unwrap() += 1;
        match self.frames {
            FrameMode::Immediate => on_frame(),
            FrameMode::Delayed(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    on_frame();
                });
            }
            FrameMode::Silent => self.held.lock().unwrap().push(on_frame),
        }
    }

    fn bounds(&self) -> Rect {
        self.bounds.unwrap_or_default()
    }

    fn move_to_top(&self, _offset_px: i32) {
        self.moves.lock().unwrap().push("top");
    }

    fn move_to_bottom(&self, _offset_px: i32) {
        self.moves.lock().unwrap().push("bottom");
    }
}

enum CaptureMode {
    Blank,
    Fail(String),
    Hang,
}

/// In-memory device. Captures return a blank frame of the screen size and
/// gestures complete immediately unless configured otherwise.
pub struct FakePlatform {
    screen: ScreenSize,
    capture: Mutex<CaptureMode>,
    gesture_result: Mutex<Option<GestureResult>>,
    gestures: Mutex<Vec<GestureDescription>>,
    held_captures: Mutex<Vec<CaptureCallback>>,
    overlay: Mutex<Option<watch::Receiver<OverlayState>>>,
    kinds_during_captures: Mutex<Vec<OverlayKind>>,
    kinds_during_gestures: Mutex<Vec<OverlayKind>>,
}

impl FakePlatform {
    pub fn new(screen: ScreenSize) -> Self {
        Self {
            screen,
            capture: Mutex::new(CaptureMode::Blank),
            gesture_result: Mutex::new(Some(GestureResult::Completed)),
            gestures: Mutex::new(Vec::new()),
            held_captures: Mutex::new(Vec::new()),
            overlay: Mutex::new(None),
            kinds_during_captures: Mutex::new(Vec::new()),
            kinds_during_gestures: Mutex::new(Vec::new()),
        }
    }

    /// Lets the platform note the overlay state at each primitive call.
    pub fn observe(&self, overlay: watch::Receiver<OverlayState>) {
        *self.overlay.lock().unwrap() = Some(overlay);
    }

    fn overlay_kind(&self) -> Option<OverlayKind> {
        self.overlay.lock().unwrap().as_ref().map(|rx| rx.borrow().kind())
    }

    pub fn fail_captures(&self, message: &str) {
        *self.capture.lock().unwrap() = CaptureMode::Fail(message.to_string());
    }

    /// Captures never call back (the callback is kept alive, not dropped).
    pub fn hang_captures(&self) {
        *self.capture.lock().unwrap() = CaptureMode::Hang;
    }

    /// `None` makes the platform refuse gestures outright.
    pub fn set_gesture_result(&self, result: Option<GestureResult>) {
        *self.gesture_result.lock().unwrap() = result;
    }

    pub fn gestures(&self) -> Vec<GestureDescription> {
        self.gestures.lock().unwrap().clone()
    }

    pub fn overlay_kinds_during_captures(&self) -> Vec<OverlayKind> {
        self.kinds_during_captures.lock().unwrap().clone()
    }

    pub fn overlay_kinds_during_gestures(&self) -> Vec<OverlayKind> {
        self.kinds_during_gestures.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformPrimitives for FakePlatform {
    fn screen_size(&self) -> ScreenSize {
        self.screen
    }

    fn take_screenshot(&self, on_result: CaptureCallback) {
        if let Some(kind) = self.overlay_kind() {
            self.kinds_during_captures.lock().unwrap().push(kind);
        }
        match &*self.capture.lock().unwrap() {
            CaptureMode::Blank => {
                let (w, h) = (self.screen.width as u32, self.screen.height as u32);
                on_result(Ok(RawFrame::Rgba {
                    width: w,
                    height: h,
                    pixels: vec![0; (w * h * 4) as usize],
                }));
            }
            CaptureMode::Fail(message) => on_result(Err(message.clone())),
            CaptureMode::Hang => self.held_captures.lock().unwrap().push(on_result),
        }
    }

    fn dispatch_gesture(&self, gesture: GestureDescription, on_done: GestureCallback) -> bool {
        let Some(result) = *self.gesture_result.lock().unwrap() else {
            return false;
        };
        if let Some(kind) = self.overlay_kind() {
            self.kinds_during_gestures.lock().unwrap().push(kind);
        }
        self.gestures.lock().unwrap().push(gesture);
        on_done(result);
        true
    }

    async fn current_app(&self) -> Option<String> {
        Some("com.google.android.apps.nexuslauncher".to_string())
    }
}

#[derive(Default)]
pub struct RecordingControl {
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<AgentError>>,
}

impl RecordingControl {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_with(&self, error: AgentError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    fn record(&self, call: String) -> Result<(), AgentError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for RecordingControl {
    async fn input_text(&self, text: &str) -> Result<(), AgentError> {
        self.record(format!("text {}", text))
    }

    async fn back(&self) -> Result<(), AgentError> {
        self.record("back".to_string())
    }

    async fn home(&self) -> Result<(), AgentError> {
        self.record("home".to_string())
    }

    async fn launch(&self, package: &str) -> Result<(), AgentError> {
        self.record(format!("launch {}", package))
    }
}

/// Replays canned responses; the last one repeats once the script runs out.
pub struct ScriptedDecision {
    responses: Vec<String>,
    failure: Option<String>,
    image_counts: Mutex<Vec<usize>>,
}

impl ScriptedDecision {
    pub fn sequence(responses: &[&str]) -> Self {
        Self {
            responses: responses.iter().map(|r| r.to_string()).collect(),
            failure: None,
            image_counts: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: &str) -> Self {
        Self::sequence(&[response])
    }

    /// Every call fails as a transport error would.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::sequence(&[])
        }
    }

    pub fn calls(&self) -> usize {
        self.image_counts.lock().unwrap().len()
    }

    /// Images present in the history at each call.
    pub fn image_counts(&self) -> Vec<usize> {
        self.image_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionService for ScriptedDecision {
    async fn decide(&self, history: &[HistoryTurn]) -> Result<String> {
        let call = {
            let mut counts = self.image_counts.lock().unwrap();
            counts.push(history.iter().filter(|t| t.has_image()).count());
            counts.len() - 1
        };
        if let Some(message) = &self.failure {
            anyhow::bail!("{}", message);
        }
        let index = call.min(self.responses.len().saturating_sub(1));
        self.responses
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("empty script"))
    }
}

#[derive(Default)]
pub struct MemoryRecorder {
    turns: Mutex<HashMap<String, Vec<HistoryTurn>>>,
    outcomes: Mutex<HashMap<String, (TaskOutcome, usize)>>,
}

impl MemoryRecorder {
    pub fn turns(&self, session_id: &str) -> Vec<HistoryTurn> {
        self.turns.lock().unwrap().get(session_id).cloned().unwrap_or_default()
    }

    pub fn outcome(&self, session_id: &str) -> Option<(TaskOutcome, usize)> {
        self.outcomes.lock().unwrap().get(session_id).cloned()
    }
}

#[async_trait]
impl SessionRecorder for MemoryRecorder {
    async fn begin(&self, session_id: &str, _goal: &str) -> Result<()> {
        self.turns.lock().unwrap().insert(session_id.to_string(), Vec::new());
        Ok(())
    }

    async fn record_turn(&self, session_id: &str, turn: &HistoryTurn) -> Result<()> {
        self.turns
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn finish(&self, session_id: &str, outcome: &TaskOutcome, steps: usize) -> Result<()> {
        self.outcomes
            .lock()
            .unwrap()
            .insert(session_id.to_string(), (outcome.clone(), steps));
        Ok(())
    }
}
