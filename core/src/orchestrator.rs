//! The perception -> decide -> act loop.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{parse_decision, ActionCommand};
use crate::bridge::GestureBridge;
use crate::config::LoopConfig;
use crate::decision::{error_message, DecisionService};
use crate::error::AgentError;
use crate::executor::ActionExecutor;
use crate::history::{perception_text, History, HistoryTurn, ScreenInfo, ACTION_FAILED_NOTICE};
use crate::overlay::{OverlayStateMachine, StopHandle};
use crate::resolver::AppNameResolver;
use crate::session_store::SessionRecorder;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { message: String },
    MaxStepsReached,
    UserStopped,
    Error { reason: String },
}

impl TaskOutcome {
    pub fn message(&self) -> Option<&str> {
        match self {
            TaskOutcome::Completed { message } => Some(message),
            TaskOutcome::Error { reason } => Some(reason),
            TaskOutcome::MaxStepsReached | TaskOutcome::UserStopped => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaskOutcome::Error { .. })
    }

    fn from_error(error: &AgentError) -> Self {
        if error.is_cancellation() {
            TaskOutcome::UserStopped
        } else {
            TaskOutcome::Error { reason: error.status_text() }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Idle,
    Running,
    Completed,
    MaxStepsReached,
    UserStopped,
    Error,
}

impl From<&TaskOutcome> for TaskPhase {
    fn from(outcome: &TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed { .. } => TaskPhase::Completed,
            TaskOutcome::MaxStepsReached => TaskPhase::MaxStepsReached,
            TaskOutcome::UserStopped => TaskPhase::UserStopped,
            TaskOutcome::Error { .. } => TaskPhase::Error,
        }
    }
}

/// State of one `start` call. Lives only inside the orchestrator.
pub struct TaskSession {
    pub id: String,
    pub goal: String,
    pub step: usize,
    pub max_steps: usize,
    pub cancel: CancellationToken,
    pub history: History,
    pub outcome: Option<TaskOutcome>,
}

impl TaskSession {
    fn new(goal: &str, max_steps: usize, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            step: 0,
            max_steps,
            cancel,
            history: History::new(),
            outcome: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub session_id: String,
    pub outcome: TaskOutcome,
    pub steps: usize,
}

/// Clears the active slot however `start` exits, including being dropped.
struct ActiveSlot<'a> {
    orchestrator: &'a TaskOrchestrator,
    token: CancellationToken,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        if let Ok(mut active) = self.orchestrator.active.lock() {
            *active = None;
        }
        if let Ok(mut phase) = self.orchestrator.phase.lock() {
            if *phase == TaskPhase::Running {
                *phase = TaskPhase::UserStopped;
            }
        }
    }
}

/// Resolves to `None` as soon as `token` is cancelled.
async fn unless_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

pub struct TaskOrchestrator {
    bridge: Arc<GestureBridge>,
    decision: Arc<dyn DecisionService>,
    executor: Arc<dyn ActionExecutor>,
    resolver: Arc<AppNameResolver>,
    recorder: Option<Arc<dyn SessionRecorder>>,
    config: LoopConfig,
    phase: Mutex<TaskPhase>,
    active: Mutex<Option<CancellationToken>>,
}

impl TaskOrchestrator {
    pub fn new(
        bridge: Arc<GestureBridge>,
        decision: Arc<dyn DecisionService>,
        executor: Arc<dyn ActionExecutor>,
        resolver: Arc<AppNameResolver>,
        config: LoopConfig,
    ) -> Self {
        Self {
            bridge,
            decision,
            executor,
            resolver,
            recorder: None,
            config,
            phase: Mutex::new(TaskPhase::Idle),
            active: Mutex::new(None),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn SessionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase.lock().map(|p| *p).unwrap_or(TaskPhase::Idle)
    }

    fn overlay(&self) -> &Arc<OverlayStateMachine> {
        self.bridge.overlay()
    }

    /// Requests a cooperative stop of the running task, if any.
    pub fn cancel(&self) {
        if let Ok(active) = self.active.lock() {
            if let Some(token) = active.as_ref() {
                info!("[Loop] Cancel requested");
                token.cancel();
            }
        }
    }

    /// Runs one task to a terminal outcome. Refused while another is running.
    pub async fn start(&self, goal: &str) -> Result<TaskReport, AgentError> {
        let token = CancellationToken::new();
        {
            let mut active = self.active.lock().map_err(|_| AgentError::SessionActive)?;
            if active.is_some() {
                warn!("[Loop] Refusing '{}': a task is already running", goal);
                return Err(AgentError::SessionActive);
            }
            *active = Some(token.clone());
        }
        let _slot = ActiveSlot { orchestrator: self, token: token.clone() };
        self.set_phase(TaskPhase::Running);

        let mut session = TaskSession::new(goal, self.config.max_steps, token);
        info!("[Loop] Task {} started: '{}'", session.id, goal);
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.begin(&session.id, goal).await {
                warn!("[Loop] Recorder begin failed: {}", e);
            }
        }

        let outcome = self.run_steps(&mut session).await;
        session.outcome = Some(outcome.clone());
        self.finish(&session, &outcome).await;

        Ok(TaskReport {
            session_id: session.id,
            outcome,
            steps: session.step,
        })
    }

    async fn run_steps(&self, session: &mut TaskSession) -> TaskOutcome {
        let cancel = session.cancel.clone();
        let stop = StopHandle::new(cancel.clone());

        for step in 1..=session.max_steps {
            session.step = step;
            if cancel.is_cancelled() {
                return TaskOutcome::UserStopped;
            }

            self.overlay()
                .show_status(&format!("Step {}/{}: thinking...", step, session.max_steps), true, Some(stop.clone()))
                .await;

            let capture = self.bridge.capture_detailed(self.config.capture_timeout);
            let screenshot = match unless_cancelled(&cancel, capture).await {
                None => return TaskOutcome::UserStopped,
                Some(Err(e)) => return TaskOutcome::from_error(&e),
                Some(Ok(shot)) => shot,
            };

            let info = ScreenInfo {
                current_app: self.bridge.current_app().await.unwrap_or_else(|| "unknown".to_string()),
                width: screenshot.width(),
                height: screenshot.height(),
            };
            let goal = (step == 1).then_some(session.goal.as_str());
            let text = perception_text(goal, &info);
            self.push_turn(session, HistoryTurn::user(text, Some(screenshot))).await;

            let decide = self.decision.decide(session.history.turns());
            let response = match unless_cancelled(&cancel, decide).await {
                None => return TaskOutcome::UserStopped,
                Some(Err(e)) => {
                    return TaskOutcome::from_error(&AgentError::DecisionError(e.to_string()));
                }
                Some(Ok(text)) => text,
            };
            if let Some(message) = error_message(&response) {
                warn!("[Loop] Decision service reported: {}", message);
                return TaskOutcome::from_error(&AgentError::DecisionError(message.to_string()));
            }

            let parsed = parse_decision(&response);
            if !parsed.reasoning.is_empty() {
                debug!("[Loop] Reasoning: {}", parsed.reasoning);
            }
            self.push_turn(session, HistoryTurn::assistant(response.clone())).await;
            session.history.prune_images();

            let action = match parsed.action {
                ActionCommand::Finish { message } => {
                    info!("[Loop] Finished at step {}: {}", step, message);
                    return TaskOutcome::Completed { message };
                }
                ActionCommand::Launch { app, package: None } => {
                    let package = self.resolver.resolve(&app).await;
                    ActionCommand::Launch { app, package }
                }
                other => other,
            };

            if cancel.is_cancelled() {
                return TaskOutcome::UserStopped;
            }
            info!("[Loop] Step {}/{}: {}", step, session.max_steps, action.kind());
            self.overlay()
                .show_status(&format!("Step {}/{}: {}", step, session.max_steps, action.kind()), true, Some(stop.clone()))
                .await;

            let result = match unless_cancelled(&cancel, self.executor.execute(&action)).await {
                None => return TaskOutcome::UserStopped,
                Some(result) => result,
            };
            if cancel.is_cancelled() {
                return TaskOutcome::UserStopped;
            }

            match result {
                Ok(true) => {}
                Ok(false) => {
                    warn!("[Loop] {} failed", action.kind());
                    self.push_turn(session, HistoryTurn::system(ACTION_FAILED_NOTICE)).await;
                }
                Err(e) if e.is_fatal() => return TaskOutcome::from_error(&e),
                Err(e) => {
                    warn!("[Loop] {} failed: {}", action.kind(), e);
                    self.push_turn(session, HistoryTurn::system(ACTION_FAILED_NOTICE)).await;
                }
            }

            if unless_cancelled(&cancel, tokio::time::sleep(self.config.step_delay)).await.is_none() {
                return TaskOutcome::UserStopped;
            }
        }

        info!("[Loop] Step limit {} reached", session.max_steps);
        TaskOutcome::MaxStepsReached
    }

    async fn push_turn(&self, session: &mut TaskSession, turn: HistoryTurn) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record_turn(&session.id, &turn).await {
                warn!("[Loop] Recorder failed: {}", e);
            }
        }
        session.history.push(turn);
    }

    /// Leaves the overlay showing the outcome, never suspended.
    async fn finish(&self, session: &TaskSession, outcome: &TaskOutcome) {
        self.bridge.ensure_restored().await;
        let overlay = self.overlay();
        match outcome {
            TaskOutcome::Completed { message } => {
                overlay.complete(message).await;
            }
            TaskOutcome::MaxStepsReached => {
                let text = format!("Stopped after {} steps", session.max_steps);
                overlay.show_status(&text, false, None).await;
            }
            TaskOutcome::UserStopped => {
                overlay.show_status(&AgentError::Cancelled.status_text(), false, None).await;
            }
            TaskOutcome::Error { reason } => {
                overlay.show_status(reason, false, None).await;
            }
        }

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.finish(&session.id, outcome, session.step).await {
                warn!("[Loop] Recorder finish failed: {}", e);
            }
        }
        self.set_phase(TaskPhase::from(outcome));
        info!("[Loop] Task {} ended after {} steps: {:?}", session.id, session.step, outcome);
    }

    fn set_phase(&self, next: TaskPhase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GestureConfig, OverlayConfig};
    use crate::executor::DeviceExecutor;
    use crate::overlay::{handle_ui_event, OverlayKind, UiEvent};
    use crate::resolver::StaticInventory;
    use crate::screen::ScreenSize;
    use crate::test_support::{FakePlatform, FakeSurface, MemoryRecorder, RecordingControl, ScriptedDecision};
    use std::time::Duration;

    struct Harness {
        orchestrator: Arc<TaskOrchestrator>,
        platform: Arc<FakePlatform>,
        control: Arc<RecordingControl>,
        decision: Arc<ScriptedDecision>,
        recorder: Arc<MemoryRecorder>,
        overlay: Arc<OverlayStateMachine>,
    }

    fn harness(decision: ScriptedDecision) -> Harness {
        let platform = Arc::new(FakePlatform::new(ScreenSize::new(108, 240)));
        let overlay_config = OverlayConfig {
            settle_margin: Duration::from_millis(1),
            frame_timeout: Duration::from_millis(20),
            ..OverlayConfig::default()
        };
        let overlay = Arc::new(OverlayStateMachine::new(Arc::new(FakeSurface::new()), overlay_config));
        platform.observe(overlay.subscribe());
        let bridge = Arc::new(GestureBridge::new(platform.clone(), overlay.clone(), GestureConfig::default()));
        let control = Arc::new(RecordingControl::default());
        let executor = Arc::new(DeviceExecutor::new(bridge.clone(), control.clone(), GestureConfig::default()));
        let resolver = Arc::new(AppNameResolver::new(Arc::new(StaticInventory::builtin())));
        let decision = Arc::new(decision);
        let recorder = Arc::new(MemoryRecorder::default());
        let config = LoopConfig {
            step_delay: Duration::ZERO,
            capture_timeout: Duration::from_millis(500),
            ..LoopConfig::default()
        };

        let orchestrator = Arc::new(
            TaskOrchestrator::new(bridge, decision.clone(), executor, resolver, config)
                .with_recorder(recorder.clone()),
        );
        Harness { orchestrator, platform, control, decision, recorder, overlay }
    }

    #[tokio::test]
    async fn runs_until_step_limit_without_finish() {
        let h = harness(ScriptedDecision::repeating("Keep looking. {\"action\": \"wait\", \"seconds\": 0}"));
        let report = h.orchestrator.start("find the settings toggle").await.unwrap();

        assert_eq!(report.outcome, TaskOutcome::MaxStepsReached);
        assert_eq!(report.steps, 20);
        assert_eq!(h.decision.calls(), 20);
        assert_eq!(h.orchestrator.phase(), TaskPhase::MaxStepsReached);
        assert_eq!(h.overlay.kind(), OverlayKind::Visible);
    }

    #[tokio::test]
    async fn open_chrome_completes_in_two_steps() {
        let h = harness(ScriptedDecision::sequence(&[
            "Chrome is not open. {\"action\": \"launch\", \"app\": \"Chrome\"}",
            "Chrome is in front. {\"action\": \"finish\", \"message\": \"Chrome is open\"}",
        ]));
        let report = h.orchestrator.start("open Chrome").await.unwrap();

        assert_eq!(report.outcome, TaskOutcome::Completed { message: "Chrome is open".into() });
        assert_eq!(report.steps, 2);
        assert_eq!(h.control.calls(), vec!["launch com.android.chrome"]);
        assert_eq!(h.overlay.kind(), OverlayKind::TaskCompleted);
        assert_eq!(h.orchestrator.phase(), TaskPhase::Completed);
    }

    #[tokio::test]
    async fn decision_error_aborts_at_first_step() {
        let h = harness(ScriptedDecision::repeating("ERROR: model quota exceeded"));
        let report = h.orchestrator.start("open Chrome").await.unwrap();

        assert_eq!(report.outcome, TaskOutcome::Error { reason: "ERROR: model quota exceeded".into() });
        assert_eq!(report.steps, 1);
        assert_ne!(h.overlay.kind(), OverlayKind::Suspended);
        assert_eq!(h.overlay.current().status_text(), Some("ERROR: model quota exceeded"));
        assert!(h.platform.gestures().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_a_decision_error() {
        let h = harness(ScriptedDecision::failing("connection refused"));
        let report = h.orchestrator.start("open Chrome").await.unwrap();
        assert_eq!(report.outcome, TaskOutcome::Error { reason: "connection refused".into() });
        assert_eq!(report.steps, 1);
    }

    #[tokio::test]
    async fn capture_failure_is_fatal() {
        let h = harness(ScriptedDecision::repeating("{\"action\": \"home\"}"));
        h.platform.fail_captures("no permission");
        let report = h.orchestrator.start("go home").await.unwrap();

        assert!(report.outcome.is_error());
        assert_eq!(h.decision.calls(), 0);
        assert_eq!(h.overlay.kind(), OverlayKind::Visible);
    }

    #[tokio::test]
    async fn cancel_during_capture_restores_overlay() {
        let h = harness(ScriptedDecision::repeating("{\"action\": \"home\"}"));
        h.platform.hang_captures();

        let task = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.start("go home").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.overlay.kind(), OverlayKind::Suspended);

        h.orchestrator.cancel();
        let report = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap().unwrap();
        assert_eq!(report.outcome, TaskOutcome::UserStopped);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.overlay.kind(), OverlayKind::Visible);
        assert_eq!(h.overlay.current().status_text(), Some("stopped"));
        assert_eq!(h.orchestrator.phase(), TaskPhase::UserStopped);
    }

    #[tokio::test]
    async fn stop_button_cancels_the_loop() {
        let h = harness(ScriptedDecision::repeating("{\"action\": \"wait\", \"seconds\": 5}"));
        let task = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.start("wait around").await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle_ui_event(&h.overlay, UiEvent::StopPressed).await;
        let report = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap().unwrap();
        assert_eq!(report.outcome, TaskOutcome::UserStopped);
        assert_eq!(report.steps, 1);
    }

    #[tokio::test]
    async fn second_start_is_refused_while_running() {
        let h = harness(ScriptedDecision::repeating("{\"action\": \"wait\", \"seconds\": 5}"));
        let task = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.start("first").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.orchestrator.start("second").await, Err(AgentError::SessionActive));
        assert_eq!(h.orchestrator.phase(), TaskPhase::Running);
        h.orchestrator.cancel();
        let first = task.await.unwrap().unwrap();
        assert_eq!(first.outcome, TaskOutcome::UserStopped);
        assert_eq!(h.orchestrator.phase(), TaskPhase::UserStopped);
    }

    #[tokio::test]
    async fn slot_is_released_after_a_task_ends() {
        let h = harness(ScriptedDecision::repeating("{\"action\": \"finish\", \"message\": \"ok\"}"));
        assert_eq!(h.orchestrator.phase(), TaskPhase::Idle);
        assert!(h.orchestrator.start("one").await.is_ok());
        let again = h.orchestrator.start("two").await.unwrap();
        assert_eq!(again.outcome, TaskOutcome::Completed { message: "ok".into() });
        assert_eq!(again.steps, 1);
    }

    #[tokio::test]
    async fn open_voice_overlay_stays_out_of_captures_and_keeps_the_result() {
        let h = harness(ScriptedDecision::repeating("{\"action\": \"finish\", \"message\": \"ok\"}"));
        h.overlay.show_status("Ready", false, None).await;
        h.overlay.start_recording().await;

        let report = h.orchestrator.start("one").await.unwrap();
        assert_eq!(report.outcome, TaskOutcome::Completed { message: "ok".into() });
        assert_eq!(h.platform.overlay_kinds_during_captures(), vec![OverlayKind::Suspended]);
        assert_eq!(h.overlay.kind(), OverlayKind::Recording);

        h.overlay.dismiss().await;
        match h.overlay.current() {
            crate::overlay::OverlayState::Visible(v) => {
                assert_eq!(v.status_text, "ok");
                assert!(!v.is_running);
                assert!(v.stop_handle.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_actions_are_fed_back_and_images_pruned() {
        let h = harness(ScriptedDecision::sequence(&[
            "{\"action\": \"launch\", \"app\": \"Qwxyzzy Frobnicator\"}",
            "{\"action\": \"tap\", \"element\": [500, 500]}",
            "{\"action\": \"finish\", \"message\": \"done\"}",
        ]));
        let report = h.orchestrator.start("open the frobnicator").await.unwrap();
        assert_eq!(report.steps, 3);

        // Only the newest perception turn ever reaches the service with an image.
        assert_eq!(h.decision.image_counts(), vec![1, 1, 1]);

        let turns = h.recorder.turns(&report.session_id);
        let notices = turns.iter().filter(|t| t.text.as_deref() == Some(ACTION_FAILED_NOTICE)).count();
        assert_eq!(notices, 1);
        assert_eq!(h.platform.gestures().len(), 1);

        // First perception carries the goal, later ones only metadata.
        let perception: Vec<_> = turns.iter().filter(|t| t.role == crate::history::Role::User).collect();
        assert!(perception[0].text.as_deref().unwrap().starts_with("open the frobnicator"));
        assert!(perception[1].text.as_deref().unwrap().starts_with("** Screen Info **"));
        assert_eq!(h.recorder.outcome(&report.session_id), Some((TaskOutcome::Completed { message: "done".into() }, 3)));
    }
}
