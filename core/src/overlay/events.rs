use tracing::info;

use super::machine::OverlayStateMachine;
use super::state::OverlayState;

/// User input forwarded by the UI collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    StopPressed,
    MicPressed,
    TranscriptReady(String),
    ReviewConfirmed,
    OverlayDismissed,
}

/// Applies a UI event. Returns the reviewed transcript when the user confirms
/// a voice review, so the caller can submit it as a new goal.
pub async fn handle_ui_event(machine: &OverlayStateMachine, event: UiEvent) -> Option<String> {
    match event {
        UiEvent::StopPressed => {
            let current = machine.current();
            let Some(visible) = current.visible_payload() else {
                return None;
            };
            if let Some(handle) = &visible.stop_handle {
                info!("[Overlay] Stop pressed");
                handle.stop();
                machine.show_status("Stopping...", false, None).await;
            }
            None
        }
        UiEvent::MicPressed => {
            machine.start_recording().await;
            None
        }
        UiEvent::TranscriptReady(text) => {
            machine.show_review(&text).await;
            None
        }
        UiEvent::ReviewConfirmed => {
            let text = match machine.current() {
                OverlayState::ReviewOverlay { text, .. } => Some(text),
                _ => None,
            };
            if text.is_some() {
                machine.dismiss().await;
            }
            text
        }
        UiEvent::OverlayDismissed => {
            match machine.current() {
                OverlayState::RecordingOverlay { .. } | OverlayState::ReviewOverlay { .. } => {
                    machine.dismiss().await;
                }
                OverlayState::TaskCompleted { .. } => {
                    machine.hide().await;
                }
                OverlayState::Visible(v) if !v.is_running => {
                    machine.hide().await;
                }
                _ => {}
            }
            None
        }
    }
}
