use tokio_util::sync::CancellationToken;

/// The stop button's link back to the running task.
#[derive(Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle").field("stopped", &self.is_stopped()).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisibleState {
    pub status_text: String,
    pub is_running: bool,
    pub stop_handle: Option<StopHandle>,
}

impl VisibleState {
    pub fn new(status_text: impl Into<String>, is_running: bool, stop_handle: Option<StopHandle>) -> Self {
        Self {
            status_text: status_text.into(),
            is_running,
            stop_handle,
        }
    }
}

/// Voice overlay that was up when the indicator got suspended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceLayer {
    Recording,
    Review { text: String },
}

#[derive(Debug, Clone)]
pub enum OverlayState {
    Hidden,
    Visible(VisibleState),
    /// Hidden for a capture or gesture. `cached`, and `voice` on top of it
    /// when present, come back on restore.
    Suspended { cached: VisibleState, voice: Option<VoiceLayer> },
    RecordingOverlay { underlying: VisibleState },
    ReviewOverlay { underlying: VisibleState, text: String },
    TaskCompleted { status_text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    Hidden,
    Visible,
    Suspended,
    Recording,
    Review,
    TaskCompleted,
}

impl OverlayKind {
    pub fn can_transition_to(self, target: OverlayKind) -> bool {
        use OverlayKind::*;
        match (self, target) {
            (Hidden, Visible) => true,
            (Hidden, _) => false,

            (Visible, Hidden | Visible | Suspended | Recording | TaskCompleted) => true,
            (Visible, Review) => false,

            (Suspended, Hidden | Visible | Recording | Review) => true,
            (Suspended, _) => false,

            (Recording, Hidden | Visible | Review | Suspended) => true,
            (Recording, _) => false,

            (Review, Hidden | Visible | Recording | Suspended) => true,
            (Review, _) => false,

            (TaskCompleted, Hidden | Visible) => true,
            (TaskCompleted, _) => false,
        }
    }
}

impl OverlayState {
    pub fn kind(&self) -> OverlayKind {
        match self {
            OverlayState::Hidden => OverlayKind::Hidden,
            OverlayState::Visible(_) => OverlayKind::Visible,
            OverlayState::Suspended { .. } => OverlayKind::Suspended,
            OverlayState::RecordingOverlay { .. } => OverlayKind::Recording,
            OverlayState::ReviewOverlay { .. } => OverlayKind::Review,
            OverlayState::TaskCompleted { .. } => OverlayKind::TaskCompleted,
        }
    }

    /// The visible payload this state shows or will return to.
    pub fn visible_payload(&self) -> Option<&VisibleState> {
        match self {
            OverlayState::Visible(v) => Some(v),
            OverlayState::Suspended { cached, .. } => Some(cached),
            OverlayState::RecordingOverlay { underlying } => Some(underlying),
            OverlayState::ReviewOverlay { underlying, .. } => Some(underlying),
            OverlayState::Hidden | OverlayState::TaskCompleted { .. } => None,
        }
    }

    pub fn status_text(&self) -> Option<&str> {
        match self {
            OverlayState::TaskCompleted { status_text } => Some(status_text),
            other => other.visible_payload().map(|v| v.status_text.as_str()),
        }
    }

    /// The state to hide behind for a capture or gesture. `None` when there
    /// is nothing on screen worth bringing back.
    pub fn suspended(&self) -> Option<OverlayState> {
        let (cached, voice) = match self {
            OverlayState::Visible(v) => (v.clone(), None),
            OverlayState::RecordingOverlay { underlying } => (underlying.clone(), Some(VoiceLayer::Recording)),
            OverlayState::ReviewOverlay { underlying, text } => {
                (underlying.clone(), Some(VoiceLayer::Review { text: text.clone() }))
            }
            OverlayState::Hidden | OverlayState::Suspended { .. } | OverlayState::TaskCompleted { .. } => return None,
        };
        Some(OverlayState::Suspended { cached, voice })
    }

    /// Inverse of `suspended`.
    pub fn resumed(&self) -> Option<OverlayState> {
        let OverlayState::Suspended { cached, voice } = self else {
            return None;
        };
        let underlying = cached.clone();
        Some(match voice {
            None => OverlayState::Visible(underlying),
            Some(VoiceLayer::Recording) => OverlayState::RecordingOverlay { underlying },
            Some(VoiceLayer::Review { text }) => OverlayState::ReviewOverlay { underlying, text: text.clone() },
        })
    }

    /// Whether the indicator is on screen and could end up in a screenshot.
    pub fn is_on_screen(&self) -> bool {
        !matches!(self, OverlayState::Hidden | OverlayState::Suspended { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OverlayKind::*;

    const ALL: [OverlayKind; 6] = [Hidden, Visible, Suspended, Recording, Review, TaskCompleted];

    #[test]
    fn hidden_only_goes_visible() {
        for target in ALL {
            assert_eq!(Hidden.can_transition_to(target), target == Visible, "{:?}", target);
        }
    }

    #[test]
    fn suspended_never_nests() {
        assert!(!Suspended.can_transition_to(Suspended));
        assert!(!TaskCompleted.can_transition_to(Suspended));
        assert!(Visible.can_transition_to(Suspended));
        assert!(Recording.can_transition_to(Suspended));
        assert!(Review.can_transition_to(Suspended));
    }

    #[test]
    fn suspension_keeps_the_voice_layer() {
        let v = VisibleState::new("Step 2/20: thinking...", true, None);
        let review = OverlayState::ReviewOverlay { underlying: v.clone(), text: "open maps".into() };

        let hidden = review.suspended().unwrap();
        assert_eq!(hidden.kind(), Suspended);
        assert!(!hidden.is_on_screen());
        assert_eq!(hidden.status_text(), Some("Step 2/20: thinking..."));

        match hidden.resumed().unwrap() {
            OverlayState::ReviewOverlay { underlying, text } => {
                assert_eq!(underlying.status_text, "Step 2/20: thinking...");
                assert_eq!(text, "open maps");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(OverlayState::Visible(v).suspended().unwrap().resumed().unwrap().kind(), Visible);
        assert!(OverlayState::TaskCompleted { status_text: "done".into() }.suspended().is_none());
    }

    #[test]
    fn review_requires_recording_first() {
        assert!(!Visible.can_transition_to(Review));
        assert!(Recording.can_transition_to(Review));
        assert!(Review.can_transition_to(Recording));
    }

    #[test]
    fn every_state_can_hide_except_hidden() {
        for source in ALL {
            assert_eq!(source.can_transition_to(Hidden), source != Hidden);
        }
    }

    #[test]
    fn payload_follows_wrappers() {
        let v = VisibleState::new("Thinking", true, None);
        let review = OverlayState::ReviewOverlay { underlying: v.clone(), text: "open maps".into() };
        assert_eq!(review.status_text(), Some("Thinking"));
        assert!(review.is_on_screen());
        assert!(!OverlayState::Suspended { cached: v, voice: None }.is_on_screen());
    }

    #[test]
    fn stop_handle_cancels_token() {
        let token = CancellationToken::new();
        let handle = StopHandle::new(token.clone());
        handle.stop();
        assert!(token.is_cancelled());
        assert!(handle.is_stopped());
    }
}
