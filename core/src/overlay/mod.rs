//! Status overlay: state model, the serialized state machine that owns the
//! render surface, UI event routing and a console surface for headless runs.

pub mod console;
pub mod events;
pub mod machine;
pub mod state;

pub use console::ConsoleOverlay;
pub use events::{handle_ui_event, UiEvent};
pub use machine::{FrameCallback, OverlayStateMachine, OverlaySurface};
pub use state::{OverlayKind, OverlayState, StopHandle, VisibleState, VoiceLayer};
