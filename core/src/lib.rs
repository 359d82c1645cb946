pub mod action;
pub mod adb;
pub mod bridge;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod history;
pub mod orchestrator;
pub mod overlay;
pub mod resolver;
pub mod retry_logic;
pub mod screen;
pub mod session_store;

#[cfg(test)]
pub(crate) mod test_support;

pub use action::{parse_decision, ActionCommand, ParsedDecision};
pub use bridge::{GestureBridge, PlatformPrimitives};
pub use config::AgentConfig;
pub use decision::{DecisionService, HttpDecisionClient};
pub use error::AgentError;
pub use executor::{ActionExecutor, DeviceControl, DeviceExecutor};
pub use orchestrator::{TaskOrchestrator, TaskOutcome, TaskPhase, TaskReport};
pub use overlay::{OverlayState, OverlayStateMachine};
pub use resolver::{AppInventory, AppNameResolver};
pub use session_store::{JsonSessionStore, SessionRecorder};
