use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::action::ActionCommand;
use crate::bridge::GestureBridge;
use crate::config::GestureConfig;
use crate::error::AgentError;
use crate::screen::{Point, ScreenSize};

/// Carries out one parsed action. `Ok(false)` and recoverable errors are
/// dispatch failures the loop reports back; fatal errors end the task.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ActionCommand) -> Result<bool, AgentError>;
}

/// Device operations that are not gestures.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn input_text(&self, text: &str) -> Result<(), AgentError>;
    async fn back(&self) -> Result<(), AgentError>;
    async fn home(&self) -> Result<(), AgentError>;
    async fn launch(&self, package: &str) -> Result<(), AgentError>;
}

/// Maps a point in the relative `0..=scale` space onto the screen. Values
/// outside that range stay outside the screen so the bridge rejects them.
pub fn to_absolute(point: Point, screen: ScreenSize, scale: i32) -> Point {
    if scale <= 0 {
        return point;
    }
    let project = |v: i32, extent: i32| -> i32 { (v as i64 * extent as i64 / scale as i64) as i32 };
    Point::new(project(point.x, screen.width), project(point.y, screen.height))
}

pub struct DeviceExecutor {
    bridge: Arc<GestureBridge>,
    control: Arc<dyn DeviceControl>,
    config: GestureConfig,
}

impl DeviceExecutor {
    pub fn new(bridge: Arc<GestureBridge>, control: Arc<dyn DeviceControl>, config: GestureConfig) -> Self {
        Self { bridge, control, config }
    }

    fn absolute(&self, point: Point) -> Point {
        to_absolute(point, self.bridge.screen_size(), self.config.coordinate_scale)
    }
}

#[async_trait]
impl ActionExecutor for DeviceExecutor {
    async fn execute(&self, action: &ActionCommand) -> Result<bool, AgentError> {
        debug!("[Executor] {:?}", action);
        match action {
            ActionCommand::Tap { at } => {
                let p = self.absolute(*at);
                Ok(self.bridge.dispatch_tap(p.x, p.y).await)
            }
            ActionCommand::DoubleTap { at } => {
                let p = self.absolute(*at);
                if !self.bridge.dispatch_tap(p.x, p.y).await {
                    return Ok(false);
                }
                tokio::time::sleep(self.config.double_tap_gap).await;
                Ok(self.bridge.dispatch_tap(p.x, p.y).await)
            }
            ActionCommand::LongPress { at, duration } => {
                let p = self.absolute(*at);
                Ok(self.bridge.long_press(p.x, p.y, *duration).await)
            }
            ActionCommand::Swipe { from, to, duration } => {
                let (a, b) = (self.absolute(*from), self.absolute(*to));
                Ok(self.bridge.dispatch_swipe(a.x, a.y, b.x, b.y, *duration).await)
            }
            ActionCommand::Type { text } => self.control.input_text(text).await.map(|_| true),
            ActionCommand::Launch { app, package } => match package {
                Some(package) => {
                    info!("[Executor] Launching {} ({})", app, package);
                    self.control.launch(package).await.map(|_| true)
                }
                None => Err(AgentError::UnresolvedAppName(app.clone())),
            },
            ActionCommand::Back => self.control.back().await.map(|_| true),
            ActionCommand::Home => self.control.home().await.map(|_| true),
            ActionCommand::Wait { duration } => {
                tokio::time::sleep(*duration).await;
                Ok(true)
            }
            ActionCommand::Finish { .. } => Ok(true),
            ActionCommand::Error { .. } => Ok(false),
        }
    }
}
