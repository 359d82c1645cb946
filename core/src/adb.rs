//! Android device backend over `adb`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bridge::{CaptureCallback, GestureCallback, GestureDescription, GestureResult, PlatformPrimitives, RawFrame};
use crate::config::DeviceConfig;
use crate::error::AgentError;
use crate::executor::DeviceControl;
use crate::resolver::AppInventory;
use crate::screen::ScreenSize;

static WM_SIZE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(Physical|Override) size:\s*(\d+)x(\d+)").ok());
static FOCUSED_COMPONENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"mCurrentFocus=Window\{\S+ \S+ ([A-Za-z0-9_.]+)/").ok());

const KEYCODE_HOME: &str = "3";
const KEYCODE_BACK: &str = "4";

/// Package segments that never help tell apps apart.
const GENERIC_SEGMENTS: &[&str] = &["com", "org", "net", "io", "android", "google", "apps", "app", "mobile"];

#[derive(Debug, Clone)]
struct Adb {
    path: String,
    serial: Option<String>,
    timeout: Duration,
}

impl Adb {
    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args).kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("adb {} timed out", args.join(" ")))?
            .with_context(|| format!("Failed to run {}", self.path))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(anyhow::anyhow!("adb {}: {}", args.join(" "), stderr))
        }
    }

    async fn shell(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let out = self.run(&full).await?;
        Ok(String::from_utf8_lossy(&out).to_string())
    }
}

/// Sorts adb failures into "device gone" and "this command failed".
fn classify(error: anyhow::Error) -> AgentError {
    let message = format!("{:#}", error);
    let lower = message.to_lowercase();
    if lower.contains("device offline")
        || lower.contains("no devices")
        || lower.contains("device not found")
        || lower.contains("unauthorized")
        || lower.contains("failed to run")
    {
        AgentError::ExecutorUnavailable(message)
    } else {
        AgentError::ActionDispatchFailure(message)
    }
}

pub struct AdbDevice {
    adb: Adb,
    screen: ScreenSize,
}

impl AdbDevice {
    /// Queries the display size once; it is assumed fixed for the session.
    pub async fn connect(config: &DeviceConfig) -> Result<Self> {
        let adb = Adb {
            path: config.adb_path.clone(),
            serial: config.serial.clone(),
            timeout: config.command_timeout,
        };
        let output = adb.shell(&["wm", "size"]).await.context("Could not reach device")?;
        let screen = parse_wm_size(&output).with_context(|| format!("Unexpected `wm size` output: {}", output.trim()))?;
        info!("[ADB] Connected, screen {}x{}", screen.width, screen.height);
        Ok(Self { adb, screen })
    }

    async fn keyevent(&self, code: &str) -> Result<(), AgentError> {
        self.adb
            .shell(&["input", "keyevent", code])
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[async_trait]
impl PlatformPrimitives for AdbDevice {
    fn screen_size(&self) -> ScreenSize {
        self.screen
    }

    fn take_screenshot(&self, on_result: CaptureCallback) {
        let adb = self.adb.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            on_result(Err("no async runtime".to_string()));
            return;
        };
        handle.spawn(async move {
            let result = adb
                .run(&["exec-out", "screencap", "-p"])
                .await
                .map(RawFrame::Encoded)
                .map_err(|e| format!("{:#}", e));
            on_result(result);
        });
    }

    fn dispatch_gesture(&self, gesture: GestureDescription, on_done: GestureCallback) -> bool {
        let Some(args) = input_args(&gesture) else {
            warn!("[ADB] Empty gesture");
            return false;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let adb = self.adb.clone();
        handle.spawn(async move {
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let result = match adb.shell(&refs).await {
                Ok(_) => GestureResult::Completed,
                Err(e) => {
                    warn!("[ADB] Gesture failed: {:#}", e);
                    GestureResult::Cancelled
                }
            };
            on_done(result);
        });
        true
    }

    async fn current_app(&self) -> Option<String> {
        match self.adb.shell(&["dumpsys", "window"]).await {
            Ok(out) => parse_focused_package(&out),
            Err(e) => {
                debug!("[ADB] dumpsys window failed: {:#}", e);
                None
            }
        }
    }
}

#[async_trait]
impl DeviceControl for AdbDevice {
    async fn input_text(&self, text: &str) -> Result<(), AgentError> {
        let escaped = escape_input_text(text);
        self.adb
            .shell(&["input", "text", &escaped])
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn back(&self) -> Result<(), AgentError> {
        self.keyevent(KEYCODE_BACK).await
    }

    async fn home(&self) -> Result<(), AgentError> {
        self.keyevent(KEYCODE_HOME).await
    }

    async fn launch(&self, package: &str) -> Result<(), AgentError> {
        let out = self
            .adb
            .shell(&["monkey", "-p", package, "-c", "android.intent.category.LAUNCHER", "1"])
            .await
            .map_err(classify)?;
        // monkey exits 0 even when there is nothing to launch.
        if out.contains("No activities found") {
            return Err(AgentError::ActionDispatchFailure(format!("{} has no launcher activity", package)));
        }
        Ok(())
    }
}

#[async_trait]
impl AppInventory for AdbDevice {
    async fn list_installed_apps(&self) -> Result<Vec<(String, String)>> {
        let out = self.adb.shell(&["pm", "list", "packages", "-3"]).await?;
        Ok(parse_packages(&out)
            .into_iter()
            .filter_map(|pkg| display_name_for_package(&pkg).map(|name| (name, pkg)))
            .collect())
    }
}

/// `input` arguments for the first stroke: a tap for a single point, a swipe
/// between the first and last points otherwise.
fn input_args(gesture: &GestureDescription) -> Option<Vec<String>> {
    let stroke = gesture.strokes.first()?;
    let first = stroke.path.first()?;
    let last = stroke.path.last()?;
    let mut args = vec!["input".to_string()];
    if stroke.path.len() == 1 {
        args.extend(["tap".to_string(), first.x.to_string(), first.y.to_string()]);
    } else {
        args.extend([
            "swipe".to_string(),
            first.x.to_string(),
            first.y.to_string(),
            last.x.to_string(),
            last.y.to_string(),
            stroke.duration.as_millis().to_string(),
        ]);
    }
    Some(args)
}

/// Prefers the override size, which is what `input` coordinates use.
pub fn parse_wm_size(output: &str) -> Option<ScreenSize> {
    let re = WM_SIZE.as_ref()?;
    let mut physical = None;
    for caps in re.captures_iter(output) {
        let size = ScreenSize::new(caps[2].parse().ok()?, caps[3].parse().ok()?);
        if &caps[1] == "Override" {
            return Some(size);
        }
        physical = Some(size);
    }
    physical
}

pub fn parse_focused_package(dumpsys: &str) -> Option<String> {
    let caps = FOCUSED_COMPONENT.as_ref()?.captures(dumpsys)?;
    Some(caps[1].to_string())
}

pub fn parse_packages(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Guesses a display name from a package id: `com.spotify.music` ->
/// `Spotify Music`.
pub fn display_name_for_package(package: &str) -> Option<String> {
    let words: Vec<String> = package
        .split('.')
        .filter(|seg| !seg.is_empty() && !GENERIC_SEGMENTS.contains(seg))
        .map(|seg| {
            let mut chars = seg.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}

/// `input text` takes one shell word: spaces become `%s` and shell
/// metacharacters are backslash-escaped.
pub fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\\' | '\'' | '"' | '(' | ')' | '&' | '<' | '>' | ';' | '|' | '*' | '~' | '?' | '!' | '$' | '#' | '`' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
