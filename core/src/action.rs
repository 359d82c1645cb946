//! Decision text -> `ActionCommand`.
//!
//! The decision service answers with free-form reasoning followed by one JSON
//! object, e.g. `{"action": "tap", "element": [500, 320]}`. Coordinates are in
//! the relative space configured by `GestureConfig::coordinate_scale`.

use serde_json::{Map, Value};
use std::time::Duration;

use crate::screen::Point;

const DEFAULT_LONG_PRESS_MS: u64 = 800;
const DEFAULT_SWIPE_MS: u64 = 500;
const DEFAULT_WAIT_SECS: f64 = 2.0;
/// Swipe length, in relative units, when only a direction is given.
const DIRECTION_SWIPE_SPAN: i32 = 300;

#[derive(Debug, Clone, PartialEq)]
pub enum ActionCommand {
    Tap { at: Point },
    DoubleTap { at: Point },
    LongPress { at: Point, duration: Duration },
    Swipe { from: Point, to: Point, duration: Duration },
    Type { text: String },
    /// `package` is filled in by the resolver before dispatch.
    Launch { app: String, package: Option<String> },
    Back,
    Home,
    Wait { duration: Duration },
    Finish { message: String },
    Error { reason: String },
}

impl ActionCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionCommand::Tap { .. } => "tap",
            ActionCommand::DoubleTap { .. } => "double_tap",
            ActionCommand::LongPress { .. } => "long_press",
            ActionCommand::Swipe { .. } => "swipe",
            ActionCommand::Type { .. } => "type",
            ActionCommand::Launch { .. } => "launch",
            ActionCommand::Back => "back",
            ActionCommand::Home => "home",
            ActionCommand::Wait { .. } => "wait",
            ActionCommand::Finish { .. } => "finish",
            ActionCommand::Error { .. } => "error",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, ActionCommand::Finish { .. })
    }

    fn error(reason: impl Into<String>) -> Self {
        ActionCommand::Error { reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub reasoning: String,
    pub action: ActionCommand,
}

/// Splits `text` into the reasoning before the JSON payload and the payload
/// itself. Fenced ```json blocks win over bare braces.
fn split_payload(text: &str) -> Option<(String, String)> {
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end_offset) = text[content_start..].find("```") {
            let end = content_start + end_offset;
            return Some((
                text[..start].trim().to_string(),
                text[content_start..end].trim().to_string(),
            ));
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some((text[..start].trim().to_string(), text[start..=end].to_string()))
}

fn normalize_action_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase().replace([' ', '-'], "_");
    match lower.as_str() {
        "click" | "click_visual" | "ui.click" | "press" => "tap".to_string(),
        "doubletap" | "double_click" => "double_tap".to_string(),
        "longpress" | "long_click" | "hold" => "long_press".to_string(),
        "scroll" | "drag" | "fling" => "swipe".to_string(),
        "input" | "type_text" | "type_name" | "ui.type" => "type".to_string(),
        "open" | "open_app" | "switch_app" | "activate_app" | "start_app" => "launch".to_string(),
        "go_back" | "press_back" => "back".to_string(),
        "go_home" | "press_home" => "home".to_string(),
        "sleep" | "pause" => "wait".to_string(),
        "done" | "report" | "reply" | "complete" => "finish".to_string(),
        "fail" | "abort" => "error".to_string(),
        other => other.to_string(),
    }
}

fn get_string_any(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(val) = obj.get(*key).and_then(|v| v.as_str()) {
            let trimmed = val.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn point_from_value(value: &Value) -> Option<Point> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    let x = arr[0].as_f64()?;
    let y = arr[1].as_f64()?;
    Some(Point::new(x.round() as i32, y.round() as i32))
}

fn get_point_any(obj: &Map<String, Value>, keys: &[&str]) -> Option<Point> {
    for key in keys {
        if let Some(p) = obj.get(*key).and_then(point_from_value) {
            return Some(p);
        }
    }
    match (obj.get("x").and_then(|v| v.as_f64()), obj.get("y").and_then(|v| v.as_f64())) {
        (Some(x), Some(y)) => Some(Point::new(x.round() as i32, y.round() as i32)),
        _ => None,
    }
}

fn get_millis(obj: &Map<String, Value>, default_ms: u64) -> Duration {
    if let Some(ms) = obj.get("duration_ms").and_then(|v| v.as_f64()) {
        return Duration::from_millis(ms.max(0.0) as u64);
    }
    if let Some(ms) = obj.get("duration").and_then(|v| v.as_f64()) {
        return Duration::from_millis(ms.max(0.0) as u64);
    }
    if let Some(secs) = obj.get("seconds").and_then(|v| v.as_f64()) {
        return Duration::from_secs_f64(secs.max(0.0));
    }
    Duration::from_millis(default_ms)
}

fn swipe_end_for_direction(from: Point, direction: &str) -> Option<Point> {
    // The direction is where the finger travels: "up" moves it toward the
    // top of the screen, which brings content from further down into view.
    match direction.trim().to_lowercase().as_str() {
        "up" => Some(Point::new(from.x, from.y - DIRECTION_SWIPE_SPAN)),
        "down" => Some(Point::new(from.x, from.y + DIRECTION_SWIPE_SPAN)),
        "left" => Some(Point::new(from.x - DIRECTION_SWIPE_SPAN, from.y)),
        "right" => Some(Point::new(from.x + DIRECTION_SWIPE_SPAN, from.y)),
        _ => None,
    }
}

fn action_from_object(obj: &Map<String, Value>) -> ActionCommand {
    let raw = get_string_any(obj, &["action", "type", "tool"]).unwrap_or_default();
    if raw.is_empty() {
        return ActionCommand::error("Missing action field");
    }

    match normalize_action_name(&raw).as_str() {
        "tap" => match get_point_any(obj, &["element", "point", "coordinates", "at"]) {
            Some(at) => ActionCommand::Tap { at },
            None => ActionCommand::error("tap requires 'element'"),
        },
        "double_tap" => match get_point_any(obj, &["element", "point", "coordinates", "at"]) {
            Some(at) => ActionCommand::DoubleTap { at },
            None => ActionCommand::error("double_tap requires 'element'"),
        },
        "long_press" => match get_point_any(obj, &["element", "point", "coordinates", "at"]) {
            Some(at) => ActionCommand::LongPress {
                at,
                duration: get_millis(obj, DEFAULT_LONG_PRESS_MS),
            },
            None => ActionCommand::error("long_press requires 'element'"),
        },
        "swipe" => {
            let duration = get_millis(obj, DEFAULT_SWIPE_MS);
            let from = obj.get("start").and_then(point_from_value);
            let to = obj.get("end").and_then(point_from_value);
            match (from, to) {
                (Some(from), Some(to)) => ActionCommand::Swipe { from, to, duration },
                _ => {
                    let origin = get_point_any(obj, &["element", "point"])
                        .unwrap_or_else(|| Point::new(500, 500));
                    match get_string_any(obj, &["direction"])
                        .and_then(|dir| swipe_end_for_direction(origin, &dir))
                    {
                        Some(to) => ActionCommand::Swipe { from: origin, to, duration },
                        None => ActionCommand::error("swipe requires 'start' and 'end'"),
                    }
                }
            }
        }
        "type" => match obj.get("text").and_then(|v| v.as_str()) {
            Some(text) => ActionCommand::Type { text: text.to_string() },
            None => ActionCommand::error("type requires 'text'"),
        },
        "launch" => match get_string_any(obj, &["app", "name", "package"]) {
            Some(app) => ActionCommand::Launch { app, package: None },
            None => ActionCommand::error("launch requires 'app'"),
        },
        "back" => ActionCommand::Back,
        "home" => ActionCommand::Home,
        "wait" => ActionCommand::Wait {
            duration: get_millis(obj, (DEFAULT_WAIT_SECS * 1000.0) as u64),
        },
        "finish" => ActionCommand::Finish {
            message: get_string_any(obj, &["message", "text", "reason"])
                .unwrap_or_else(|| "Task completed".to_string()),
        },
        "error" => ActionCommand::error(
            get_string_any(obj, &["reason", "message"]).unwrap_or_else(|| "Agent gave up".to_string()),
        ),
        other => ActionCommand::error(format!("Unknown action: {}", other)),
    }
}

/// Never fails: anything unusable becomes `ActionCommand::Error`, which the
/// loop feeds back as a failed action.
pub fn parse_decision(text: &str) -> ParsedDecision {
    let Some((reasoning, payload)) = split_payload(text) else {
        return ParsedDecision {
            reasoning: text.trim().to_string(),
            action: ActionCommand::error("No action JSON found in response"),
        };
    };

    let mut value: Value = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(e) => {
            return ParsedDecision {
                reasoning,
                action: ActionCommand::error(format!("Invalid action JSON: {}", e)),
            }
        }
    };

    // {"action": {"action": "tap", ...}} shows up often enough to flatten.
    if value.get("action").map(|v| v.is_object()).unwrap_or(false) {
        value = value["action"].clone();
    }

    let action = match value.as_object() {
        Some(obj) => action_from_object(obj),
        None => ActionCommand::error("Action must be a JSON object"),
    };

    ParsedDecision { reasoning, action }
}
