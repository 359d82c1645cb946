use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_steps: usize,
    pub capture_timeout: Duration,
    pub step_delay: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            capture_timeout: Duration::from_millis(5000),
            step_delay: Duration::from_millis(2000),
        }
    }
}

/// Timing and placement constants for the status overlay. These were tuned
/// against one rendering pipeline; treat them as knobs.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub settle_frames: usize,
    pub settle_margin: Duration,
    /// Upper bound on a single frame acknowledgement.
    pub frame_timeout: Duration,
    pub avoid_hysteresis_px: i32,
    pub top_offset_px: i32,
    pub bottom_offset_px: i32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            settle_frames: 2,
            settle_margin: Duration::from_millis(16),
            frame_timeout: Duration::from_millis(250),
            avoid_hysteresis_px: 200,
            top_offset_px: 120,
            bottom_offset_px: 240,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GestureConfig {
    pub swipe_gesture: Duration,
    pub double_tap_gap: Duration,
    /// Decision coordinates are expressed in `0..coordinate_scale` on both axes.
    pub coordinate_scale: i32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            swipe_gesture: Duration::from_millis(500),
            double_tap_gap: Duration::from_millis(100),
            coordinate_scale: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            max_tokens: 1024,
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub adb_path: String,
    pub serial: Option<String>,
    pub command_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            serial: None,
            command_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub run: LoopConfig,
    pub overlay: OverlayConfig,
    pub gesture: GestureConfig,
    pub decision: DecisionConfig,
    pub device: DeviceConfig,
    pub session_dir: Option<PathBuf>,
    pub persist_sessions: bool,
}

impl AgentConfig {
    /// Reads `.env` (if present) and `PILOT_*` variables on top of the defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = AgentConfig::default();

        let run = LoopConfig {
            max_steps: env_parse("PILOT_MAX_STEPS")
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.run.max_steps),
            capture_timeout: env_millis("PILOT_CAPTURE_TIMEOUT_MS")
                .unwrap_or(defaults.run.capture_timeout),
            step_delay: env_millis("PILOT_STEP_DELAY_MS").unwrap_or(defaults.run.step_delay),
        };

        let overlay = OverlayConfig {
            settle_frames: env_parse("PILOT_SETTLE_FRAMES").unwrap_or(defaults.overlay.settle_frames),
            settle_margin: env_millis("PILOT_SETTLE_MARGIN_MS")
                .unwrap_or(defaults.overlay.settle_margin),
            frame_timeout: env_millis("PILOT_FRAME_TIMEOUT_MS")
                .unwrap_or(defaults.overlay.frame_timeout),
            avoid_hysteresis_px: env_parse("PILOT_OVERLAY_HYSTERESIS_PX")
                .unwrap_or(defaults.overlay.avoid_hysteresis_px),
            top_offset_px: env_parse("PILOT_OVERLAY_TOP_OFFSET_PX")
                .unwrap_or(defaults.overlay.top_offset_px),
            bottom_offset_px: env_parse("PILOT_OVERLAY_BOTTOM_OFFSET_PX")
                .unwrap_or(defaults.overlay.bottom_offset_px),
        };

        let gesture = GestureConfig {
            swipe_gesture: env_millis("PILOT_SWIPE_GESTURE_MS")
                .unwrap_or(defaults.gesture.swipe_gesture),
            double_tap_gap: env_millis("PILOT_DOUBLE_TAP_GAP_MS")
                .unwrap_or(defaults.gesture.double_tap_gap),
            coordinate_scale: env_parse("PILOT_COORDINATE_SCALE")
                .filter(|v: &i32| *v > 0)
                .unwrap_or(defaults.gesture.coordinate_scale),
        };

        let api_key = env_string("PILOT_DECISION_API_KEY").or_else(|| env_string("OPENAI_API_KEY"));
        let decision = DecisionConfig {
            base_url: env_string("PILOT_DECISION_URL").unwrap_or(defaults.decision.base_url),
            model: env_string("PILOT_DECISION_MODEL").unwrap_or(defaults.decision.model),
            api_key,
            max_tokens: env_parse("PILOT_DECISION_MAX_TOKENS").unwrap_or(defaults.decision.max_tokens),
            request_timeout: defaults.decision.request_timeout,
        };

        let device = DeviceConfig {
            adb_path: env_string("PILOT_ADB_PATH").unwrap_or(defaults.device.adb_path),
            serial: env_string("PILOT_ADB_SERIAL"),
            command_timeout: env_millis("PILOT_ADB_TIMEOUT_MS")
                .unwrap_or(defaults.device.command_timeout),
        };

        let session_dir = env_string("PILOT_SESSION_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".device_pilot").join("sessions")));

        Self {
            run,
            overlay,
            gesture,
            decision,
            device,
            session_dir,
            persist_sessions: env_flag("PILOT_PERSIST_SESSIONS", true),
        }
    }
}

pub fn env_flag(key: &str, default_val: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default_val,
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_loop_contract() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.run.max_steps, 20);
        assert_eq!(cfg.run.capture_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.run.step_delay, Duration::from_millis(2000));
        assert_eq!(cfg.overlay.settle_frames, 2);
        assert_eq!(cfg.overlay.settle_margin, Duration::from_millis(16));
        assert_eq!(cfg.overlay.avoid_hysteresis_px, 200);
        assert_eq!(cfg.gesture.swipe_gesture, Duration::from_millis(500));
    }

    #[test]
    fn reads_overrides_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("PILOT_MAX_STEPS", "7");
        std::env::set_var("PILOT_OVERLAY_HYSTERESIS_PX", "150");
        std::env::set_var("PILOT_STEP_DELAY_MS", "10");

        let cfg = AgentConfig::from_env();
        assert_eq!(cfg.run.max_steps, 7);
        assert_eq!(cfg.overlay.avoid_hysteresis_px, 150);
        assert_eq!(cfg.run.step_delay, Duration::from_millis(10));

        std::env::remove_var("PILOT_MAX_STEPS");
        std::env::remove_var("PILOT_OVERLAY_HYSTERESIS_PX");
        std::env::remove_var("PILOT_STEP_DELAY_MS");
    }

    #[test]
    fn zero_max_steps_falls_back() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("PILOT_MAX_STEPS", "0");
        let cfg = AgentConfig::from_env();
        assert_eq!(cfg.run.max_steps, 20);
        std::env::remove_var("PILOT_MAX_STEPS");
    }

    #[test]
    fn env_flag_accepts_common_truthy_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("PILOT_TEST_FLAG", "Yes");
        assert!(env_flag("PILOT_TEST_FLAG", false));
        std::env::set_var("PILOT_TEST_FLAG", "0");
        assert!(!env_flag("PILOT_TEST_FLAG", true));
        std::env::remove_var("PILOT_TEST_FLAG");
        assert!(env_flag("PILOT_TEST_FLAG", true));
    }
}
