//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`.
//! Every section is `#[serde(default)]`, so a hand-edited `settings.toml`
//! only needs the keys it changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variable that overrides [`SessionConfig::api_key`].
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// ---------------------------------------------------------------------------
// Voice activity detection knobs
// ---------------------------------------------------------------------------

/// How eagerly the remote model's voice activity detector fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    High,
}

impl Sensitivity {
    pub fn start_wire_name(self) -> &'static str {
        match self {
            Self::Low => "START_SENSITIVITY_LOW",
            Self::High => "START_SENSITIVITY_HIGH",
        }
    }

    pub fn end_wire_name(self) -> &'static str {
        match self {
            Self::Low => "END_SENSITIVITY_LOW",
            Self::High => "END_SENSITIVITY_HIGH",
        }
    }
}

/// What the model does when the user starts talking over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityHandling {
    /// Barge-in: user speech cuts the model off.
    StartOfActivityInterrupts,
    NoInterruption,
}

impl ActivityHandling {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::StartOfActivityInterrupts => "START_OF_ACTIVITY_INTERRUPTS",
            Self::NoInterruption => "NO_INTERRUPTION",
        }
    }
}

/// Which input counts towards a user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnCoverage {
    OnlyActivity,
    AllInput,
}

impl TurnCoverage {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::OnlyActivity => "TURN_INCLUDES_ONLY_ACTIVITY",
            Self::AllInput => "TURN_INCLUDES_ALL_INPUT",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Remote model connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint, without the `?key=` query.
    pub endpoint: String,
    /// API key.  `GEMINI_API_KEY` in the environment takes precedence.
    pub api_key: Option<String>,
    /// Model id, with or without the `models/` prefix.
    pub model: String,
    pub start_sensitivity: Sensitivity,
    pub end_sensitivity: Sensitivity,
    /// Trailing silence before the model treats the user turn as over.
    pub silence_duration_ms: u32,
    pub activity_handling: ActivityHandling,
    pub turn_coverage: TurnCoverage,
    /// Persona sent as the system instruction.
    pub system_instruction: String,
    /// Upper bound on socket open + setup handshake.
    pub connect_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            api_key: None,
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            start_sensitivity: Sensitivity::High,
            end_sensitivity: Sensitivity::High,
            silence_duration_ms: 200,
            activity_handling: ActivityHandling::StartOfActivityInterrupts,
            turn_coverage: TurnCoverage::OnlyActivity,
            system_instruction: [
                "You are the voice attendant for a maker of interactive kiosks, AI avatars and touch tables.",
                "Product pillars: rugged 32 to 55 inch 4K hardware, hand and presence tracking, voice and vision AI, 24/7 operation with telemetry and over-the-air updates.",
                "Tone: concise, natural and consultative. Never invent prices.",
                "Always steer towards a next step: browse solutions, talk to the team, or book a demo.",
            ]
            .join(" "),
            connect_timeout_secs: 15,
        }
    }
}

impl SessionConfig {
    /// API key from the environment, else from the file.  Blank keys count
    /// as missing.
    pub fn resolved_api_key(&self) -> Option<String> {
        let non_blank = |k: String| {
            let k = k.trim().to_string();
            (!k.is_empty()).then_some(k)
        };
        std::env::var(API_KEY_ENV)
            .ok()
            .and_then(non_blank)
            .or_else(|| self.api_key.clone().and_then(non_blank))
    }

    /// `models/<id>` as the setup message expects.
    pub fn model_resource(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Endpoint with the key appended as a query parameter.
    pub fn endpoint_url(&self, api_key: &str) -> String {
        format!("{}?key={}", self.endpoint, api_key)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture framing, queue depths and playback defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of outbound frames in Hz.  The model expects 16 000.
    pub capture_sample_rate: u32,
    /// Samples per outbound frame.
    pub frame_samples: usize,
    /// Frames buffered between the capture thread and the session loop.
    pub capture_queue_frames: usize,
    /// Frames buffered between the session loop and the socket writer.
    pub outbound_queue_frames: usize,
    /// Inbound events buffered between the socket reader and the session loop.
    pub inbound_queue_events: usize,
    /// Playback rate assumed when a chunk's MIME type names none.
    pub playback_fallback_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            frame_samples: 4_096,
            capture_queue_frames: 32,
            outbound_queue_frames: 64,
            inbound_queue_events: 256,
            playback_fallback_rate: 24_000,
        }
    }
}

// ---------------------------------------------------------------------------
// MeterConfig
// ---------------------------------------------------------------------------

/// Activity meter analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Updates per second.
    pub tick_hz: u32,
    /// Analysis window in samples (power of two).
    pub fft_size: usize,
    /// Level mapped to 0.
    pub min_db: f32,
    /// Level mapped to 1.
    pub max_db: f32,
    /// Weight of the previous spectrum, 0.0 – 1.0.
    pub smoothing: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            fft_size: 256,
            min_db: -100.0,
            max_db: -30.0,
            smoothing: 0.8,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    pub enabled: bool,
    /// Key that toggles the session (e.g. `"F9"`).
    pub toggle_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            toggle_key: "F9".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// egui widget settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Last widget position `(x, y)` in screen pixels.  `None` lets the
    /// window manager decide.
    pub window_position: Option<(f32, f32)>,
    /// Keep the widget above all other windows.
    pub always_on_top: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_position: None,
            always_on_top: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_agent::config::AppConfig;
///
/// // Defaults when the file is missing.
/// let mut config = AppConfig::load().unwrap();
/// config.session.silence_duration_ms = 300;
/// config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub meter: MeterConfig,
    pub hotkey: HotkeyConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load from the platform `settings.toml`; defaults on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to the platform `settings.toml`, creating parent directories.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
