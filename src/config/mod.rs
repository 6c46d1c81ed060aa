//! Configuration for the voice agent.
//!
//! `AppConfig` holds one section per subsystem; `AppPaths` resolves where
//! `settings.toml` lives.  Persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    ActivityHandling, AppConfig, AudioConfig, HotkeyConfig, MeterConfig, Sensitivity,
    SessionConfig, TurnCoverage, UiConfig, API_KEY_ENV,
};
