//! Application entry point: kiosk voice agent.
//!
//! # Startup sequence
//!
//! 1. Initialise logging and the rustls crypto provider.
//! 2. Load [`AppConfig`] from disk (defaults on first run).
//! 3. Create the [`tokio`] runtime.
//! 4. Spawn the [`SessionOrchestrator`] with the Gemini transport and the
//!    cpal microphone / speaker.
//! 5. Start the global hotkey listener, if enabled.
//! 6. Run [`eframe::run_native`] until the widget is closed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use eframe::egui;
use tokio::sync::mpsc;
use voice_agent::{
    app::VoiceAgentApp,
    audio::CpalMicrophone,
    config::AppConfig,
    hotkey::{parse_key, HotkeyListener},
    meter::ActivityLevel,
    playback::CpalSpeaker,
    remote::GeminiTransport,
    session::{new_shared_status, SessionCommand, SessionHandle, SessionOrchestrator, SessionState},
};

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let mut vp = egui::ViewportBuilder::default()
        .with_decorations(false)
        .with_transparent(true)
        .with_inner_size([240.0, 110.0])
        .with_min_inner_size([200.0, 70.0])
        .with_resizable(false);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }
    if let Some((x, y)) = config.ui.window_position {
        vp = vp.with_position(egui::pos2(x, y));
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice agent starting up");

    // tokio-tungstenite's rustls connector needs a process-wide provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e:#}); using defaults");
        AppConfig::default()
    });
    if config.session.resolved_api_key().is_none() {
        log::warn!(
            "no API key configured; set {} or session.api_key in settings.toml",
            voice_agent::config::API_KEY_ENV
        );
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let status = new_shared_status();
    let level = ActivityLevel::new();
    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(16);

    let orchestrator = SessionOrchestrator::new(
        config.clone(),
        status.clone(),
        level.clone(),
        Arc::new(GeminiTransport::new(&config.audio)),
        Arc::new(CpalMicrophone),
        Arc::new(CpalSpeaker),
    );
    let orchestrator_task = rt.spawn(orchestrator.run(command_rx));

    let handle = SessionHandle::new(command_tx, status, level);

    let _hotkey_listener = if config.hotkey.enabled {
        match parse_key(&config.hotkey.toggle_key) {
            Some(key) => HotkeyListener::start(key, handle.clone())
                .map_err(|e| log::warn!("hotkey listener unavailable: {e}"))
                .ok(),
            None => {
                log::warn!("unknown hotkey {:?}; hotkey disabled", config.hotkey.toggle_key);
                None
            }
        }
    } else {
        None
    };

    let shutdown = handle.clone();
    let app = VoiceAgentApp::new(handle, config.clone());
    let result = eframe::run_native(
        "Voice Agent",
        native_options(&config),
        Box::new(move |_cc| Ok(Box::new(app))),
    );

    // The hotkey thread keeps a handle alive, so the command channel never
    // closes on its own.  Stop explicitly and wait for the devices to go.
    shutdown.stop();
    rt.block_on(async {
        let idle = async {
            while shutdown.state() != SessionState::Idle {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), idle).await.is_err() {
            log::warn!("session did not shut down in time");
        }
    });
    orchestrator_task.abort();
    drop(rt);

    result.map_err(|e| anyhow::anyhow!("eframe: {e}"))
}
