//! Floating voice-agent widget: egui/eframe application.
//!
//! The widget is a compact, borderless, always-on-top panel with one toggle
//! button.  It never touches audio or the network: clicks go through a
//! [`SessionHandle`] and every frame renders a snapshot of the shared status
//! plus the activity level.
//!
//! | State | Visual |
//! |-------|--------|
//! | `Idle` | "Tap to talk" button, last error (if any) in orange |
//! | `Connecting` | spinner + "Connecting…" |
//! | `Live` | red "Listening" button + activity bar |
//! | `Closing` / `Failed` | transient, shown for at most a frame or two |

use std::time::Duration;

use eframe::egui;

use crate::config::AppConfig;
use crate::session::{SessionHandle, SessionState};

pub struct VoiceAgentApp {
    handle: SessionHandle,
    config: AppConfig,
    /// Last known outer position, written back to the config on exit.
    position: Option<egui::Pos2>,
    spinner_phase: f32,
    show_details: bool,
}

impl VoiceAgentApp {
    pub fn new(handle: SessionHandle, config: AppConfig) -> Self {
        Self {
            handle,
            config,
            position: None,
            spinner_phase: 0.0,
            show_details: false,
        }
    }

    // ── Title bar ─────────────────────────────────────────────────────────

    fn draw_title_bar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, state: SessionState) {
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("●").color(state_color(state)).size(11.0));

            let title = ui.label(
                egui::RichText::new("Voice Agent")
                    .color(egui::Color32::from_rgb(200, 200, 200))
                    .size(13.0),
            );
            if title.is_pointer_button_down_on() {
                if let Some(outer) = ctx.input(|i| i.viewport().outer_rect) {
                    let delta = ctx.input(|i| i.pointer.delta());
                    ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(outer.min + delta));
                }
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if title_button(ui, "x", egui::Color32::from_rgb(200, 100, 100)) {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
                if title_button(ui, "-", egui::Color32::from_rgb(150, 150, 150)) {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Minimized(true));
                }
                if title_button(ui, "=", egui::Color32::from_rgb(150, 150, 150)) {
                    self.show_details = !self.show_details;
                }
            });
        });
    }

    // ── Body ──────────────────────────────────────────────────────────────

    fn draw_toggle(&mut self, ui: &mut egui::Ui, state: SessionState) {
        let label = match state {
            SessionState::Connecting => format!("{} {}", self.spinner_char(), state.label()),
            _ => state.label().to_string(),
        };
        let fill = match state {
            SessionState::Live => egui::Color32::from_rgb(200, 50, 50),
            SessionState::Connecting => egui::Color32::from_rgb(50, 90, 170),
            _ => egui::Color32::from_rgb(60, 60, 60),
        };

        let button = egui::Button::new(egui::RichText::new(label).color(egui::Color32::WHITE).size(14.0))
            .fill(fill)
            .corner_radius(egui::CornerRadius::same(6))
            .min_size(egui::vec2(ui.available_width(), 30.0));

        let clickable = matches!(state, SessionState::Idle | SessionState::Connecting | SessionState::Live);
        if ui.add_enabled(clickable, button).clicked() {
            self.handle.toggle();
        }
    }

    fn draw_level(&self, ui: &mut egui::Ui) {
        let level = self.handle.activity_level();
        ui.add(
            egui::ProgressBar::new(level)
                .desired_height(6.0)
                .fill(egui::Color32::from_rgb(80, 200, 120)),
        );
    }

    fn draw_error(&self, ui: &mut egui::Ui, message: &str) {
        ui.label(
            egui::RichText::new(message)
                .color(egui::Color32::from_rgb(255, 136, 68))
                .size(11.0),
        );
    }

    fn draw_details(&self, ui: &mut egui::Ui, turns: u64, chunks: u64) {
        let dim = egui::Color32::from_rgb(140, 140, 140);
        let line = |ui: &mut egui::Ui, text: String| {
            ui.label(egui::RichText::new(text).color(dim).size(11.0));
        };
        line(ui, format!("Model: {}", self.config.session.model));
        line(ui, format!("Hotkey: {}", self.config.hotkey.toggle_key));
        line(ui, format!("Turns: {turns}  Chunks: {chunks}"));
    }

    fn spinner_char(&self) -> char {
        const CHARS: [char; 4] = ['|', '/', '-', '\\'];
        CHARS[(self.spinner_phase as usize) % CHARS.len()]
    }
}

fn title_button(ui: &mut egui::Ui, text: &str, color: egui::Color32) -> bool {
    ui.add(egui::Button::new(egui::RichText::new(text).color(color).size(12.0)).frame(false))
        .clicked()
}

fn state_color(state: SessionState) -> egui::Color32 {
    match state {
        SessionState::Idle => egui::Color32::from_rgb(100, 100, 100),
        SessionState::Connecting | SessionState::Closing => egui::Color32::from_rgb(68, 136, 255),
        SessionState::Live => egui::Color32::from_rgb(255, 68, 68),
        SessionState::Failed => egui::Color32::from_rgb(255, 136, 68),
    }
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for VoiceAgentApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let status = self.handle.snapshot();

        self.spinner_phase = (self.spinner_phase + 0.08) % 4.0;
        if let Some(outer) = ctx.input(|i| i.viewport().outer_rect) {
            self.position = Some(outer.min);
        }

        // The orchestrator changes state off the UI thread; keep polling
        // while anything is in flight so the meter animates.
        if status.state == SessionState::Idle {
            ctx.request_repaint_after(Duration::from_millis(250));
        } else {
            ctx.request_repaint_after(Duration::from_millis(33));
        }

        let frame = egui::Frame::new()
            .fill(egui::Color32::from_rgba_premultiplied(30, 30, 30, 220))
            .corner_radius(egui::CornerRadius::same(8))
            .inner_margin(egui::Margin::same(8));

        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            self.draw_title_bar(ui, ctx, status.state);
            ui.separator();

            self.draw_toggle(ui, status.state);
            if status.state.is_active() {
                ui.add_space(4.0);
                self.draw_level(ui);
            }
            if let Some(message) = status.last_error.as_deref() {
                ui.add_space(4.0);
                self.draw_error(ui, message);
            }
            if self.show_details {
                ui.separator();
                self.draw_details(ui, status.turns_completed, status.chunks_played);
            }
        });
    }

    /// Stop any running session and remember where the widget was.
    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.handle.stop();

        if let Some(pos) = self.position {
            let position = Some((pos.x, pos.y));
            if self.config.ui.window_position != position {
                self.config.ui.window_position = position;
                if let Err(e) = self.config.save() {
                    log::warn!("could not save widget position: {e:#}");
                }
            }
        }
        log::info!("voice agent widget closing");
    }
}
