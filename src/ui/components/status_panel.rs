use eframe::egui;

use crate::network::ConnectionState;
use crate::ui::state::{ActivityKind, AppState};

#[derive(Default)]
pub struct StatusActions {
    pub reconnect: bool,
    pub logout: bool,
}

pub fn render(ui: &mut egui::Ui, state: &AppState) -> StatusActions {
    let mut actions = StatusActions::default();

    ui.heading("Status");
    ui.separator();

    ui.horizontal(|ui| {
        ui.label("Signed in as");
        ui.strong(&state.local.username);
    });

    ui.horizontal(|ui| {
        let color = match state.connection {
            ConnectionState::Connected => egui::Color32::GREEN,
            ConnectionState::Connecting | ConnectionState::Reconnecting => egui::Color32::YELLOW,
            ConnectionState::Disconnected => egui::Color32::RED,
        };
        ui.colored_label(color, "●");
        ui.label(state.connection.to_string());
    });

    ui.add_enabled_ui(state.session_ended.is_none(), |ui| {
        ui.horizontal(|ui| {
            let can_reconnect = state.connection == ConnectionState::Disconnected;
            if ui
                .add_enabled(can_reconnect, egui::Button::new("Reconnect"))
                .clicked()
            {
                actions.reconnect = true;
            }
            if ui.button("Log out").clicked() {
                actions.logout = true;
            }
        });
    });

    if let Some(reason) = &state.session_ended {
        ui.colored_label(egui::Color32::LIGHT_RED, reason);
    }

    ui.separator();

    // newest first
    ui.label("Recent Activity:");
    egui::ScrollArea::vertical()
        .max_height(240.0)
        .show(ui, |ui| {
            for entry in state.activity.iter().rev().take(20) {
                let time_str = entry.timestamp.format("%H:%M:%S");
                let color = match entry.kind {
                    ActivityKind::Connection => egui::Color32::LIGHT_BLUE,
                    ActivityKind::Failure => egui::Color32::RED,
                    ActivityKind::Session => egui::Color32::YELLOW,
                };

                ui.horizontal(|ui| {
                    ui.colored_label(color, format!("[{time_str}]"));
                    ui.label(&entry.message);
                });
            }
        });

    actions
}
