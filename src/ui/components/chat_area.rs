use eframe::egui;

use crate::common::{DeliveryStatus, Message};
use crate::ui::state::AppState;

pub fn render(ui: &mut egui::Ui, state: &AppState) {
    let Some(peer) = state.view.active_peer else {
        ui.label("Select a user to start chatting");
        return;
    };

    ui.horizontal(|ui| {
        ui.strong(state.peer_name(peer));
        if state.view.loading {
            ui.spinner();
        }
    });
    ui.separator();

    egui::ScrollArea::vertical()
        .stick_to_bottom(true)
        .auto_shrink([false, false])
        .max_height(ui.available_height() - 40.0)
        .show(ui, |ui| {
            for message in &state.view.transcript {
                render_message(ui, message, state);
            }
        });
}

fn render_message(ui: &mut egui::Ui, message: &Message, state: &AppState) {
    let time = message.sent_at.with_timezone(&chrono::Local).format("%H:%M");
    if message.is_mine() {
        ui.with_layout(egui::Layout::right_to_left(egui::Align::TOP), |ui| {
            let (tick, color) = tick(message.status);
            ui.colored_label(color, tick);
            ui.label(egui::RichText::new(time.to_string()).weak());
            ui.label(&message.content);
        });
    } else {
        let sender = message
            .sender_name
            .clone()
            .unwrap_or_else(|| state.peer_name(message.sender_id));
        ui.horizontal_wrapped(|ui| {
            ui.strong(format!("{sender}:"));
            ui.label(&message.content);
            ui.label(egui::RichText::new(time.to_string()).weak());
        });
    }
}

fn tick(status: DeliveryStatus) -> (&'static str, egui::Color32) {
    match status {
        DeliveryStatus::Sent => ("✓", egui::Color32::GRAY),
        DeliveryStatus::Delivered => ("✓✓", egui::Color32::GRAY),
        DeliveryStatus::Read => ("✓✓", egui::Color32::LIGHT_BLUE),
    }
}
