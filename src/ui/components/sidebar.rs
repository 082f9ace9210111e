use crate::common::UserId;
use crate::ui::state::AppState;
use eframe::egui;

#[derive(Default)]
pub struct SidebarActions {
    pub selected_peer: Option<UserId>,
    pub refresh: bool,
}

pub fn render(ui: &mut egui::Ui, state: &mut AppState) -> SidebarActions {
    let mut actions = SidebarActions::default();

    ui.horizontal(|ui| {
        ui.heading("Chats");
        if ui.small_button("⟳").on_hover_text("Refresh users").clicked() {
            actions.refresh = true;
        }
    });
    ui.separator();

    ui.add(egui::TextEdit::singleline(&mut state.search).hint_text("Search users"));
    ui.separator();

    if state.users.is_empty() {
        ui.label("No users yet");
        return actions;
    }

    let active = state.view.active_peer;
    egui::ScrollArea::vertical().show(ui, |ui| {
        for user in state.filtered_users() {
            ui.horizontal(|ui| {
                let selected = active == Some(user.id);
                if ui.selectable_label(selected, &user.username).clicked() {
                    actions.selected_peer = Some(user.id);
                }

                // unread badge
                let unread = state.unread_for(user.id);
                if unread > 0 {
                    ui.colored_label(egui::Color32::LIGHT_RED, format!("({unread})"));
                }
            });
        }
    });

    actions
}
