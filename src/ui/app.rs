use eframe::egui;
use tokio::sync::mpsc;

use crate::common::{LocalIdentity, SyncEvent, UiCommand};

use super::components::{
    chat_area, input_bar,
    sidebar::{self, SidebarActions},
    status_panel::{self, StatusActions},
};
use super::state::AppState;

pub struct ChatApp {
    state: AppState,
    command_sender: mpsc::Sender<UiCommand>,
    event_receiver: mpsc::Receiver<SyncEvent>,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        command_sender: mpsc::Sender<UiCommand>,
        event_receiver: mpsc::Receiver<SyncEvent>,
        local: LocalIdentity,
    ) -> Self {
        Self {
            state: AppState::new(local),
            command_sender,
            event_receiver,
        }
    }

    fn handle_sync_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            self.state.apply(event);
        }
    }

    fn send_command(&mut self, command: UiCommand) {
        if self.state.session_ended.is_some() {
            log::debug!("Session ended; dropping {command:?}");
            return;
        }
        if let Err(err) = self.command_sender.try_send(command) {
            log::warn!("Failed to send command to sync loop: {err}");
        }
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_sync_events();

        egui::SidePanel::left("user_sidebar")
            .resizable(true)
            .default_width(200.0)
            .show(ctx, |ui| {
                let actions: SidebarActions = sidebar::render(ui, &mut self.state);
                if let Some(peer) = actions.selected_peer {
                    self.send_command(UiCommand::SelectPeer(peer));
                }
                if actions.refresh {
                    self.send_command(UiCommand::RefreshUsers);
                }
            });

        egui::SidePanel::right("status_panel")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                let actions: StatusActions = status_panel::render(ui, &self.state);
                if actions.reconnect {
                    self.send_command(UiCommand::Reconnect);
                }
                if actions.logout {
                    self.send_command(UiCommand::Logout);
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            chat_area::render(ui, &self.state);

            ui.separator();
            let enabled = self.state.can_send();
            if let Some(content) = input_bar::render(ui, &mut self.state.input_text, enabled) {
                self.send_command(UiCommand::SendMessage(content));
            }
        });

        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}
