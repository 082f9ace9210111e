mod common;
mod config;
mod error;
mod network;
mod session;
mod sync;
mod ui;

use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use network::{ApiClient, ConnectionManager, WebSocketConnector, transport};
use session::{Session, SessionStore};
use sync::SyncClient;
use tokio::sync::mpsc;
use ui::ChatApp;

use crate::common::UserId;
use crate::error::{ChatError, Result};

#[derive(Parser)]
#[command(
    name = "duochat",
    version,
    about = "Desktop client for one-to-one realtime chat"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Access token of an existing session
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long, env = "CHAT_USER_ID")]
    user_id: Option<UserId>,
    #[arg(long, env = "CHAT_USERNAME")]
    username: Option<String>,
    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Create the account before signing in
    #[arg(long)]
    register: bool,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    // RUST_LOG controls verbosity
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    let api = ApiClient::new(app_config.api_base());
    let session = match resolve_session(&cli, &api).await {
        Ok(session) => session,
        Err(err) => {
            log::error!("Could not start a session: {err}");
            return Err(err.into());
        }
    };

    // 1. Channels
    // UI -> Sync
    let (cmd_tx, cmd_rx) = mpsc::channel(app_config.channel_capacity.max(1));
    // Sync -> UI
    let (event_tx, event_rx) = mpsc::channel(app_config.channel_capacity.max(1));

    // 2. Sync loop (background task)
    let hub_url = transport::hub_url(&app_config.server_url, &app_config.hub_path);
    let connector = Arc::new(WebSocketConnector::new(hub_url));
    let connection = ConnectionManager::new(connector, app_config.connection_settings());
    let api = Arc::new(api.with_token(session.token()));
    let client = SyncClient::new(
        event_tx,
        cmd_rx,
        connection,
        api,
        &session,
        app_config.channel_capacity,
    );
    tokio::spawn(async move {
        if let Err(err) = client.run().await {
            log::error!("Sync loop terminated: {err}");
        }
    });

    // 3. UI (main thread)
    let options = eframe::NativeOptions::default();
    let mut event_rx = Some(event_rx);
    let local = session.identity();

    eframe::run_native(
        "duochat",
        options,
        Box::new(move |cc| {
            let event_receiver = event_rx
                .take()
                .ok_or("ChatApp should only be initialized once")?;

            log::info!("Client started for {} (user {})", local.username, local.user_id);

            Ok(Box::new(ChatApp::new(
                cc,
                cmd_tx.clone(),
                event_receiver,
                local.clone(),
            )))
        }),
    )?;
    Ok(())
}

/// A token from the CLI or environment wins; otherwise sign in with a password.
async fn resolve_session(cli: &Cli, api: &ApiClient) -> Result<Session> {
    if let Some(token) = &cli.token {
        let (Some(user_id), Some(username)) = (cli.user_id, &cli.username) else {
            return Err(ChatError::Config(
                "--token needs --user-id and --username".into(),
            ));
        };
        return Session::new(token.clone(), user_id, username.clone());
    }

    match (&cli.username, &cli.password) {
        (Some(username), Some(password)) if cli.register => {
            Session::register(api, username, password).await
        }
        (Some(username), Some(password)) => Session::login(api, username, password).await,
        _ => Err(ChatError::Config(
            "pass --token with --user-id and --username, or --username with --password".into(),
        )),
    }
}
