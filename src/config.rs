use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::ConnectionSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";
pub const SERVER_URL_ENV: &str = "CHAT_SERVER_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    pub api_path: String,
    pub hub_path: String,
    /// Delay before each reconnect attempt, in milliseconds.
    pub reconnect_delays_ms: Vec<u64>,
    pub keep_alive_secs: u64,
    pub channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            api_path: "/api".to_string(),
            hub_path: "/chat".to_string(),
            reconnect_delays_ms: vec![0, 2_000, 10_000, 30_000],
            keep_alive_secs: 15,
            channel_capacity: 100,
        }
    }
}

impl AppConfig {
    pub fn api_base(&self) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            self.api_path.trim_start_matches('/')
        )
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            reconnect_delays: self
                .reconnect_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            // tokio's interval panics on a zero period
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(1)),
            outbound_capacity: self.channel_capacity.max(1),
        }
    }
}

/// Reads the JSON config, falling back to defaults, then applies the
/// `CHAT_SERVER_URL` override.
pub fn load_config(path: &str) -> AppConfig {
    let mut config = read_config_file(Path::new(path));
    if let Ok(url) = env::var(SERVER_URL_ENV) {
        apply_server_override(&mut config, &url);
    }
    config
}

fn read_config_file(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

fn apply_server_override(config: &mut AppConfig, url: &str) {
    let url = url.trim();
    if url.is_empty() {
        return;
    }
    log::info!("Using server URL {url} from {SERVER_URL_ENV}");
    config.server_url = url.to_string();
}
