use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tracing::warn;
use voxlink_client::ClientConfig;
use voxlink_net::ConnectionConfig;

pub const DEFAULT_CLIENT_PATH: &str = "config/client.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientSettings {
    pub server_url: String,
    pub secret: String,
    /// Fixed client identifier. Generated per process when unset.
    pub client_id: Option<String>,
    /// Delay before reconnecting after a dropped connection; 0 disables reconnects.
    pub reconnect_timeout_ms: u64,
    /// Decode workers per hardware thread.
    pub worker_multiplier: usize,
    pub max_requests_per_frame: usize,
    pub max_process_per_frame: usize,
    pub max_updates_per_frame: usize,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Chunk radius requested around the origin.
    pub view_radius: i32,
    pub frame_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let client = ClientConfig::default();
        let connection = ConnectionConfig::default();
        Self {
            server_url: connection.server_url,
            secret: connection.secret,
            client_id: None,
            reconnect_timeout_ms: connection.reconnect_timeout.as_millis() as u64,
            worker_multiplier: connection.worker_multiplier,
            max_requests_per_frame: client.max_requests_per_frame,
            max_process_per_frame: client.max_process_per_frame,
            max_updates_per_frame: client.max_updates_per_frame,
            log_level: "warn".to_string(),
            view_radius: 2,
            frame_interval_ms: 16,
        }
    }
}

impl ClientSettings {
    /// Load client settings from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CLIENT_PATH))
    }

    /// Load settings from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ClientSettings>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    ClientSettings::default()
                }
            },
            Err(err) => {
                warn!("Failed to read {}: {err}. Using defaults", path.display());
                ClientSettings::default()
            }
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn into_client_config(self) -> ClientConfig {
        ClientConfig {
            connection: ConnectionConfig {
                server_url: self.server_url,
                secret: self.secret,
                client_id: self.client_id.filter(|id| !id.is_empty()),
                reconnect_timeout: Duration::from_millis(self.reconnect_timeout_ms),
                worker_multiplier: self.worker_multiplier.max(1),
            },
            max_requests_per_frame: self.max_requests_per_frame.max(1),
            max_process_per_frame: self.max_process_per_frame.max(1),
            max_updates_per_frame: self.max_updates_per_frame.max(1),
            ..ClientConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("client.toml");
        fs::write(
            &path,
            "server_url = \"wss://voxels.example\"\nsecret = \"s3\"\nview_radius = 5\n",
        )
        .expect("write config");

        let settings = ClientSettings::load_from_path(&path);
        assert_eq!(settings.server_url, "wss://voxels.example");
        assert_eq!(settings.secret, "s3");
        assert_eq!(settings.view_radius, 5);
        assert_eq!(
            settings.max_requests_per_frame,
            ClientSettings::default().max_requests_per_frame
        );
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("client.toml");
        fs::write(&path, "view_radius = \"wide\"").expect("write config");

        assert_eq!(ClientSettings::load_from_path(&path), ClientSettings::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = ClientSettings::load_from_path(&dir.path().join("absent.toml"));
        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn client_config_carries_connection_settings() {
        let settings = ClientSettings {
            client_id: Some(String::new()),
            reconnect_timeout_ms: 0,
            worker_multiplier: 0,
            max_process_per_frame: 9,
            max_requests_per_frame: 0,
            max_updates_per_frame: 0,
            ..ClientSettings::default()
        };
        let config = settings.into_client_config();

        assert_eq!(config.connection.client_id, None, "empty id means generate");
        assert_eq!(config.connection.reconnect_timeout, Duration::ZERO);
        assert_eq!(config.connection.worker_multiplier, 1);
        assert_eq!(config.max_process_per_frame, 9);
        assert_eq!(config.max_requests_per_frame, 1, "zero budget would stall the queue");
        assert_eq!(config.max_updates_per_frame, 1);
    }
}
