use std::path::PathBuf;

use clap::Parser;

use crate::config::ClientSettings;

/// Headless voxlink client.
///
/// Flags override values loaded from `config/client.toml`.
#[derive(Parser, Debug)]
#[command(name = "voxlink", version, about = "Headless voxel world sync client")]
pub struct Args {
    /// Server base URL (ws://, wss://, http:// or https://).
    #[arg(long)]
    pub server: Option<String>,

    /// Shared secret presented on connect.
    #[arg(long)]
    pub secret: Option<String>,

    /// Fixed client identifier.
    #[arg(long)]
    pub client_id: Option<String>,

    /// Chunk radius requested around the origin.
    #[arg(long)]
    pub radius: Option<i32>,

    /// Reconnect delay in milliseconds; 0 disables reconnects.
    #[arg(long)]
    pub reconnect_ms: Option<u64>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long)]
    pub log_level: Option<String>,

    /// How long to run the frame loop before exiting.
    #[arg(long, default_value = "10")]
    pub duration_secs: u64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    /// Settings file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ClientSettings {
    /// Apply CLI overrides to loaded settings.
    pub fn apply_cli_overrides(&mut self, args: &Args) {
        if let Some(ref url) = args.server {
            self.server_url = url.clone();
        }
        if let Some(ref secret) = args.secret {
            self.secret = secret.clone();
        }
        if let Some(ref id) = args.client_id {
            self.client_id = Some(id.clone());
        }
        if let Some(radius) = args.radius {
            self.view_radius = radius;
        }
        if let Some(ms) = args.reconnect_ms {
            self.reconnect_timeout_ms = ms;
        }
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let args = Args::parse_from([
            "voxlink",
            "--server",
            "ws://10.0.0.2:4000",
            "--secret",
            "hunter2",
            "--radius",
            "4",
            "--reconnect-ms",
            "0",
        ]);
        let mut settings = ClientSettings {
            log_level: "debug".to_string(),
            ..ClientSettings::default()
        };
        settings.apply_cli_overrides(&args);

        assert_eq!(settings.server_url, "ws://10.0.0.2:4000");
        assert_eq!(settings.secret, "hunter2");
        assert_eq!(settings.view_radius, 4);
        assert_eq!(settings.reconnect_timeout_ms, 0);
        assert_eq!(settings.log_level, "debug", "untouched without a flag");
        assert_eq!(args.duration_secs, 10);
        assert!(!args.json_logs);
    }

    #[test]
    fn no_flags_leave_settings_alone() {
        let args = Args::parse_from(["voxlink"]);
        let mut settings = ClientSettings::default();
        settings.apply_cli_overrides(&args);
        assert_eq!(settings, ClientSettings::default());
    }
}
