//! Daemon configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/uplink/uplinkd.toml`
//! - Windows: `%APPDATA%/uplink/uplinkd.toml`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use uplink_client::ClientConfig;
use uplink_transport::BackoffConfig;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// WebSocket endpoint URL (`ws://` or `wss://`).
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Stable device identifier (hostname by default).
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Display name of this device (hostname by default).
    #[serde(default = "default_device_id")]
    pub device_name: String,

    /// Seconds between telemetry sends.
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_secs: u64,

    /// Seconds to wait on a single telemetry send before recycling the
    /// connection.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_endpoint_url() -> String {
    "ws://127.0.0.1:8787".into()
}

fn default_device_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "uplink-device".into())
}

fn default_telemetry_interval() -> u64 {
    10
}

fn default_send_timeout() -> u64 {
    20
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            device_id: default_device_id(),
            device_name: default_device_id(),
            telemetry_interval_secs: default_telemetry_interval(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl UplinkConfig {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: UplinkConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = UplinkConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        // Restrict permissions on Unix (may later carry credentials).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Timing configuration for the resilience core.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            telemetry_interval: Duration::from_secs(self.telemetry_interval_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("uplink")
            .join("uplinkd.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("uplink").join("uplinkd.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/uplink/uplinkd.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = UplinkConfig::default();
        assert!(!config.device_id.is_empty());
        assert_eq!(config.telemetry_interval_secs, 10);
        assert_eq!(config.send_timeout_secs, 20);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = UplinkConfig {
            endpoint_url: "wss://uplink.example.com/ws".into(),
            device_id: "dev-42".into(),
            device_name: "Test Device".into(),
            telemetry_interval_secs: 5,
            send_timeout_secs: 8,
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: UplinkConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.endpoint_url, "wss://uplink.example.com/ws");
        assert_eq!(parsed.device_id, "dev-42");
        assert_eq!(parsed.telemetry_interval_secs, 5);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"endpoint_url = "ws://10.0.0.5:8787""#;
        let config: UplinkConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint_url, "ws://10.0.0.5:8787");
        assert_eq!(config.telemetry_interval_secs, 10);
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path().unwrap();
        assert!(path.to_string_lossy().contains("uplink"));
    }

    #[test]
    fn client_config_conversion() {
        let config = UplinkConfig {
            telemetry_interval_secs: 3,
            send_timeout_secs: 7,
            ..UplinkConfig::default()
        };
        let client = config.client_config();
        assert_eq!(client.telemetry_interval, Duration::from_secs(3));
        assert_eq!(client.send_timeout, Duration::from_secs(7));
    }

    #[test]
    fn config_save_and_load_manual() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("uplinkd.toml");

        let config = UplinkConfig {
            device_name: "SaveTest".into(),
            ..UplinkConfig::default()
        };

        let content = toml::to_string_pretty(&config).unwrap();
        std::fs::write(&path, &content).unwrap();

        let loaded_content = std::fs::read_to_string(&path).unwrap();
        let loaded: UplinkConfig = toml::from_str(&loaded_content).unwrap();
        assert_eq!(loaded.device_name, "SaveTest");
    }
}
