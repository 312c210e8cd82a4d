//! Layered runtime configuration for the rotator.
//!
//! Settings are merged from three sources, later ones winning:
//! 1. `rotator.toml` (or the file given with `--config`)
//! 2. Environment variables (a `.env` file is loaded first)
//! 3. CLI arguments
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! db_path = "vpn_rotation.db"
//!
//! [pool]
//! config_dir = "configs"
//!
//! [airvpn]
//! api_key = "..."
//! status_url = "https://airvpn.org/api/status/"
//!
//! [tunnel]
//! command = "sudo hummingbird"
//! recover_command = "sudo hummingbird --recover-network"
//! connected_marker = "EVENT: CONNECTED"
//! connect_ticks = 40
//! tick_interval_ms = 250
//!
//! [logging]
//! log_dir = "logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::RotationError;

pub const DEFAULT_CONFIG_FILE: &str = "rotator.toml";

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vpn_rotation.db")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Where the tunnel configs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("configs")
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
        }
    }
}

/// Endpoints for health status and egress IP checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirVpnSection {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_status_url")]
    pub status_url: String,
    #[serde(default = "default_ip_check_url")]
    pub ip_check_url: String,
    #[serde(default = "default_fallback_ip_url")]
    pub fallback_ip_url: String,
}

fn default_status_url() -> String {
    "https://airvpn.org/api/status/".to_string()
}

fn default_ip_check_url() -> String {
    "https://airvpn.org/api/whatismyip/".to_string()
}

fn default_fallback_ip_url() -> String {
    "https://api.ipify.org?format=json".to_string()
}

impl Default for AirVpnSection {
    fn default() -> Self {
        Self {
            api_key: None,
            status_url: default_status_url(),
            ip_check_url: default_ip_check_url(),
            fallback_ip_url: default_fallback_ip_url(),
        }
    }
}

/// External tunnel process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSection {
    /// Command line prefix; the config file path is appended as the last argument
    #[serde(default = "default_tunnel_cmd")]
    pub command: String,
    #[serde(default = "default_recover_cmd")]
    pub recover_command: String,
    /// Substring of an output line that signals an established tunnel
    #[serde(default = "default_connected_marker")]
    pub connected_marker: String,
    #[serde(default = "default_connect_ticks")]
    pub connect_ticks: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long to wait after SIGTERM before killing the process
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
}

fn default_tunnel_cmd() -> String {
    "sudo hummingbird".to_string()
}

fn default_recover_cmd() -> String {
    "sudo hummingbird --recover-network".to_string()
}

fn default_connected_marker() -> String {
    "EVENT: CONNECTED".to_string()
}

fn default_connect_ticks() -> u32 {
    40
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_terminate_grace_secs() -> u64 {
    5
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            command: default_tunnel_cmd(),
            recover_command: default_recover_cmd(),
            connected_marker: default_connected_marker(),
            connect_ticks: default_connect_ticks(),
            tick_interval_ms: default_tick_interval_ms(),
            terminate_grace_secs: default_terminate_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Directory for a daily rolling log file; terminal only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// The on-disk configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotatorToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub airvpn: AirVpnSection,
    #[serde(default)]
    pub tunnel: TunnelSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl RotatorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse rotator.toml")
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides using `lookup` for variable access.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("CONFIG_DIR") {
            self.pool.config_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("AIRVPN_API_KEY") {
            self.airvpn.api_key = Some(key);
        }
        if let Some(cmd) = lookup("TUNNEL_CMD") {
            self.tunnel.command = cmd;
        }
        if let Some(cmd) = lookup("RECOVER_CMD") {
            self.tunnel.recover_command = cmd;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
    }
}

/// A program plus leading arguments, split from a command line string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split on whitespace. Quoting is not interpreted.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Tunnel launch and connection-wait settings handed to the controller.
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub command: CommandLine,
    pub recover_command: Option<CommandLine>,
    pub connected_marker: String,
    pub connect_ticks: u32,
    pub tick_interval: Duration,
    pub terminate_grace: Duration,
}

impl TunnelSettings {
    /// Upper bound on the time spent waiting for the connected marker.
    pub fn connect_budget(&self) -> Duration {
        self.tick_interval * self.connect_ticks
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub config_dir: PathBuf,
    pub api_key: Option<String>,
    pub status_url: String,
    pub ip_check_url: String,
    pub fallback_ip_url: String,
    pub http_timeout: Duration,
    pub tunnel: TunnelSettings,
    pub log_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl Config {
    /// Load the file layer, apply the process environment, then validate.
    pub fn load(config_file: Option<&Path>, verbose: bool) -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let mut toml = match config_file {
            Some(path) => RotatorToml::load(path)?,
            None => RotatorToml::load_or_default(Path::new(DEFAULT_CONFIG_FILE))?,
        };
        toml.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));

        Ok(Self::from_toml(toml, verbose)?)
    }

    /// Build and validate a `Config` from an already merged file layer.
    pub fn from_toml(toml: RotatorToml, verbose: bool) -> Result<Self, RotationError> {
        let tunnel = &toml.tunnel;
        if tunnel.connect_ticks == 0 {
            return Err(RotationError::Config("connect_ticks must be > 0".into()));
        }
        if tunnel.tick_interval_ms == 0 {
            return Err(RotationError::Config("tick_interval_ms must be > 0".into()));
        }
        if tunnel.connected_marker.trim().is_empty() {
            return Err(RotationError::Config(
                "connected_marker must not be empty".into(),
            ));
        }
        let command = CommandLine::parse(&tunnel.command)
            .ok_or_else(|| RotationError::Config("tunnel command must not be empty".into()))?;

        Ok(Self {
            db_path: toml.store.db_path,
            config_dir: toml.pool.config_dir,
            api_key: toml.airvpn.api_key,
            status_url: toml.airvpn.status_url,
            ip_check_url: toml.airvpn.ip_check_url,
            fallback_ip_url: toml.airvpn.fallback_ip_url,
            http_timeout: Duration::from_secs(toml.http.timeout_secs),
            tunnel: TunnelSettings {
                command,
                recover_command: CommandLine::parse(&tunnel.recover_command),
                connected_marker: tunnel.connected_marker.clone(),
                connect_ticks: tunnel.connect_ticks,
                tick_interval: Duration::from_millis(tunnel.tick_interval_ms),
                terminate_grace: Duration::from_secs(tunnel.terminate_grace_secs),
            },
            log_dir: toml.logging.log_dir,
            verbose,
        })
    }

    /// Shared HTTP client honouring the configured timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .context("Failed to build HTTP client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_hummingbird_setup() {
        let config = Config::from_toml(RotatorToml::default(), false).unwrap();
        assert_eq!(config.db_path, PathBuf::from("vpn_rotation.db"));
        assert_eq!(config.config_dir, PathBuf::from("configs"));
        assert_eq!(config.tunnel.command.program, "sudo");
        assert_eq!(config.tunnel.command.args, vec!["hummingbird".to_string()]);
        assert_eq!(config.tunnel.connected_marker, "EVENT: CONNECTED");
        assert_eq!(config.tunnel.connect_budget(), Duration::from_secs(10));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let toml = RotatorToml::parse(
            r#"
            [tunnel]
            connect_ticks = 20
            tick_interval_ms = 100

            [store]
            db_path = "/tmp/rot.db"
            "#,
        )
        .unwrap();
        assert_eq!(toml.tunnel.connect_ticks, 20);
        assert_eq!(toml.tunnel.connected_marker, "EVENT: CONNECTED");
        assert_eq!(toml.store.db_path, PathBuf::from("/tmp/rot.db"));
        assert_eq!(toml.pool.config_dir, PathBuf::from("configs"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut toml = RotatorToml::parse("[store]\ndb_path = \"file.db\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("DB_PATH", "env.db"),
            ("AIRVPN_API_KEY", "secret"),
            ("TUNNEL_CMD", "hummingbird --quiet"),
        ]
        .into_iter()
        .collect();
        toml.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(toml.store.db_path, PathBuf::from("env.db"));
        assert_eq!(toml.airvpn.api_key.as_deref(), Some("secret"));
        let config = Config::from_toml(toml, false).unwrap();
        assert_eq!(config.tunnel.command.program, "hummingbird");
        assert_eq!(config.tunnel.command.args, vec!["--quiet".to_string()]);
    }

    #[test]
    fn test_zero_ticks_rejected() {
        let mut toml = RotatorToml::default();
        toml.tunnel.connect_ticks = 0;
        let err = Config::from_toml(toml, false).unwrap_err();
        assert!(matches!(err, RotationError::Config(_)));
    }

    #[test]
    fn test_empty_tunnel_command_rejected() {
        let mut toml = RotatorToml::default();
        toml.tunnel.command = "   ".into();
        assert!(Config::from_toml(toml, false).is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let toml = RotatorToml::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(toml.tunnel.connect_ticks, 40);
    }

    #[test]
    fn test_command_line_display_roundtrip() {
        let cmd = CommandLine::parse("sudo hummingbird --recover-network").unwrap();
        assert_eq!(cmd.display(), "sudo hummingbird --recover-network");
        assert!(CommandLine::parse("").is_none());
    }
}
