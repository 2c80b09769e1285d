use crate::defaults;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub target: TargetConfig,
    pub encoder: EncoderConfig,
    pub reconnect: ReconnectConfig,
}

/// HTTP / WebSocket listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub static_dir: PathBuf,
}

/// Where and how a session's audio is published.
///
/// Built once per begin-routing request and never mutated afterwards: an
/// encoder started from one value keeps it for its whole life.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub mountpoint: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
    pub name: String,
    pub genre: String,
    pub public: bool,
}

/// Per-request overrides sent by the client with a `connect` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
}

/// External encoder process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: String,
    pub input_queue: usize,
    pub stop_grace_ms: u64,
}

/// Sender-side reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], defaults::LISTEN_PORT)),
            static_dir: PathBuf::from(defaults::STATIC_DIR),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: defaults::INGEST_HOST.to_string(),
            port: defaults::INGEST_PORT,
            password: defaults::INGEST_PASSWORD.to_string(),
            mountpoint: defaults::MOUNTPOINT.to_string(),
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            bitrate_kbps: defaults::BITRATE_KBPS,
            name: defaults::STATION_NAME.to_string(),
            genre: defaults::STATION_GENRE.to_string(),
            public: false,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: defaults::ENCODER_PROGRAM.to_string(),
            input_queue: defaults::ENCODER_INPUT_QUEUE,
            stop_grace_ms: defaults::ENCODER_STOP_GRACE_MS,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RECONNECT_MAX_ATTEMPTS,
            delay_ms: defaults::RECONNECT_DELAY_MS,
            multiplier: 1.0,
            max_delay_ms: defaults::RECONNECT_MAX_DELAY_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"***")
            .field("mountpoint", &self.mountpoint)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("bitrate_kbps", &self.bitrate_kbps)
            .field("name", &self.name)
            .field("genre", &self.genre)
            .field("public", &self.public)
            .finish()
    }
}

impl TargetConfig {
    /// Build a new target from these defaults with the client's overrides on top.
    ///
    /// The result is validated; `self` is left untouched.
    pub fn with_overrides(&self, overrides: &TargetOverrides) -> Result<Self> {
        let merged = Self {
            host: overrides.host.clone().unwrap_or_else(|| self.host.clone()),
            port: overrides.port.unwrap_or(self.port),
            password: overrides
                .password
                .clone()
                .unwrap_or_else(|| self.password.clone()),
            mountpoint: overrides
                .mountpoint
                .as_deref()
                .map(normalize_mountpoint)
                .unwrap_or_else(|| self.mountpoint.clone()),
            sample_rate: overrides.sample_rate.unwrap_or(self.sample_rate),
            channels: overrides.channels.unwrap_or(self.channels),
            bitrate_kbps: overrides.bitrate.unwrap_or(self.bitrate_kbps),
            name: overrides.name.clone().unwrap_or_else(|| self.name.clone()),
            genre: overrides.genre.clone().unwrap_or_else(|| self.genre.clone()),
            public: overrides.public.unwrap_or(self.public),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Check that the encoder can actually be started with these values.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(invalid("target.host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("target.port", "must be between 1 and 65535"));
        }
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(invalid(
                "target.sample_rate",
                &format!("{} Hz is outside 8000..=192000", self.sample_rate),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(invalid(
                "target.channels",
                &format!("{} channels requested, MP3 supports 1 or 2", self.channels),
            ));
        }
        if !(8..=320).contains(&self.bitrate_kbps) {
            return Err(invalid(
                "target.bitrate_kbps",
                &format!("{} kbit/s is outside 8..=320", self.bitrate_kbps),
            ));
        }
        Ok(())
    }
}

impl EncoderConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl ReconnectConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn invalid(key: &str, message: &str) -> BridgeError {
    BridgeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Ensure a mountpoint starts with exactly one slash. Empty stays empty.
pub fn normalize_mountpoint(mount: &str) -> String {
    let trimmed = mount.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.target.mountpoint = normalize_mountpoint(&config.target.mountpoint);
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PORT → server.listen (port only)
    /// - SHOUTCAST_HOST → target.host
    /// - SHOUTCAST_PORT → target.port
    /// - SHOUTCAST_PASSWORD → target.password
    /// - SHOUTCAST_MOUNTPOINT → target.mountpoint
    /// - CASTBRIDGE_ENCODER → encoder.program
    ///
    /// Empty or unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env_parse::<u16>("PORT") {
            self.server.listen.set_port(port);
        }

        if let Some(host) = env_string("SHOUTCAST_HOST") {
            self.target.host = host;
        }

        if let Some(port) = env_parse::<u16>("SHOUTCAST_PORT") {
            self.target.port = port;
        }

        if let Some(password) = env_string("SHOUTCAST_PASSWORD") {
            self.target.password = password;
        }

        if let Some(mount) = env_string("SHOUTCAST_MOUNTPOINT") {
            self.target.mountpoint = normalize_mountpoint(&mount);
        }

        if let Some(program) = env_string("CASTBRIDGE_ENCODER") {
            self.encoder.program = program;
        }

        self
    }

    /// Validate every section that has constraints.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.encoder.program.trim().is_empty() {
            return Err(invalid("encoder.program", "must not be empty"));
        }
        if self.encoder.input_queue == 0 {
            return Err(invalid("encoder.input_queue", "must be at least 1"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be 1.0 or greater"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/castbridge/config.toml on Linux, or a path relative
    /// to the working directory when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("castbridge")
            .join("config.toml")
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.trim().parse().ok())
}
