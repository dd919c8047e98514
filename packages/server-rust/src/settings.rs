//! Command line and configuration file loading.
//!
//! Precedence, lowest first: built-in defaults, the JSON file given with
//! `--config`, then explicit command-line flags. Unknown file keys and skipped
//! users do not fail loading; they are collected in [`Settings::warnings`] so
//! the binary can log them once tracing is up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::{Map, Value};
use tracing::level_filters::LevelFilter;

use crate::auth::{AuthConfig, UserConfig};
use crate::network::{NetworkConfig, TlsConfig};
use crate::service::ServerConfig;

/// Logging level used when neither the file nor `--log` sets one (info).
pub const DEFAULT_LOG_LEVEL: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Command-line options of the `test-server` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "test-server", version, about = "REST gateway in front of simulated devices")]
pub struct Cli {
    /// Logging level, 0 (fatal) to 5 (trace).
    #[arg(short = 'l', long = "log", value_parser = clap::value_parser!(u8).range(0..=5))]
    pub log_level: Option<u8>,

    /// JSON configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// PEM private key for TLS.
    #[arg(short = 'k', long = "private-key")]
    pub private_key: Option<PathBuf>,

    /// PEM certificate chain for TLS.
    #[arg(short = 'C', long = "certificate")]
    pub certificate: Option<PathBuf>,

    #[arg(long, env = "RESTGATE_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "RESTGATE_PORT")]
    pub port: Option<u16>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "RESTGATE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Number of simulated devices to register at startup.
    #[arg(long, default_value_t = 2)]
    pub devices: usize,

    /// Simulated device response latency in milliseconds.
    #[arg(long, default_value_t = 20)]
    pub latency_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration key {key} must be {expected}")]
    InvalidValue { key: String, expected: &'static str },
    #[error("TLS needs both a private key and a certificate")]
    IncompleteTls,
}

/// Fully resolved process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub log_level: u8,
    pub log_format: LogFormat,
    pub metrics_port: Option<u16>,
    pub devices: usize,
    pub latency: Duration,
    /// Problems that were tolerated while loading.
    pub warnings: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            log_level: DEFAULT_LOG_LEVEL,
            log_format: LogFormat::Text,
            metrics_port: None,
            devices: 2,
            latency: Duration::from_millis(20),
            warnings: Vec::new(),
        }
    }
}

/// TLS material gathered from the file and the command line.
#[derive(Default)]
struct TlsPaths {
    private_key: Option<PathBuf>,
    certificate: Option<PathBuf>,
}

impl Settings {
    /// Resolves settings from `cli`, reading its config file if one is given.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the file cannot be read or parsed, a known
    /// key has the wrong type, or only half of the TLS material is given.
    pub fn load(cli: &Cli) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        let mut tls = TlsPaths::default();

        if let Some(path) = &cli.config {
            let root = read_json(path)?;
            settings.apply_json(&root, &mut tls)?;
        }

        if let Some(level) = cli.log_level {
            settings.log_level = level;
        }
        if let Some(host) = &cli.host {
            settings.network.host.clone_from(host);
        }
        if let Some(port) = cli.port {
            settings.network.port = port;
        }
        if cli.private_key.is_some() {
            tls.private_key.clone_from(&cli.private_key);
        }
        if cli.certificate.is_some() {
            tls.certificate.clone_from(&cli.certificate);
        }
        settings.log_format = cli.log_format;
        settings.metrics_port = cli.metrics_port;
        settings.devices = cli.devices;
        settings.latency = Duration::from_millis(cli.latency_ms);

        settings.network.tls = match (tls.private_key, tls.certificate) {
            (Some(key_path), Some(cert_path)) => Some(TlsConfig {
                key_path,
                cert_path,
            }),
            (None, None) => None,
            _ => return Err(SettingsError::IncompleteTls),
        };
        Ok(settings)
    }

    /// Level filter for the configured 0-5 logging level.
    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 | 1 => LevelFilter::ERROR,
            2 => LevelFilter::WARN,
            3 => LevelFilter::INFO,
            4 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    fn apply_json(&mut self, root: &Value, tls: &mut TlsPaths) -> Result<(), SettingsError> {
        for (section, value) in as_object("<root>", root)? {
            match section.as_str() {
                "http" => self.apply_http(value, tls)?,
                "logging" => self.apply_logging(value)?,
                "notifications" => self.apply_notifications(value)?,
                "operations" => self.apply_operations(value)?,
                _ => self.unknown_section(section),
            }
        }
        Ok(())
    }

    fn apply_http(&mut self, section: &Value, tls: &mut TlsPaths) -> Result<(), SettingsError> {
        for (key, value) in as_object("http", section)? {
            match key.as_str() {
                "port" => self.network.port = as_port("http.port", value)?,
                "host" => self.network.host = as_str("http.host", value)?.to_string(),
                "security" => self.apply_security(value, tls)?,
                _ => self.unknown_key("http", key),
            }
        }
        Ok(())
    }

    fn apply_security(&mut self, section: &Value, tls: &mut TlsPaths) -> Result<(), SettingsError> {
        for (key, value) in as_object("http.security", section)? {
            match key.to_ascii_lowercase().as_str() {
                "private_key" => {
                    tls.private_key = Some(as_str("http.security.private_key", value)?.into());
                }
                "certificate" => {
                    tls.certificate = Some(as_str("http.security.certificate", value)?.into());
                }
                "jwt" => self.apply_jwt(value)?,
                _ => self.unknown_key("http.security", key),
            }
        }
        Ok(())
    }

    fn apply_jwt(&mut self, section: &Value) -> Result<(), SettingsError> {
        const SECTION: &str = "http.security.jwt";
        for (key, value) in as_object(SECTION, section)? {
            match key.to_ascii_lowercase().as_str() {
                "algorithm" => {
                    self.auth.algorithm = as_str("jwt.algorithm", value)?
                        .parse()
                        .map_err(|_| invalid("jwt.algorithm", "one of HS256, HS384, HS512"))?;
                }
                "expiration_time" => {
                    self.auth.expiration_time = as_u64("jwt.expiration_time", value)?;
                }
                "method" => {
                    self.auth.method = as_str("jwt.method", value)?
                        .parse()
                        .map_err(|_| invalid("jwt.method", "\"header\" or \"body\""))?;
                }
                "decode_key" => {
                    self.auth.decode_key = as_str("jwt.decode_key", value)?.to_string();
                }
                "users" => {
                    let users = value
                        .as_array()
                        .ok_or_else(|| invalid("jwt.users", "an array"))?;
                    for user in users {
                        self.add_user(user);
                    }
                }
                _ => self.unknown_key(SECTION, key),
            }
        }
        Ok(())
    }

    /// Adds one user entry, skipping it with a warning if it has no name, a
    /// taken name, or no secret. A missing scope becomes an empty one.
    fn add_user(&mut self, entry: &Value) {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());
        let Some(name) = name else {
            self.warnings
                .push("user configured without a valid name, skipped".to_string());
            return;
        };
        if self.auth.users.iter().any(|user| user.name == name) {
            self.warnings
                .push(format!("user \"{name}\" is configured more than once, skipped"));
            return;
        }
        let secret = entry
            .get("secret")
            .and_then(Value::as_str)
            .filter(|secret| !secret.is_empty());
        let Some(secret) = secret else {
            self.warnings
                .push(format!("user \"{name}\" configured without a valid secret, skipped"));
            return;
        };

        let scope = if let Some(patterns) = entry.get("scope").and_then(Value::as_array) {
            patterns
                .iter()
                .filter_map(|pattern| pattern.as_str().map(str::to_string))
                .collect()
        } else {
            self.warnings.push(format!(
                "user \"{name}\" configured without a valid scope, using an empty scope"
            ));
            Vec::new()
        };

        self.auth.users.push(UserConfig {
            name: name.to_string(),
            secret: secret.to_string(),
            scope,
        });
    }

    fn apply_logging(&mut self, section: &Value) -> Result<(), SettingsError> {
        for (key, value) in as_object("logging", section)? {
            match key.as_str() {
                "level" => {
                    let level = as_u64("logging.level", value)?;
                    self.log_level = u8::try_from(level.min(5)).unwrap_or(5);
                    if level > 5 {
                        self.warnings
                            .push(format!("unexpected high log level {level}, using 5"));
                    }
                }
                _ => self.unknown_key("logging", key),
            }
        }
        Ok(())
    }

    fn apply_notifications(&mut self, section: &Value) -> Result<(), SettingsError> {
        for (key, value) in as_object("notifications", section)? {
            match key.as_str() {
                "coalesce_window_ms" => {
                    self.server.coalesce_window_ms =
                        as_u64("notifications.coalesce_window_ms", value)?;
                }
                "callback_timeout_ms" => {
                    self.server.callback_timeout_ms =
                        as_u64("notifications.callback_timeout_ms", value)?;
                }
                _ => self.unknown_key("notifications", key),
            }
        }
        Ok(())
    }

    fn apply_operations(&mut self, section: &Value) -> Result<(), SettingsError> {
        for (key, value) in as_object("operations", section)? {
            match key.as_str() {
                "pending_timeout_ms" => {
                    self.server.pending_timeout_ms = as_u64("operations.pending_timeout_ms", value)?;
                }
                "gc_interval_ms" => {
                    self.server.gc_interval_ms = as_u64("operations.gc_interval_ms", value)?;
                }
                "cancel_timeout_ms" => {
                    self.server.cancel_timeout_ms = as_u64("operations.cancel_timeout_ms", value)?;
                }
                _ => self.unknown_key("operations", key),
            }
        }
        Ok(())
    }

    fn unknown_section(&mut self, section: &str) {
        self.warnings
            .push(format!("unrecognised configuration file section: {section}"));
    }

    fn unknown_key(&mut self, section: &str, key: &str) {
        self.warnings
            .push(format!("unrecognised configuration file key: {section}.{key}"));
    }
}

fn read_json(path: &Path) -> Result<Value, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(key: &str, expected: &'static str) -> SettingsError {
    SettingsError::InvalidValue {
        key: key.to_string(),
        expected,
    }
}

fn as_object<'a>(key: &str, value: &'a Value) -> Result<&'a Map<String, Value>, SettingsError> {
    value.as_object().ok_or_else(|| invalid(key, "an object"))
}

fn as_str<'a>(key: &str, value: &'a Value) -> Result<&'a str, SettingsError> {
    value.as_str().ok_or_else(|| invalid(key, "a string"))
}

fn as_u64(key: &str, value: &Value) -> Result<u64, SettingsError> {
    value
        .as_u64()
        .ok_or_else(|| invalid(key, "a non-negative integer"))
}

fn as_port(key: &str, value: &Value) -> Result<u16, SettingsError> {
    u16::try_from(as_u64(key, value)?).map_err(|_| invalid(key, "a port number"))
}
