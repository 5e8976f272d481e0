//! Configuration Module
//!
//! Two layers of configuration:
//! - The MQTT output parameter string (`[scheme://]host[:port][,key=value...]`)
//!   parsed into an [`OutputConfig`]
//! - An optional TOML file for the binary (log level, output parameter,
//!   input path) with environment variable overrides (SENSORMQ__* prefix)

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::client::TlsError;
use crate::topic::TemplateError;

mod client_id;
mod output;


pub use client_id::{client_id, crc16, short_hostname, CRC16_INIT, CRC16_POLY};
pub use output::{OutputConfig, Protocol, TlsOptions, NO_VERIFY_CA};

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").ok())
        .as_ref()
    else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
    /// Unknown option key in the output parameter
    InvalidKey(String),
    /// Option value that cannot be parsed
    InvalidValue { key: String, value: String },
    /// Option that requires a value was given bare
    MissingValue(String),
    /// The removed `usechannel` option
    UseChannelRemoved,
    /// TLS option this build does not implement
    UnsupportedTlsOption(String),
    /// Malformed topic template
    Template(TemplateError),
    /// TLS material could not be loaded
    Tls(TlsError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ConfigError::InvalidKey(key) => write!(f, "Invalid key \"{}\" option.", key),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value \"{}\" for option \"{}\".", value, key)
            }
            ConfigError::MissingValue(key) => write!(f, "Option \"{}\" requires a value.", key),
            ConfigError::UseChannelRemoved => write!(
                f,
                "\"usechannel=...\" has been removed. Use a topic format string:\n\
                 for \"afterid\"   use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/id][/channel]\"\n\
                 for \"beforeid\"  use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/channel][/id]\"\n\
                 for \"replaceid\" use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/channel]\"\n\
                 for \"no\"        use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/id]\""
            ),
            ConfigError::UnsupportedTlsOption(key) => {
                write!(f, "TLS option \"{}\" is not supported by this build.", key)
            }
            ConfigError::Template(e) => write!(f, "Topic error: {}", e),
            ConfigError::Tls(e) => write!(f, "TLS error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Config(e) => Some(e),
            ConfigError::Template(e) => Some(e),
            ConfigError::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl From<TemplateError> for ConfigError {
    fn from(e: TemplateError) -> Self {
        ConfigError::Template(e)
    }
}

impl From<TlsError> for ConfigError {
    fn from(e: TlsError) -> Self {
        ConfigError::Tls(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// MQTT output configuration
    pub output: OutputSection,
    /// Event input configuration
    pub input: InputConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// MQTT output section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Output parameter string, e.g. `mqtt://broker:1883,retain=1`
    #[serde(default = "default_output_url")]
    pub url: String,
    /// Input device hint mixed into the client identifier
    pub device_hint: Option<String>,
}

fn default_output_url() -> String {
    "mqtt".to_string()
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            url: default_output_url(),
            device_hint: None,
        }
    }
}

/// Event input section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InputConfig {
    /// Newline-delimited JSON file; standard input when unset
    pub path: Option<PathBuf>,
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `SENSORMQ__` prefix with double underscores for nesting:
    ///    - `SENSORMQ__OUTPUT__URL=mqtts://broker` overrides `output.url`
    ///    - `SENSORMQ__LOG__LEVEL=debug` overrides `log.level`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", default_log_level())?
            .set_default("output.url", default_output_url())?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("SENSORMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if self.output.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "output.url cannot be empty".to_string(),
            ));
        }

        // Catch parameter errors at load time; the hostname only affects topics
        OutputConfig::parse(&self.output.url, "localhost")?;

        Ok(())
    }
}
