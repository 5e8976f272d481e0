//! MQTT output parameter string
//!
//! Format: `[scheme://]host[:port][,key=value...]`, for example
//! `mqtts://broker.lan:8883,user=pi,pass=secret,retain=1,qos=1`.

use std::fmt;

use crate::protocol::QoS;
use crate::topic::TopicTemplate;

use super::ConfigError;

/// Connection scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain MQTT over TCP
    #[default]
    Mqtt,
    /// MQTT over TLS
    Mqtts,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Mqtt => write!(f, "mqtt"),
            Protocol::Mqtts => write!(f, "mqtts"),
        }
    }
}

impl Protocol {
    /// Get default port for this protocol
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Mqtt => 1883,
            Protocol::Mqtts => 8883,
        }
    }

    /// Check if this protocol uses TLS
    pub fn uses_tls(&self) -> bool {
        matches!(self, Protocol::Mqtts)
    }
}

/// CA certificate value that enables TLS without verifying the server
pub const NO_VERIFY_CA: &str = "*";

/// TLS sub-options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// CA certificate file, or `*` to skip server verification
    pub ca_cert: Option<String>,
    /// Client certificate chain file
    pub cert: Option<String>,
    /// Client private key file
    pub key: Option<String>,
    /// Name to verify the server certificate against (defaults to host)
    pub server_name: Option<String>,
}

impl TlsOptions {
    /// TLS is on when a CA certificate (or `*`) is set
    pub fn is_enabled(&self) -> bool {
        self.ca_cert.is_some()
    }

    /// Whether the server certificate is checked against a CA file
    pub fn verifies_server(&self) -> bool {
        matches!(self.ca_cert.as_deref(), Some(ca) if ca != NO_VERIFY_CA)
    }
}

const PATH_DEVICES: &str = "devices[/type][/model][/subtype][/channel][/id]";
const PATH_EVENTS: &str = "events";
const PATH_STATES: &str = "states";

/// Parsed MQTT output settings
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub retain: bool,
    pub qos: QoS,
    pub devices: Option<TopicTemplate>,
    pub events: Option<TopicTemplate>,
    pub states: Option<TopicTemplate>,
    pub tls: TlsOptions,
    /// Short local hostname used for `[hostname]` and the default base topic
    pub hostname: String,
}

impl OutputConfig {
    /// Parse a parameter string
    ///
    /// `hostname` is the short local hostname; the default topics live
    /// under `rtl_433/<hostname>`.
    pub fn parse(param: &str, hostname: &str) -> Result<Self, ConfigError> {
        let (protocol, rest) = strip_scheme(param.trim());

        let mut tls = TlsOptions::default();
        if protocol.uses_tls() {
            tls.ca_cert = Some(NO_VERIFY_CA.to_string());
        }

        let (hostport, opts) = match rest.split_once(',') {
            Some((hostport, opts)) => (hostport, opts),
            None => (rest, ""),
        };
        let (host, port) = parse_host_port(hostport, protocol.default_port())?;

        let base = format!("rtl_433/{}", hostname);
        let mut config = Self {
            protocol,
            host,
            port,
            username: None,
            password: None,
            retain: false,
            qos: QoS::AtMostOnce,
            devices: None,
            events: None,
            states: None,
            tls,
            hostname: hostname.to_string(),
        };

        for option in opts.split(',') {
            let (key, value) = match option.split_once('=') {
                Some((k, v)) => (k, Some(v.trim())),
                None => (option, None),
            };
            let key: String = key.chars().filter(|c| !c.is_whitespace()).collect();
            if key.is_empty() {
                continue;
            }
            config.apply(&key.to_ascii_lowercase(), value, &base)?;
        }

        if config.devices.is_none() && config.events.is_none() && config.states.is_none() {
            config.devices = Some(default_topic(None, &base, PATH_DEVICES)?);
            config.events = Some(default_topic(None, &base, PATH_EVENTS)?);
            config.states = Some(default_topic(None, &base, PATH_STATES)?);
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: Option<&str>, base: &str) -> Result<(), ConfigError> {
        match key {
            "u" | "user" => self.username = value.map(str::to_string),
            "p" | "pass" => self.password = value.map(str::to_string),
            "r" | "retain" => self.retain = parse_bool(key, value, true)?,
            "q" | "qos" => self.qos = parse_qos(key, value)?,
            "d" | "devices" => self.devices = Some(default_topic(value, base, PATH_DEVICES)?),
            "e" | "events" => self.events = Some(default_topic(value, base, PATH_EVENTS)?),
            "s" | "states" => self.states = Some(default_topic(value, base, PATH_STATES)?),
            "c" | "usechannel" => return Err(ConfigError::UseChannelRemoved),
            "tls_ca_cert" => self.tls.ca_cert = Some(require_value(key, value)?),
            "tls_cert" => self.tls.cert = Some(require_value(key, value)?),
            "tls_key" => self.tls.key = Some(require_value(key, value)?),
            "tls_server_name" => self.tls.server_name = Some(require_value(key, value)?),
            "tls_cipher_suites" | "tls_psk_identity" | "tls_psk_key" => {
                return Err(ConfigError::UnsupportedTlsOption(key.to_string()))
            }
            _ => return Err(ConfigError::InvalidKey(key.to_string())),
        }
        Ok(())
    }

    /// Broker address as `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_enabled()
    }
}

/// Split off a leading `mqtt` / `mqtts` scheme
fn strip_scheme(param: &str) -> (Protocol, &str) {
    for (scheme, protocol) in [("mqtts", Protocol::Mqtts), ("mqtt", Protocol::Mqtt)] {
        let Some(prefix) = param.get(..scheme.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(scheme) {
            continue;
        }
        let rest = &param[scheme.len()..];
        if rest.is_empty() {
            return (protocol, rest);
        }
        if let Some(rest) = rest.strip_prefix(':') {
            return (protocol, rest.strip_prefix("//").unwrap_or(rest));
        }
        if rest.starts_with(',') {
            return (protocol, rest);
        }
    }
    (Protocol::Mqtt, param)
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port`
fn parse_host_port(s: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(("localhost".to_string(), default_port));
    }

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(|| ConfigError::InvalidValue {
            key: "host".to_string(),
            value: s.to_string(),
        })?;
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':').ok_or_else(|| ConfigError::InvalidValue {
                key: "host".to_string(),
                value: s.to_string(),
            })?),
        };
        (host, port)
    } else {
        match s.split_once(':') {
            // A bare IPv6 address has more than one colon
            Some((host, port)) if !port.contains(':') => (host, Some(port)),
            _ => (s, None),
        }
    };

    let port = match port {
        None | Some("") => default_port,
        Some(p) => p.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            key: "port".to_string(),
            value: p.to_string(),
        })?,
    };
    let host = if host.is_empty() { "localhost" } else { host };

    Ok((host.to_string(), port))
}

fn default_topic(
    value: Option<&str>,
    base: &str,
    suffix: &str,
) -> Result<TopicTemplate, ConfigError> {
    let template = match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => format!("{}/{}", base, suffix),
    };
    TopicTemplate::parse(&template).map_err(ConfigError::from)
}

fn require_value(key: &str, value: Option<&str>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::MissingValue(key.to_string())),
    }
}

/// Boolean option value; a bare key means `default`
pub(crate) fn parse_bool(key: &str, value: Option<&str>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_qos(key: &str, value: Option<&str>) -> Result<QoS, ConfigError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(QoS::AtLeastOnce);
    };
    value
        .parse::<u8>()
        .ok()
        .and_then(QoS::from_u8)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
