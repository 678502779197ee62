use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outbound::Socks5Endpoint;
use crate::utils::error::{GatewayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Raw upstream settings as they appear in the config file or environment.
/// `build()` turns them into the validated, immutable [`UpstreamConfig`]
/// shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub socks5: Option<String>,
    #[serde(default)]
    pub socks5_relay_all: bool,
    #[serde(default = "default_doh_url")]
    pub doh_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

/// Runtime upstream configuration, immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub user_ids: Vec<Uuid>,
    pub fallback: Option<FallbackAddr>,
    pub socks5: Option<Socks5Endpoint>,
    pub socks5_relay_all: bool,
    pub doh_url: String,
}

/// Secondary hop for the retry dial. IPv6 literal hosts must be bracketed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackAddr {
    pub host: String,
    /// When absent the original destination port is kept.
    pub port: Option<u16>,
}

// Default values
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_doh_url() -> String {
    "https://1.1.1.1/dns-query".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            ws_path: default_ws_path(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            user_ids: Vec::new(),
            fallback: None,
            socks5: None,
            socks5_relay_all: false,
            doh_url: default_doh_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GatewayError::Config(format!("failed to read config file: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("failed to parse config file: {e}")))
    }

    /// Write a commented example configuration file.
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        std::fs::write(path.as_ref(), EXAMPLE_CONFIG)
            .map_err(|e| GatewayError::Config(format!("failed to write example config: {e}")))
    }

    /// Environment variables override file values for the upstream keys.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VLESSGATE_USER_IDS") {
            self.upstream.user_ids = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("VLESSGATE_FALLBACK") {
            self.upstream.fallback = Some(v);
        }
        if let Ok(v) = std::env::var("VLESSGATE_SOCKS5") {
            self.upstream.socks5 = Some(v);
        }
        if let Ok(v) = std::env::var("VLESSGATE_SOCKS5_RELAY_ALL") {
            self.upstream.socks5_relay_all = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("VLESSGATE_DOH_URL") {
            self.upstream.doh_url = v;
        }
    }
}

impl UpstreamSettings {
    pub fn build(&self) -> Result<UpstreamConfig> {
        if self.user_ids.is_empty() {
            return Err(GatewayError::Config(
                "at least one accepted user id is required".to_string(),
            ));
        }

        let mut user_ids = Vec::with_capacity(self.user_ids.len());
        for raw in &self.user_ids {
            let id = raw
                .parse::<Uuid>()
                .map_err(|e| GatewayError::Config(format!("invalid user id '{raw}': {e}")))?;
            user_ids.push(id);
        }

        let fallback = self.fallback.as_deref().map(parse_fallback).transpose()?;
        let socks5 = self
            .socks5
            .as_deref()
            .map(parse_socks5_endpoint)
            .transpose()?;

        if self.socks5_relay_all && socks5.is_none() {
            return Err(GatewayError::Config(
                "socks5_relay_all requires a socks5 endpoint".to_string(),
            ));
        }

        if self.doh_url.is_empty() {
            return Err(GatewayError::Config("doh_url must not be empty".to_string()));
        }

        Ok(UpstreamConfig {
            user_ids,
            fallback,
            socks5,
            socks5_relay_all: self.socks5_relay_all,
            doh_url: self.doh_url.clone(),
        })
    }
}

/// Parse `[user:pass@]host:port`.
pub fn parse_socks5_endpoint(s: &str) -> Result<Socks5Endpoint> {
    let (creds, hostport) = match s.rsplit_once('@') {
        Some((creds, hostport)) => (Some(creds), hostport),
        None => (None, s),
    };

    let (username, password) = match creds {
        Some(creds) => {
            let (user, pass) = creds.split_once(':').ok_or_else(|| {
                GatewayError::Config(format!("invalid socks5 credentials in '{s}'"))
            })?;
            (Some(user.to_string()), Some(pass.to_string()))
        }
        None => (None, None),
    };

    let (host, port) = parse_host_port(hostport)
        .ok_or_else(|| GatewayError::Config(format!("invalid socks5 endpoint '{s}'")))?;

    Ok(Socks5Endpoint {
        host,
        port,
        username,
        password,
    })
}

/// Parse `host[:port]`; the port is optional for fallback hops.
pub fn parse_fallback(s: &str) -> Result<FallbackAddr> {
    if s.is_empty() {
        return Err(GatewayError::Config("empty fallback address".to_string()));
    }

    if let Some(rest) = s.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| GatewayError::Config(format!("invalid fallback address '{s}'")))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => Some(port.parse::<u16>().map_err(|_| {
                GatewayError::Config(format!("invalid fallback port in '{s}'"))
            })?),
            None if rest.is_empty() => None,
            None => {
                return Err(GatewayError::Config(format!(
                    "invalid fallback address '{s}'"
                )));
            }
        };
        return Ok(FallbackAddr {
            host: host.to_string(),
            port,
        });
    }

    match s.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| GatewayError::Config(format!("invalid fallback port in '{s}'")))?;
            Ok(FallbackAddr {
                host: host.to_string(),
                port: Some(port),
            })
        }
        _ => Ok(FallbackAddr {
            host: s.to_string(),
            port: None,
        }),
    }
}

fn parse_host_port(s: &str) -> Option<(String, u16)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        let port = rest.strip_prefix(':')?.parse::<u16>().ok()?;
        return Some((host.to_string(), port));
    }
    let (host, port) = s.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse::<u16>().ok()?))
}

const EXAMPLE_CONFIG: &str = r#"# VlessGate example configuration

[server]
bind_address = "127.0.0.1"
bind_port = 8080
ws_path = "/ws"

[upstream]
# Accepted user ids (UUIDs). At least one is required.
user_ids = ["10e894da-61b1-4998-ac2b-e9ccb6af9d30"]

# Secondary hop dialed when the primary outbound yields no data.
# A bare host keeps the original destination port.
# fallback = "fallback.example:443"

# Upstream SOCKS5 proxy, `[user:pass@]host:port`.
# socks5 = "user:pass@proxy.example:1080"

# Route every outbound through the SOCKS5 proxy.
socks5_relay_all = false

# DNS-over-HTTPS resolver for UDP/53 sessions.
doh_url = "https://1.1.1.1/dns-query"

[logging]
level = "info"
format = "pretty"
"#;
