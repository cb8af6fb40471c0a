use clap::{Parser, ValueEnum};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;

const DEFAULT_CONFIG_PATH: &str = "./chatline.toml";

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// Structured JSON logging (for Docker/production)
    pub json_logs: bool,
    /// Print a commented TOML template and exit
    #[serde(default)]
    pub generate_config: bool,
    /// Data directory for persistent state (DB, keys)
    pub data_dir: String,
    /// Shared HS256 secret of the token issuer. Generated into data_dir if unset.
    pub jwt_secret: Option<String>,
    /// How long after creation a sender may still revoke a message
    pub revoke_window_secs: u64,
    /// Default number of messages returned by a history query
    pub history_limit: u32,
    pub backend: Backend,
    /// Pub/sub relay settings, the `[relay]` table
    #[serde(default)]
    pub relay: Option<RelayConfig>,
}

/// Command line flags. Only flags the user actually passed are serialized,
/// so an absent flag never shadows the TOML file or the environment.
#[derive(Parser, Serialize, Debug)]
#[command(name = "chatline-server", version, about = "chatline realtime fanout and presence server")]
struct Cli {
    /// Port to listen on [default: 3000]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address: Option<String>,

    /// Path to TOML config file [default: ./chatline.toml]
    #[arg(long)]
    #[serde(skip)]
    config: Option<String>,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    generate_config: bool,

    /// Data directory for the database and generated keys [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    data_dir: Option<String>,

    /// Shared HS256 secret of the token issuer
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    jwt_secret: Option<String>,

    /// Revoke window in seconds [default: 300]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    revoke_window_secs: Option<u64>,

    /// Default history page size [default: 50]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    history_limit: Option<u32>,

    /// Delivery backend for outbound events [default: websocket]
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<Backend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Deliver over this server's own WebSocket connections
    Websocket,
    /// Publish through a third-party pub/sub relay
    Relay,
}

/// Configuration for the hosted pub/sub relay adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Base URL of the relay's publish API, e.g. https://relay.example.com/apps/123
    pub url: String,

    /// Public application key sent with every publish
    pub app_key: String,

    /// Shared secret used to sign publish requests
    pub secret: String,

    /// Request timeout in seconds (default: 10)
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,
}

fn default_relay_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            revoke_window_secs: 300,
            history_limit: 50,
            backend: Backend::Websocket,
            relay: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATLINE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(std::env::args_os())
    }

    /// Same as [`Config::load`] with an explicit argument list, program name first.
    pub fn load_from<I, T>(args: I) -> Result<Self, figment::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::parse_from(args);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATLINE_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# chatline Server Configuration
# Place this file at ./chatline.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATLINE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated JWT key
# data_dir = "./data"

# HS256 secret shared with the token issuer.
# Leave unset to generate a random key in data_dir.
# jwt_secret = ""

# Messages can be revoked by their sender for this many seconds (default: 300)
# revoke_window_secs = 300

# Messages returned by a history query when the client does not ask for a limit
# history_limit = 50

# Delivery backend: "websocket" or "relay"
# backend = "websocket"

# ---- Pub/Sub Relay (backend = "relay") ----
# [relay]
# url = "https://relay.example.com/apps/123"
# app_key = ""
# secret = ""
# timeout_secs = 10
"#
    .to_string()
}
