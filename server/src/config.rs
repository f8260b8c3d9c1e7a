use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Resolved server settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// Path to TOML config file
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    /// Data directory for persistent state (DB, JWT secret)
    pub data_dir: String,
    pub skip_seed: bool,
    pub store_timeout_ms: u64,
    pub unlock_poll_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4100,
            bind_address: "0.0.0.0".to_string(),
            config: "./shiftsync.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            skip_seed: false,
            store_timeout_ms: 750,
            unlock_poll_secs: 30,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

/// ShiftSync presence and progression server
///
/// Only flags given on the command line are serialized, so an absent flag
/// never shadows the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "shiftsync-server", version, about = "ShiftSync presence and progression server")]
pub struct CliArgs {
    /// Port to listen on [default: 4100]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./shiftsync.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT secret) [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Do not seed the starter curriculum on an empty database
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skip_seed: bool,

    /// Upper bound in milliseconds on a single progress/unlock store call [default: 750]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_timeout_ms: Option<u64>,

    /// Seconds between unlock refreshes for classes with live connections [default: 30]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlock_poll_secs: Option<u64>,

    /// Seconds between keep-alive pings [default: 30]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing the connection [default: 10]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (SHIFTSYNC_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(&CliArgs::parse()).extract()
    }

    /// The layered provider chain behind [`Config::load`].
    pub fn figment(cli: &CliArgs) -> Figment {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("SHIFTSYNC_"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# ShiftSync Server Configuration
# Place this file at ./shiftsync.toml or specify with --config <path>
# All settings can be overridden via environment variables (SHIFTSYNC_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4100)
# port = 4100

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT secret
# data_dir = "./data"

# Skip seeding the four-week starter curriculum on first boot
# skip_seed = false

# ---- Gate refresh ----

# Upper bound on a single progress/unlock store call in milliseconds.
# Slower calls fall back to the last cached value.
# store_timeout_ms = 750

# How often class unlock sets are re-read for classes with live connections
# unlock_poll_secs = 30

# ---- Keep-alive ----

# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
