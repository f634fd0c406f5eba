use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Arena battle server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "arena-server", version, about = "Arena rock-paper-scissors battle server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "ARENA_PORT", default_value = "8899")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "ARENA_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./arena.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "ARENA_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (SQLite database)
    #[arg(long, env = "ARENA_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Seconds before a battle offer stops being listed/accepted
    #[arg(long, env = "ARENA_OFFER_EXPIRES_SECS", default_value = "300")]
    pub offer_expires_secs: i64,

    /// Hit points each participant starts a battle with
    #[arg(long, env = "ARENA_STARTING_HP", default_value = "100")]
    pub starting_hp: i64,

    /// Minimum damage dealt by a winning move
    #[arg(long, env = "ARENA_DAMAGE_MIN", default_value = "10")]
    pub damage_min: i64,

    /// Maximum damage dealt by a winning move
    #[arg(long, env = "ARENA_DAMAGE_MAX", default_value = "20")]
    pub damage_max: i64,

    /// Seconds between WebSocket keep-alive pings
    #[arg(long, env = "ARENA_PING_INTERVAL_SECS", default_value = "5")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long, env = "ARENA_PONG_TIMEOUT_SECS", default_value = "5")]
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8899,
            bind_address: "0.0.0.0".to_string(),
            config: "./arena.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            offer_expires_secs: 300,
            starting_hp: 100,
            damage_min: 10,
            damage_max: 20,
            ping_interval_secs: 5,
            pong_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (ARENA_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ARENA_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Battle tuning values carried into the domain logic. Split out of the full
/// Config so the battle service does not depend on transport settings.
#[derive(Debug, Clone, Copy)]
pub struct BattleRules {
    pub offer_expires_secs: i64,
    pub starting_hp: i64,
    pub damage_min: i64,
    pub damage_max: i64,
}

impl From<&Config> for BattleRules {
    fn from(config: &Config) -> Self {
        Self {
            offer_expires_secs: config.offer_expires_secs,
            starting_hp: config.starting_hp,
            damage_min: config.damage_min,
            damage_max: config.damage_max,
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Arena Battle Server Configuration
# Place this file at ./arena.toml or specify with --config <path>
# All settings can be overridden via environment variables (ARENA_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8899)
# port = 8899

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Battle tuning ----

# Seconds before a battle offer stops being listed/accepted (default: 300)
# offer_expires_secs = 300

# Hit points each participant starts with (default: 100)
# starting_hp = 100

# Inclusive damage range for a winning move (default: 10..=20)
# damage_min = 10
# damage_max = 20

# ---- WebSocket keep-alive ----

# ping_interval_secs = 5
# pong_timeout_secs = 5
"#
    .to_string()
}
