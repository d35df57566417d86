//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::MatchRules;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Host advertised to participants in join endpoints
    pub public_host: String,

    /// Match capacity, 2..=4
    pub max_players: usize,
    pub score_to_win: i32,
    /// Host a room at start-up and after every reset
    pub auto_open_room: bool,
    /// Seed for spawn sampling; random when unset
    pub match_seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let max_players = parse_var("MAX_PLAYERS", 4usize)?;
        if !(2..=4).contains(&max_players) {
            return Err(ConfigError::Invalid("MAX_PLAYERS"));
        }

        let score_to_win = parse_var("SCORE_TO_WIN", 100i32)?;
        if score_to_win <= 0 {
            return Err(ConfigError::Invalid("SCORE_TO_WIN"));
        }

        let match_seed = match env::var("MATCH_SEED") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid("MATCH_SEED"))?),
            Err(_) => None,
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            public_host: env::var("PUBLIC_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_addr,
            max_players,
            score_to_win,
            auto_open_room: parse_var("AUTO_OPEN_ROOM", true)?,
            match_seed,
        })
    }

    /// Base WebSocket address handed out with join codes
    pub fn public_ws_base(&self) -> String {
        format!("ws://{}:{}", self.public_host, self.server_addr.port())
    }

    /// Gameplay tuning with the configured overrides applied
    pub fn match_rules(&self) -> MatchRules {
        MatchRules {
            capacity: self.max_players,
            score_to_win: self.score_to_win,
            ..MatchRules::default()
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
