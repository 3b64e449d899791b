use anyhow::Context;
use fairdice_core::{odds::validate_house_edge, DEFAULT_HOUSE_EDGE};

/// Server settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind: String,
    pub api_key: String,
    /// Balance credited to a player the first time they are seen.
    pub starting_balance: f64,
    pub default_house_edge: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://fairdice.db?mode=rwc".to_string(),
            bind: "127.0.0.1:8080".to_string(),
            api_key: "dev-key".to_string(),
            starting_balance: 1_000.0,
            default_house_edge: DEFAULT_HOUSE_EDGE,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let starting_balance = match std::env::var("STARTING_BALANCE") {
            Ok(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("STARTING_BALANCE `{raw}` is not a number"))?,
            Err(_) => defaults.starting_balance,
        };
        anyhow::ensure!(
            starting_balance.is_finite() && starting_balance >= 0.0,
            "STARTING_BALANCE must be a non-negative number"
        );
        let default_house_edge = match std::env::var("HOUSE_EDGE") {
            Ok(raw) => {
                let edge = raw
                    .parse::<f64>()
                    .with_context(|| format!("HOUSE_EDGE `{raw}` is not a number"))?;
                validate_house_edge(edge)?
            }
            Err(_) => defaults.default_house_edge,
        };
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind: std::env::var("BIND").unwrap_or(defaults.bind),
            api_key: std::env::var("API_KEY").unwrap_or(defaults.api_key),
            starting_balance,
            default_house_edge,
        })
    }
}
