//! Environment-backed configuration.

use serde::Deserialize;

/// Application configuration extracted from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres connection string. Required.
    pub database_url: String,

    /// Base log level for the crate's own events.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Admin actor id stamped on `updated_by`/`deleted_by` during merges,
    /// when present.
    #[serde(default)]
    pub admin_actor_id: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use figment::{Figment, providers::Env};

        Figment::new()
            .merge(Env::raw())
            .extract()
            .context("Failed to load config (is DATABASE_URL set?)")
    }
}
