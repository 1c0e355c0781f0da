use std::str::FromStr;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub webhook_url: Option<String>,
    pub ping_role_id: Option<String>,
    pub base_url: String,
    pub session_inactivity_minutes: i64,
}

impl Config {
    /// Reads the configuration from the environment, honouring a `.env` file.
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            database_url: dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            max_connections: parsed("MAX_CONNECTIONS", 16)?,
            webhook_url: optional("WEBHOOK_URL"),
            ping_role_id: optional("PING_ROLE_ID"),
            base_url: optional("BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_owned()),
            session_inactivity_minutes: parsed("SESSION_INACTIVITY_MINUTES", 60)?,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(v) => v.parse().with_context(|| format!("{key} is not valid: {v:?}")),
        None => Ok(default),
    }
}
