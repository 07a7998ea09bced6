//! Explicit configuration structs, built once in `main` and passed by
//! reference into the source/store constructors. Business logic never reads
//! the process environment directly.

use std::time::Duration;

use anyhow::Result;

use crate::util::env::{env_opt, env_parse, env_req};

/// Database credentials. Either `DATABASE_URL` as a whole, or the individual
/// `DB_*` parts composed into a DSN.
#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub url: String,
}

impl DbCredentials {
    pub fn from_env() -> Result<Self> {
        if let Some(url) = env_opt("DATABASE_URL") {
            return Ok(Self { url });
        }
        let user = env_req("DB_USER")?;
        let password = env_req("DB_PASSWORD")?;
        let host = env_req("DB_HOST")?;
        let port = env_opt("DB_PORT").unwrap_or_else(|| "5432".to_string());
        let name = env_req("DB_NAME")?;
        Ok(Self {
            url: format!("postgres://{user}:{password}@{host}:{port}/{name}"),
        })
    }
}

/// Connection-pool tuning for the catalog store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl StoreConfig {
    /// Defaults with `DB_MAX_CONNECTIONS` / `DB_MIN_CONNECTIONS` overrides
    /// for hosts where the stock pool size doesn't fit.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_parse("DB_MIN_CONNECTIONS", defaults.min_connections),
            ..defaults
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5 * 60),
            max_lifetime: Duration::from_secs(10 * 60),
        }
    }
}

/// Endpoints and HTTP settings for the catalog source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub search_url: String,
    pub image_base_url: String,
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            search_url: "https://mp-search-api.tcgplayer.com/v1/search/request?q=&isList=false"
                .to_string(),
            image_base_url: "https://tcgplayer-cdn.tcgplayer.com/product/".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_config_env_overrides_pool_sizes() {
        std::env::set_var("DB_MAX_CONNECTIONS", "16");
        std::env::remove_var("DB_MIN_CONNECTIONS");
        let config = StoreConfig::from_env();
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.min_connections, StoreConfig::default().min_connections);
        std::env::remove_var("DB_MAX_CONNECTIONS");
    }
}
