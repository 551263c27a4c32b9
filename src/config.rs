// src/config.rs

use std::env;
use std::error::Error;

use dotenvy::dotenv;
use url::Url;

/// Default allowance past the nominal deadline during which a submit is still accepted.
pub const DEFAULT_GRACE_SECONDS: i64 = 5;

/// Default number of attempts for a rank recompute that keeps hitting write conflicts.
pub const DEFAULT_RANK_RETRY_LIMIT: u32 = 3;

const DEFAULT_CERTIFICATE_BASE_URL: &str = "http://localhost:3000/storage/";

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When absent the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub port: u16,
    pub grace_seconds: i64,
    pub rank_retry_limit: u32,
    /// Base under which rendered certificates are published.
    pub certificate_base_url: Url,
    /// JSON fixture loaded into the in-memory store at startup.
    pub seed_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let jwt_secret = lookup("JWT_SECRET").ok_or("JWT_SECRET must be set")?;

        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| format!("PORT must be a port number: {}", e))?,
            None => 3000,
        };

        let grace_seconds = match lookup("GRACE_SECONDS") {
            Some(raw) => {
                let value = raw
                    .parse::<i64>()
                    .map_err(|e| format!("GRACE_SECONDS must be an integer: {}", e))?;
                if value < 0 {
                    return Err("GRACE_SECONDS cannot be negative".into());
                }
                value
            }
            None => DEFAULT_GRACE_SECONDS,
        };

        let rank_retry_limit = match lookup("RANK_RETRY_LIMIT") {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|e| format!("RANK_RETRY_LIMIT must be a positive integer: {}", e))?
                .max(1),
            None => DEFAULT_RANK_RETRY_LIMIT,
        };

        let raw_base = lookup("CERTIFICATE_BASE_URL")
            .unwrap_or_else(|| DEFAULT_CERTIFICATE_BASE_URL.to_string());
        // `Url::join` drops the last path segment unless the base ends with a slash.
        let raw_base = if raw_base.ends_with('/') {
            raw_base
        } else {
            format!("{}/", raw_base)
        };
        let certificate_base_url = Url::parse(&raw_base)
            .map_err(|e| format!("CERTIFICATE_BASE_URL is not a valid URL: {}", e))?;

        let seed_path = lookup("SEED_PATH").filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url,
            jwt_secret,
            rust_log,
            port,
            grace_seconds,
            rank_retry_limit,
            certificate_base_url,
            seed_path,
        })
    }
}
