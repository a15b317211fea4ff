use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub reaper_interval_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("PARLOR_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLOR_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = match lookup("PARLOR_PORT") {
            Some(v) => v.parse().with_context(|| format!("invalid PARLOR_PORT '{}'", v))?,
            None => 3000,
        };
        let reaper_interval_secs = match lookup("PARLOR_REAPER_INTERVAL_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("invalid PARLOR_REAPER_INTERVAL_SECS '{}'", v))?,
            None => 60,
        };
        if reaper_interval_secs == 0 {
            bail!("PARLOR_REAPER_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            db_path: lookup("PARLOR_DB_PATH")
                .unwrap_or_else(|| "parlor.db".into())
                .into(),
            host: lookup("PARLOR_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            jwt_secret,
            reaper_interval_secs,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[("PARLOR_JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("parlor.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.reaper_interval_secs, 60);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn placeholder_or_missing_secret_is_rejected() {
        assert!(ServerConfig::from_lookup(lookup(&[])).is_err());
        assert!(
            ServerConfig::from_lookup(lookup(&[("PARLOR_JWT_SECRET", "dev-secret-change-me")]))
                .is_err()
        );
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PARLOR_JWT_SECRET", "s3cret"),
            ("PARLOR_HOST", "127.0.0.1"),
            ("PARLOR_PORT", "8080"),
            ("PARLOR_DB_PATH", "/tmp/chat.db"),
            ("PARLOR_REAPER_INTERVAL_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.reaper_interval_secs, 5);

        assert!(
            ServerConfig::from_lookup(lookup(&[
                ("PARLOR_JWT_SECRET", "s3cret"),
                ("PARLOR_PORT", "not-a-port"),
            ]))
            .is_err()
        );
    }
}
