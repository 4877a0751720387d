use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub auth_timeout: Duration,
    /// `None` disables the summary reconciliation task.
    pub reconcile_interval: Option<Duration>,
}

impl Config {
    /// Read `PARLEY_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let db_path = lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into();
        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "PARLEY_PORT", 3000u16)?;
        let auth_timeout = parse_or(&lookup, "PARLEY_AUTH_TIMEOUT_SECS", 10u64)?;
        let reconcile_secs = parse_or(&lookup, "PARLEY_RECONCILE_INTERVAL_SECS", 300u64)?;

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            auth_timeout: Duration::from_secs(auth_timeout),
            reconcile_interval: (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs)),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = config_from(&[("PARLEY_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.reconcile_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn missing_or_placeholder_secret_is_fatal() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn zero_interval_disables_reconciliation() {
        let config = config_from(&[
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_RECONCILE_INTERVAL_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.reconcile_interval, None);
    }

    #[test]
    fn bad_number_is_an_error() {
        let err = config_from(&[("PARLEY_JWT_SECRET", "s3cret"), ("PARLEY_PORT", "http")])
            .unwrap_err();
        assert!(err.to_string().contains("PARLEY_PORT"));
    }
}
