//! Server Configuration
//!
//! Read once at startup from the environment (after `.env`, if present).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// `DATABASE_URL` value selecting the in-memory store
pub const MEMORY_STORE_URL: &str = "memory://";

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173,https://juwahouse.vercel.app";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHECKOUT_RATE_LIMIT: u32 = 10;
const DEFAULT_CHECKOUT_RATE_WINDOW_SECS: u64 = 15 * 60;
const DEFAULT_ORPHAN_MAX_AGE_SECS: u64 = 60 * 60;
const DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Per-client limit on checkout creation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: NonZeroU32,
    pub window: Duration,
}

#[derive(Clone)]
pub struct Config {
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub database_url: String,
    /// Storefront base URL for checkout redirects
    pub client_url: String,
    pub allowed_origins: Vec<String>,
    pub bind_host: IpAddr,
    pub port: u16,
    pub request_timeout: Duration,
    pub checkout_rate_limit: RateLimitConfig,
    pub orphan_max_age: Duration,
    pub orphan_sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        let max_requests = NonZeroU32::new(parse_or(
            &get,
            "CHECKOUT_RATE_LIMIT",
            DEFAULT_CHECKOUT_RATE_LIMIT,
        )?)
        .ok_or_else(|| ConfigError::Invalid {
            name: "CHECKOUT_RATE_LIMIT",
            reason: "must be at least 1".into(),
        })?;

        let request_timeout =
            secs_or(&get, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let orphan_max_age = secs_or(&get, "ORPHAN_MAX_AGE_SECS", DEFAULT_ORPHAN_MAX_AGE_SECS)?;

        // A checkout still waiting on the provider must not be swept
        if orphan_max_age <= request_timeout {
            return Err(ConfigError::Invalid {
                name: "ORPHAN_MAX_AGE_SECS",
                reason: "must be greater than REQUEST_TIMEOUT_SECS".into(),
            });
        }

        Ok(Self {
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            database_url: required("DATABASE_URL")?,
            client_url: required("CLIENT_URL")?,
            allowed_origins,
            bind_host: parse_or(&get, "BIND_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            request_timeout,
            checkout_rate_limit: RateLimitConfig {
                max_requests,
                window: secs_or(
                    &get,
                    "CHECKOUT_RATE_WINDOW_SECS",
                    DEFAULT_CHECKOUT_RATE_WINDOW_SECS,
                )?,
            },
            orphan_max_age,
            orphan_sweep_interval: secs_or(
                &get,
                "ORPHAN_SWEEP_INTERVAL_SECS",
                DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS,
            )?,
        })
    }

    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_STORE_URL
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(name).map_or(Ok(default), |raw| {
        raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })
    })
}

fn secs_or(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs = parse_or(get, name, default)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn required_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("STRIPE_SECRET_KEY", "sk_test_xxx".to_string()),
            ("STRIPE_WEBHOOK_SECRET", "whsec_test".to_string()),
            ("DATABASE_URL", MEMORY_STORE_URL.to_string()),
            ("CLIENT_URL", "http://localhost:5173".to_string()),
        ])
    }

    pub(crate) fn config_from(env: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&required_env()).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:5000");
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:5173", "https://juwahouse.vercel.app"]
        );
        assert_eq!(config.checkout_rate_limit.max_requests.get(), 10);
        assert_eq!(config.checkout_rate_limit.window, Duration::from_secs(900));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.uses_memory_store());
    }

    #[test]
    fn test_missing_required() {
        for key in [
            "STRIPE_SECRET_KEY",
            "STRIPE_WEBHOOK_SECRET",
            "DATABASE_URL",
            "CLIENT_URL",
        ] {
            let mut env = required_env();
            env.insert(key, "  ".into());
            assert_eq!(config_from(&env).err(), Some(ConfigError::Missing(key)));
        }
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let mut env = required_env();
        env.insert("PORT", "8080".into());
        env.insert("CORS_ALLOWED_ORIGINS", " https://a.example , ,https://b.example".into());
        env.insert("DATABASE_URL", "postgres://localhost/credits".into());
        let config = config_from(&env).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.allowed_origins, vec!["https://a.example", "https://b.example"]);
        assert!(!config.uses_memory_store());

        env.insert("PORT", "eighty".into());
        assert!(matches!(
            config_from(&env),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));

        let mut env = required_env();
        env.insert("CHECKOUT_RATE_LIMIT", "0".into());
        assert!(matches!(
            config_from(&env),
            Err(ConfigError::Invalid { name: "CHECKOUT_RATE_LIMIT", .. })
        ));
    }

    #[test]
    fn test_orphan_age_must_exceed_request_timeout() {
        let mut env = required_env();
        env.insert("REQUEST_TIMEOUT_SECS", "30".into());
        env.insert("ORPHAN_MAX_AGE_SECS", "30".into());
        assert!(matches!(
            config_from(&env),
            Err(ConfigError::Invalid { name: "ORPHAN_MAX_AGE_SECS", .. })
        ));

        env.insert("ORPHAN_MAX_AGE_SECS", "31".into());
        let config = config_from(&env).unwrap();
        assert_eq!(config.orphan_max_age, Duration::from_secs(31));
    }
}
