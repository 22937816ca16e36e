//! Environment-driven configuration, §6 "Configuration" and the
//! AMBIENT STACK notes. Mirrors the teacher's `GatewayConfig::from_env`
//! pattern: a `Default` plus a `from_env()` that overrides fields
//! present in the environment, one sub-struct per concern.

use std::time::Duration;

use event_log_types::{EventLogError, EventLogResult};

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub pool_max_size: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("DATABASE_URL", "postgres://localhost/event_log"),
            pool_max_size: env_parsed("DATABASE_POOL_MAX_SIZE", 10),
        }
    }

    pub fn validate(&self) -> EventLogResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(EventLogError::Configuration {
                message: "DATABASE_URL must not be empty".to_string(),
            });
        }
        if self.pool_max_size == 0 {
            return Err(EventLogError::Configuration {
                message: "DATABASE_POOL_MAX_SIZE must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Options surfaced by the Subscribers Registry, §4.4 and §6.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub busy_sleep: Duration,
    pub checkup_interval: Duration,
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            busy_sleep: Duration::from_secs(env_parsed("BUSY_SLEEP_SECONDS", 30)),
            checkup_interval: Duration::from_secs(env_parsed("CHECKUP_INTERVAL_SECONDS", 10)),
        }
    }

    pub fn validate(&self) -> EventLogResult<()> {
        if self.busy_sleep.is_zero() {
            return Err(EventLogError::Configuration {
                message: "BUSY_SLEEP_SECONDS must be positive".to_string(),
            });
        }
        if self.checkup_interval.is_zero() {
            return Err(EventLogError::Configuration {
                message: "CHECKUP_INTERVAL_SECONDS must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Options surfaced by the Event Finder and Sender, §4.5 and §6.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub projects_fetching_limit: usize,
    pub retry_interval: Duration,
    pub request_timeout: Duration,
    pub per_category_concurrency_limit: usize,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self {
            projects_fetching_limit: env_parsed("PROJECTS_FETCHING_LIMIT", 3),
            retry_interval: Duration::from_secs(env_parsed("RETRY_INTERVAL_SECONDS", 5)),
            request_timeout: Duration::from_millis(env_parsed("REQUEST_TIMEOUT_MS", 2_000)),
            per_category_concurrency_limit: env_parsed("PER_CATEGORY_CONCURRENCY_LIMIT", 1),
        }
    }

    pub fn validate(&self) -> EventLogResult<()> {
        if self.projects_fetching_limit == 0 {
            return Err(EventLogError::Configuration {
                message: "PROJECTS_FETCHING_LIMIT must be at least 1".to_string(),
            });
        }
        if self.per_category_concurrency_limit == 0 {
            return Err(EventLogError::Configuration {
                message: "PER_CATEGORY_CONCURRENCY_LIMIT must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_parsed("PORT", 8080),
        }
    }

    pub fn validate(&self) -> EventLogResult<()> {
        if self.host.trim().is_empty() {
            return Err(EventLogError::Configuration {
                message: "HOST must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The root configuration object, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub dispatch: DispatchConfig,
    pub http: HttpConfig,
}

impl Config {
    pub fn from_env() -> EventLogResult<Self> {
        let config = Self {
            database: DatabaseConfig::from_env(),
            registry: RegistryConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
            http: HttpConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EventLogResult<()> {
        self.database.validate()?;
        self.registry.validate()?;
        self.dispatch.validate()?;
        self.http.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("PORT");
        std::env::remove_var("BUSY_SLEEP_SECONDS");
        let config = Config::from_env().unwrap();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.registry.busy_sleep, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn from_env_honors_overrides() {
        std::env::set_var("PORT", "9090");
        std::env::set_var("PROJECTS_FETCHING_LIMIT", "5");
        let config = Config::from_env().unwrap();
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.dispatch.projects_fetching_limit, 5);
        std::env::remove_var("PORT");
        std::env::remove_var("PROJECTS_FETCHING_LIMIT");
    }

    #[test]
    fn validate_rejects_empty_database_url() {
        let config = DatabaseConfig {
            database_url: "".to_string(),
            pool_max_size: 10,
        };
        assert!(config.validate().is_err());
    }
}
