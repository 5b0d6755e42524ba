use std::{env, fmt, net::SocketAddr, path::PathBuf};

use super::{parse_flag, server_bind_address};

/// Session signing secret used when `SESSION_SECRET` is unset outside production.
pub const DEVELOPMENT_SESSION_SECRET: &str = "rolebase-development-session-secret";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Session token settings.
#[derive(Clone)]
pub struct SessionConfig {
    pub secret: Vec<u8>,
    pub ttl_secs: u64,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

/// Controls the startup seeding routine.
#[derive(Debug, Clone, Default)]
pub struct SeedSettings {
    /// JSON file overriding the built-in seed plan.
    pub config_path: Option<PathBuf>,
    /// Assign designated roles to seed accounts that already exist without them.
    pub repair_assignments: bool,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub session: SessionConfig,
    pub require_confirmed_account: bool,
    pub seed: SeedSettings,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingVar("DATABASE_URL"))?;

        let secret = match env::var("SESSION_SECRET") {
            Ok(value) if !value.is_empty() => value.into_bytes(),
            _ if environment.is_production() => {
                return Err(ConfigError::MissingVar("SESSION_SECRET"))
            }
            _ => DEVELOPMENT_SESSION_SECRET.as_bytes().to_vec(),
        };
        let ttl_secs = match env::var("SESSION_TTL_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidNumber {
                    name: "SESSION_TTL_SECS",
                    value: raw,
                })?,
            Err(_) => DEFAULT_SESSION_TTL_SECS,
        };

        let require_confirmed_account = read_flag("REQUIRE_CONFIRMED_ACCOUNT")?;
        let seed = SeedSettings {
            config_path: env::var("SEED_CONFIG_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            repair_assignments: read_flag("SEED_REPAIR_ASSIGNMENTS")?,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            session: SessionConfig { secret, ttl_secs },
            require_confirmed_account,
            seed,
        })
    }
}

fn read_flag(name: &'static str) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_flag(&value).ok_or(ConfigError::InvalidFlag { name, value }),
        Err(_) => Ok(false),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidFlag { name: &'static str, value: String },
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set"),
            Self::InvalidFlag { name, value } => {
                write!(f, "{name} must be a boolean flag (got {value})")
            }
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BIND_ADDR, ENV_GUARD};

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_URL",
        "SESSION_SECRET",
        "SESSION_TTL_SECS",
        "REQUIRE_CONFIRMED_ACCOUNT",
        "SEED_CONFIG_PATH",
        "SEED_REPAIR_ASSIGNMENTS",
    ];

    fn clear_env() {
        for name in VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("DATABASE_URL", "sqlite://app.db");

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, "sqlite://app.db");
        assert_eq!(config.session.secret, DEVELOPMENT_SESSION_SECRET.as_bytes());
        assert_eq!(config.session.ttl_secs, DEFAULT_SESSION_TTL_SECS);
        assert!(!config.require_confirmed_account);
        assert!(config.seed.config_path.is_none());
        assert!(!config.seed.repair_assignments);

        clear_env();
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_env();
    }

    #[test]
    fn requires_database_url() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let err = AppConfig::from_env().expect_err("missing database url should error");
        assert!(matches!(err, ConfigError::MissingVar("DATABASE_URL")));
    }

    #[test]
    fn production_requires_session_secret() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");
        env::set_var("DATABASE_URL", "sqlite://app.db");

        let err = AppConfig::from_env().expect_err("production without secret should error");
        assert!(matches!(err, ConfigError::MissingVar("SESSION_SECRET")));

        clear_env();
    }

    #[test]
    fn parses_production_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        env::set_var("DATABASE_URL", "sqlite:///var/lib/rolebase/app.db");
        env::set_var("SESSION_SECRET", "prod-secret");
        env::set_var("SESSION_TTL_SECS", "900");
        env::set_var("REQUIRE_CONFIRMED_ACCOUNT", "true");
        env::set_var("SEED_CONFIG_PATH", "/etc/rolebase/seed.json");
        env::set_var("SEED_REPAIR_ASSIGNMENTS", "1");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.session.secret, b"prod-secret");
        assert_eq!(config.session.ttl_secs, 900);
        assert!(config.require_confirmed_account);
        assert_eq!(
            config.seed.config_path,
            Some(PathBuf::from("/etc/rolebase/seed.json"))
        );
        assert!(config.seed.repair_assignments);

        clear_env();
    }

    #[test]
    fn rejects_malformed_flags_and_numbers() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("DATABASE_URL", "sqlite://app.db");
        env::set_var("SEED_REPAIR_ASSIGNMENTS", "sometimes");

        let err = AppConfig::from_env().expect_err("bad flag should error");
        assert!(matches!(
            err,
            ConfigError::InvalidFlag { name: "SEED_REPAIR_ASSIGNMENTS", .. }
        ));

        env::remove_var("SEED_REPAIR_ASSIGNMENTS");
        env::set_var("SESSION_TTL_SECS", "0");
        let err = AppConfig::from_env().expect_err("zero ttl should error");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { name: "SESSION_TTL_SECS", .. }
        ));

        clear_env();
    }
}
