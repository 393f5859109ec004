use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_SAFETY_API_BASE_URL: &str = "http://127.0.0.1:3000/api/";
pub const DEFAULT_FAMILY_POLL_SECS: u64 = 60;
pub const DEFAULT_MAP_POLL_SECS: u64 = 30;
pub const DEFAULT_MAP_HISTORY_DAYS: u32 = 1;
pub const DEFAULT_WARNING_HOURS: f64 = 8.0;
pub const DEFAULT_CRITICAL_HOURS: f64 = 24.0;

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

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Polling cadence and subject for one consuming view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub initial_subject: Option<String>,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub safety_api_base_url: Url,
    pub safety_api_token: Option<String>,
    pub family: PollSettings,
    pub map: PollSettings,
    pub map_history_days: u32,
    pub check_in_warning_hours: f64,
    pub check_in_critical_hours: f64,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let raw_base = env::var("SAFETY_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_SAFETY_API_BASE_URL.to_string());
        let safety_api_base_url = Url::parse(&raw_base).map_err(|source| ConfigError::BaseUrl {
            value: raw_base.clone(),
            source,
        })?;
        if safety_api_base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                name: "SAFETY_API_BASE_URL",
                value: raw_base,
            });
        }

        let family = PollSettings {
            interval: Duration::from_secs(positive_u64(
                "FAMILY_POLL_INTERVAL_SECS",
                DEFAULT_FAMILY_POLL_SECS,
            )?),
            initial_subject: optional("FAMILY_SUBJECT_ID"),
        };
        let map = PollSettings {
            interval: Duration::from_secs(positive_u64(
                "MAP_POLL_INTERVAL_SECS",
                DEFAULT_MAP_POLL_SECS,
            )?),
            initial_subject: optional("MAP_SUBJECT_ID"),
        };
        let map_history_days =
            positive_u64("MAP_HISTORY_DAYS", u64::from(DEFAULT_MAP_HISTORY_DAYS))?;
        let map_history_days =
            u32::try_from(map_history_days).map_err(|_| ConfigError::InvalidValue {
                name: "MAP_HISTORY_DAYS",
                value: map_history_days.to_string(),
            })?;

        let check_in_warning_hours = positive_f64("CHECKIN_WARNING_HOURS", DEFAULT_WARNING_HOURS)?;
        let check_in_critical_hours =
            positive_f64("CHECKIN_CRITICAL_HOURS", DEFAULT_CRITICAL_HOURS)?;
        if check_in_critical_hours <= check_in_warning_hours {
            return Err(ConfigError::ThresholdOrder {
                warning: check_in_warning_hours,
                critical: check_in_critical_hours,
            });
        }

        Ok(Self {
            bind_addr,
            environment,
            safety_api_base_url,
            safety_api_token: optional("SAFETY_API_TOKEN"),
            family,
            map,
            map_history_days,
            check_in_warning_hours,
            check_in_critical_hours,
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn positive_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = optional(name) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue { name, value: raw }),
    }
}

fn positive_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let Some(raw) = optional(name) else {
        return Ok(default);
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => Err(ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    BaseUrl {
        value: String,
        source: url::ParseError,
    },
    InvalidValue {
        name: &'static str,
        value: String,
    },
    ThresholdOrder {
        warning: f64,
        critical: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::BaseUrl { value, source } => {
                write!(f, "invalid SAFETY_API_BASE_URL value '{value}': {source}")
            }
            Self::InvalidValue { name, value } => {
                write!(f, "{name} must be a positive number (got '{value}')")
            }
            Self::ThresholdOrder { warning, critical } => write!(
                f,
                "CHECKIN_CRITICAL_HOURS ({critical}) must exceed CHECKIN_WARNING_HOURS ({warning})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ENV_GUARD, DEFAULT_BIND_ADDR};

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "SAFETY_API_BASE_URL",
        "SAFETY_API_TOKEN",
        "FAMILY_POLL_INTERVAL_SECS",
        "MAP_POLL_INTERVAL_SECS",
        "MAP_HISTORY_DAYS",
        "CHECKIN_WARNING_HOURS",
        "CHECKIN_CRITICAL_HOURS",
        "FAMILY_SUBJECT_ID",
        "MAP_SUBJECT_ID",
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

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(
            config.safety_api_base_url.as_str(),
            DEFAULT_SAFETY_API_BASE_URL
        );
        assert_eq!(config.family.interval, Duration::from_secs(60));
        assert_eq!(config.map.interval, Duration::from_secs(30));
        assert_eq!(config.family.initial_subject, None);
        assert_eq!(config.map_history_days, 1);
        assert_eq!(config.check_in_warning_hours, 8.0);
        assert_eq!(config.check_in_critical_hours, 24.0);
        assert!(config.safety_api_token.is_none());
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
    fn parses_custom_polling_and_subjects() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");
        env::set_var("FAMILY_POLL_INTERVAL_SECS", "120");
        env::set_var("MAP_POLL_INTERVAL_SECS", "15");
        env::set_var("MAP_HISTORY_DAYS", "7");
        env::set_var("FAMILY_SUBJECT_ID", " w-42 ");
        env::set_var("SAFETY_API_TOKEN", "secret");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.family.interval, Duration::from_secs(120));
        assert_eq!(config.map.interval, Duration::from_secs(15));
        assert_eq!(config.map_history_days, 7);
        assert_eq!(config.family.initial_subject.as_deref(), Some("w-42"));
        assert_eq!(config.map.initial_subject, None);
        assert_eq!(config.safety_api_token.as_deref(), Some("secret"));

        clear_env();
    }

    #[test]
    fn rejects_zero_interval() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("MAP_POLL_INTERVAL_SECS", "0");

        let err = AppConfig::from_env().expect_err("zero interval should error");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "MAP_POLL_INTERVAL_SECS", .. }
        ));

        clear_env();
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("CHECKIN_WARNING_HOURS", "12");
        env::set_var("CHECKIN_CRITICAL_HOURS", "6");

        let err = AppConfig::from_env().expect_err("inverted thresholds should error");
        assert!(matches!(err, ConfigError::ThresholdOrder { .. }));

        clear_env();
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("SAFETY_API_BASE_URL", "not a url");

        let err = AppConfig::from_env().expect_err("bad url should error");
        assert!(matches!(err, ConfigError::BaseUrl { .. }));

        clear_env();
    }
}
