//! Startup configuration from command-line flags and environment variables.
//!
//! [`Config`] is the raw clap view; [`Config::validate`] turns it into a
//! [`ValidConfig`] once, before anything binds or spawns. Missing
//! credentials are fatal at that point rather than at first use.

use std::time::Duration;

use clap::{ArgAction, Parser, builder::FalseyValueParser};
use thiserror::Error;

use crate::report::{Dsn, DsnError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not set")]
    MissingCredential { name: &'static str },

    #[error("invalid crash reporter DSN: {0}")]
    InvalidDsn(#[from] DsnError),

    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },
}

#[derive(Debug, Clone, Parser)]
#[command(name = "ravel", version, about = "HTTP service with panic capture, APM timing and request timeouts")]
pub struct Config {
    /// Interface to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Crash reporter destination, `scheme://key@host/project`
    #[arg(long, env = "SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    /// APM license key
    #[arg(long, env = "NEWRELIC_LICENSE_KEY", hide_env_values = true)]
    pub newrelic_license: Option<String>,

    /// Application name reported by the APM agent
    #[arg(long, env = "APP_NAME", default_value = "ravel")]
    pub app_name: String,

    /// Debug logging and detailed APM harvests
    #[arg(short, long, env = "VERBOSE", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    pub verbose: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 2)]
    pub timeout_secs: u64,

    /// Seconds between APM harvests
    #[arg(long, env = "APM_HARVEST_SECS", default_value_t = 60)]
    pub harvest_secs: u64,

    /// Crash reports buffered before new ones are dropped
    #[arg(long, env = "REPORT_QUEUE", default_value_t = 64)]
    pub report_queue: usize,
}

/// Configuration after validation. Immutable for the life of the process.
#[derive(Debug, Clone)]
pub struct ValidConfig {
    pub addr: String,
    pub dsn: Dsn,
    pub license: String,
    pub app_name: String,
    pub verbose: bool,
    pub timeout: Duration,
    pub harvest_interval: Duration,
    pub report_queue: usize,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingCredential { name })
}

fn non_zero(secs: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::ZeroDuration { name });
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// # Errors
    ///
    /// - [`ConfigError::MissingCredential`] when the DSN or the license key is
    ///   absent or blank.
    /// - [`ConfigError::InvalidDsn`] when the DSN does not parse.
    /// - [`ConfigError::ZeroDuration`] for a zero timeout or harvest interval.
    pub fn validate(self) -> Result<ValidConfig, ConfigError> {
        let dsn: Dsn = required(self.sentry_dsn, "SENTRY_DSN")?.parse()?;
        let license = required(self.newrelic_license, "NEWRELIC_LICENSE_KEY")?;

        Ok(ValidConfig {
            addr: format!("{}:{}", self.host, self.port),
            dsn,
            license,
            app_name: self.app_name,
            verbose: self.verbose,
            timeout: non_zero(self.timeout_secs, "REQUEST_TIMEOUT_SECS")?,
            harvest_interval: non_zero(self.harvest_secs, "APM_HARVEST_SECS")?,
            report_queue: self.report_queue.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 8080,
            sentry_dsn: Some("https://key@errors.example.com/1".into()),
            newrelic_license: Some("license-key".into()),
            app_name: "ravel".into(),
            verbose: false,
            timeout_secs: 2,
            harvest_secs: 60,
            report_queue: 64,
        }
    }

    #[test]
    fn valid_config_resolves() {
        let valid = config().validate().unwrap();
        assert_eq!(valid.addr, "127.0.0.1:8080");
        assert_eq!(valid.dsn.project(), "1");
        assert_eq!(valid.timeout, Duration::from_secs(2));
        assert_eq!(valid.harvest_interval, Duration::from_secs(60));
    }

    #[test]
    fn missing_dsn_is_fatal() {
        let err = Config { sentry_dsn: None, ..config() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { name: "SENTRY_DSN" }));
    }

    #[test]
    fn blank_license_is_fatal() {
        let err = Config {
            newrelic_license: Some("   ".into()),
            ..config()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential { name: "NEWRELIC_LICENSE_KEY" }
        ));
    }

    #[test]
    fn malformed_dsn_is_fatal() {
        let err = Config {
            sentry_dsn: Some("not a dsn".into()),
            ..config()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDsn(DsnError::MissingScheme)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Config { timeout_secs: 0, ..config() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { name: "REQUEST_TIMEOUT_SECS" }));
    }

    #[test]
    fn flags_parse() {
        let cfg = Config::try_parse_from([
            "ravel",
            "--port",
            "9090",
            "--sentry-dsn",
            "https://k@h/2",
            "--newrelic-license",
            "abc",
            "--timeout-secs",
            "5",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.timeout_secs, 5);
        assert!(cfg.verbose);
        assert_eq!(cfg.sentry_dsn.as_deref(), Some("https://k@h/2"));
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }
}
