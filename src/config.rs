use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::schedule::{PolicyError, SchedulePolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0}")]
    Policy(#[from] PolicyError),
}

/// Process configuration, read from `APPTD_*` environment variables.
#[derive(Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub api_key: Option<String>,
    pub policy: SchedulePolicy,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("policy", &self.policy)
            .field("compact_threshold", &self.compact_threshold)
            .field("metrics_port", &self.metrics_port)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset and empty values fall back
    /// to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let zone: Tz = parse_or(&get, "APPTD_TIMEZONE", chrono_tz::America::New_York)?;
        let open_hour: u32 = parse_or(&get, "APPTD_OPEN_HOUR", 9)?;
        let close_hour: u32 = parse_or(&get, "APPTD_CLOSE_HOUR", 19)?;
        let slot_minutes: u32 = parse_or(&get, "APPTD_SLOT_MINUTES", 30)?;
        let tolerance: u32 = parse_or(&get, "APPTD_CONFLICT_TOLERANCE_MINUTES", 15)?;
        let policy = SchedulePolicy::new(zone, open_hour, close_hour, slot_minutes, tolerance)?;

        let metrics_port = match get("APPTD_METRICS_PORT") {
            Some(v) => Some(parse_value("APPTD_METRICS_PORT", &v)?),
            None => None,
        };

        Ok(Self {
            bind: get("APPTD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "APPTD_PORT", 8080)?,
            data_dir: get("APPTD_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            api_key: get("APPTD_API_KEY"),
            policy,
            compact_threshold: parse_or(&get, "APPTD_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            request_timeout: Duration::from_secs(parse_or(&get, "APPTD_REQUEST_TIMEOUT_SECS", 30)?),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.bind, self.port);
        raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            var: "APPTD_BIND",
            value: self.bind.clone(),
            reason: e.to_string(),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("appointments.wal")
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(var) {
        Some(v) => parse_value(var, &v),
        None => Ok(default),
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
