//! Configuration loading and representation.
//!
//! [`Config`] is built once at startup and handed to constructors; nothing
//! else in the service reads the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::client::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Base URL used to build `Location` headers.
    pub external_location_address: String,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ItsmConfig {
    pub channel_endpoint: String,
    pub user_endpoint: String,
    pub incident_endpoint: String,
    pub request_endpoint: String,
    /// Bearer token for ITSM calls (`ASSERTION_TOKEN`).
    pub auth_token: Option<SecretString>,
    pub retry: RetryPolicy,
    /// Timeout of a single HTTP attempt.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub server_url: String,
    pub server_token: Option<SecretString>,
    pub message_stream: String,
    pub from_address: String,
    pub service_desk_recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportsConfig {
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// Postgres connection string; jobs are kept in memory when unset.
    pub database_url: Option<SecretString>,
    /// Number of jobs the in-memory repository keeps.
    pub job_history_limit: usize,
    /// Upper bound for one pipeline run.
    pub pipeline_timeout: Duration,
    pub itsm: ItsmConfig,
    pub email: EmailConfig,
    pub reports: ReportsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0:8080".to_string(),
                external_location_address: "http://localhost:8080".to_string(),
                shutdown_timeout: Duration::from_secs(30),
            },
            database_url: None,
            job_history_limit: 10,
            pipeline_timeout: Duration::from_secs(3600),
            itsm: ItsmConfig {
                channel_endpoint: "http://localhost:8081/api/v1/sub-spaces-by-app?appName=itsm"
                    .to_string(),
                user_endpoint: "http://localhost:8081/api/v1/assets/user".to_string(),
                incident_endpoint: "http://localhost:8081/api/v1/assets/incident".to_string(),
                request_endpoint: "http://localhost:8081/api/v1/assets/k_request".to_string(),
                auth_token: None,
                retry: RetryPolicy::default(),
                request_timeout: Duration::from_secs(30),
            },
            email: EmailConfig {
                server_url: "https://api.postmarkapp.com/email/batch".to_string(),
                server_token: None,
                message_stream: "outbound".to_string(),
                from_address: String::new(),
                service_desk_recipients: Vec::new(),
            },
            reports: ReportsConfig {
                output_dir: std::env::temp_dir().join("xls-files"),
            },
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("HTTP_BIND_ADDRESS") {
            cfg.server.bind_address = v;
        }
        if let Some(v) = get("EXTERNAL_LOCATION_ADDRESS") {
            cfg.server.external_location_address = v.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parsed::<u64>(&get, "HTTP_SHUTDOWN_TIMEOUT_SECONDS")? {
            cfg.server.shutdown_timeout = Duration::from_secs(secs);
        }

        cfg.database_url = get("DATABASE_URL").map(SecretString::from);
        if let Some(limit) = parsed::<usize>(&get, "JOB_HISTORY_LIMIT")? {
            if limit == 0 {
                return Err(ConfigError::Invalid {
                    key: "JOB_HISTORY_LIMIT",
                    value: limit.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            cfg.job_history_limit = limit;
        }
        if let Some(secs) = parsed::<u64>(&get, "PIPELINE_TIMEOUT_SECONDS")? {
            cfg.pipeline_timeout = Duration::from_secs(secs);
        }

        if let Some(v) = get("CHANNEL_ENDPOINT_URI") {
            cfg.itsm.channel_endpoint = v;
        }
        if let Some(v) = get("USER_ENDPOINT_URI") {
            cfg.itsm.user_endpoint = v;
        }
        if let Some(v) = get("INCIDENT_ENDPOINT_URI") {
            cfg.itsm.incident_endpoint = v;
        }
        if let Some(v) = get("REQUEST_ENDPOINT_URI") {
            cfg.itsm.request_endpoint = v;
        }
        cfg.itsm.auth_token = get("ASSERTION_TOKEN").map(SecretString::from);
        if let Some(ms) = parsed::<u64>(&get, "RETRY_WAIT_MIN_MS")? {
            cfg.itsm.retry.wait_min = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>(&get, "RETRY_WAIT_MAX_MS")? {
            cfg.itsm.retry.wait_max = Duration::from_millis(ms);
        }
        if let Some(max) = parsed::<u32>(&get, "RETRY_MAX")? {
            cfg.itsm.retry.max_retries = max;
        }
        if let Some(secs) = parsed::<u64>(&get, "REQUEST_TIMEOUT_SECONDS")? {
            cfg.itsm.request_timeout = Duration::from_secs(secs);
        }

        if let Some(v) = get("POSTMARK_SERVER_URL") {
            cfg.email.server_url = v;
        }
        cfg.email.server_token = get("POSTMARK_SERVER_TOKEN").map(SecretString::from);
        if let Some(v) = get("POSTMARK_MESSAGE_STREAM") {
            cfg.email.message_stream = v;
        }
        if let Some(v) = get("EMAIL_FROM_ADDRESS") {
            cfg.email.from_address = v;
        }
        if let Some(v) = get("SERVICE_DESK_EMAILS") {
            cfg.email.service_desk_recipients = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = get("REPORTS_DIR") {
            cfg.reports.output_dir = PathBuf::from(v);
        }

        Ok(cfg)
    }
}

fn parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
