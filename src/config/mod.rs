//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Only the worker needs it; see [`Config::require_anthropic_key`].
    pub anthropic_api_key: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Root the file storage collaborator resolves `content_ref` against.
    pub upload_dir: PathBuf,
    pub analysis_model: String,
    pub worker: WorkerConfig,
}

/// Tunables for the claimer and worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between claim attempts when nothing is pending.
    pub poll_interval: Duration,
    /// Bound on a single analysis call. Elapsing is a transient failure.
    pub analysis_timeout: Duration,
    /// Claims per document before a transient failure becomes terminal.
    pub max_attempts: u32,
    /// How long a claim stays valid (`max_processing_duration`).
    pub claim_ttl: Duration,
    /// Re-queue documents whose claim expired, if attempts remain.
    pub requeue_expired: bool,
    /// Pending documents fetched per selection pass.
    pub claim_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            analysis_timeout: Duration::from_secs(120),
            max_attempts: 3,
            claim_ttl: Duration::from_secs(600),
            requeue_expired: true,
            claim_batch: 8,
        }
    }
}

impl WorkerConfig {
    /// Load from `ANALYSIS_*` variables, defaulting anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            poll_interval: Duration::from_millis(parsed_var(
                "ANALYSIS_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            analysis_timeout: Duration::from_secs(parsed_var(
                "ANALYSIS_TIMEOUT_SECS",
                defaults.analysis_timeout.as_secs(),
            )?),
            max_attempts: parsed_var("ANALYSIS_MAX_ATTEMPTS", defaults.max_attempts)?,
            claim_ttl: Duration::from_secs(parsed_var(
                "ANALYSIS_CLAIM_TTL_SECS",
                defaults.claim_ttl.as_secs(),
            )?),
            requeue_expired: parsed_var("ANALYSIS_REQUEUE_EXPIRED", defaults.requeue_expired)?,
            claim_batch: parsed_var("ANALYSIS_CLAIM_BATCH", defaults.claim_batch)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("ANALYSIS_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if self.claim_batch == 0 {
            return Err(Error::Config("ANALYSIS_CLAIM_BATCH must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config(
                "ANALYSIS_POLL_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }
        // A claim that can expire mid-call would hand the document to a second worker.
        if self.claim_ttl <= self.analysis_timeout {
            return Err(Error::Config(format!(
                "claim ttl ({:?}) must exceed the analysis timeout ({:?})",
                self.claim_ttl, self.analysis_timeout
            )));
        }
        Ok(())
    }

    /// `claim_ttl` as a chrono duration for deadline arithmetic.
    pub fn claim_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.claim_ttl).unwrap_or(chrono::Duration::MAX)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok().map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            analysis_model: std::env::var("ANALYSIS_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            worker: WorkerConfig::from_env()?,
        })
    }

    pub fn require_anthropic_key(&self) -> Result<&SecretString> {
        self.anthropic_api_key.as_ref().ok_or_else(|| {
            Error::Config("required environment variable ANTHROPIC_API_KEY is not set".to_string())
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}
