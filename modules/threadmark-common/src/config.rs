use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::ThreadmarkError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Archive
    pub archive_base_url: String,
    pub archive_list: String,

    // Resolver
    pub workers: usize,
    pub max_concurrent_requests: usize,
    pub requests_per_second: u32,
    pub expand_timeout: Duration,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_base: Duration,

    // Persistence
    pub data_dir: PathBuf,

    // Read API
    pub api_host: String,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive_base_url: "https://www.postgresql.org".to_string(),
            archive_list: "pgsql-hackers".to_string(),
            workers: 8,
            max_concurrent_requests: 4,
            requests_per_second: 4,
            expand_timeout: Duration::from_secs(30),
            fetch_max_attempts: 3,
            fetch_backoff_base: Duration::from_millis(500),
            data_dir: PathBuf::from("data"),
            api_host: "0.0.0.0".to_string(),
            api_port: 3000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ThreadmarkError> {
        let defaults = Self::default();
        Ok(Self {
            archive_base_url: env::var("ARCHIVE_BASE_URL")
                .unwrap_or(defaults.archive_base_url)
                .trim_end_matches('/')
                .to_string(),
            archive_list: env::var("ARCHIVE_LIST").unwrap_or(defaults.archive_list),
            workers: parsed_env("RESOLVER_WORKERS", defaults.workers)?,
            max_concurrent_requests: parsed_env(
                "MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            )?,
            requests_per_second: parsed_env("REQUESTS_PER_SECOND", defaults.requests_per_second)?,
            expand_timeout: Duration::from_secs(parsed_env(
                "EXPAND_TIMEOUT_SECS",
                defaults.expand_timeout.as_secs(),
            )?),
            fetch_max_attempts: parsed_env("FETCH_MAX_ATTEMPTS", defaults.fetch_max_attempts)?,
            fetch_backoff_base: Duration::from_millis(parsed_env(
                "FETCH_BACKOFF_BASE_MS",
                defaults.fetch_backoff_base.as_millis() as u64,
            )?),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            api_host: env::var("API_HOST").unwrap_or(defaults.api_host),
            api_port: parsed_env("API_PORT", defaults.api_port)?,
        }
        .validated()?)
    }

    fn validated(self) -> Result<Self, ThreadmarkError> {
        if self.workers == 0 {
            return Err(ThreadmarkError::Config("RESOLVER_WORKERS must be at least 1".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ThreadmarkError::Config(
                "MAX_CONCURRENT_REQUESTS must be at least 1".into(),
            ));
        }
        if self.requests_per_second == 0 {
            return Err(ThreadmarkError::Config("REQUESTS_PER_SECOND must be at least 1".into()));
        }
        if self.fetch_max_attempts == 0 {
            return Err(ThreadmarkError::Config("FETCH_MAX_ATTEMPTS must be at least 1".into()));
        }
        Ok(self)
    }

    /// Default checkpoint location: `{DATA_DIR}/checkpoints/{list}.json`.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir
            .join("checkpoints")
            .join(format!("{}.json", self.archive_list))
    }

    /// Log the effective configuration.
    pub fn log_redacted(&self) {
        info!(
            archive = self.archive_base_url.as_str(),
            list = self.archive_list.as_str(),
            workers = self.workers,
            max_concurrent_requests = self.max_concurrent_requests,
            requests_per_second = self.requests_per_second,
            expand_timeout_secs = self.expand_timeout.as_secs(),
            fetch_max_attempts = self.fetch_max_attempts,
            fetch_backoff_base_ms = self.fetch_backoff_base.as_millis() as u64,
            data_dir = %self.data_dir.display(),
            "Loaded config"
        );
    }
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, ThreadmarkError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ThreadmarkError::Config(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default().validated().unwrap();
        assert_eq!(config.archive_list, "pgsql-hackers");
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("data/checkpoints/pgsql-hackers.json")
        );
    }

    #[test]
    fn zero_workers_rejected() {
        let config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(matches!(config.validated(), Err(ThreadmarkError::Config(_))));
    }

    #[test]
    fn unparsable_number_is_config_error() {
        // Key is unique to this test so parallel tests don't race on it.
        env::set_var("THREADMARK_TEST_BAD_NUMBER", "eight");
        let result: Result<usize, _> = parsed_env("THREADMARK_TEST_BAD_NUMBER", 8);
        assert!(matches!(result, Err(ThreadmarkError::Config(_))));
        env::remove_var("THREADMARK_TEST_BAD_NUMBER");
    }
}
