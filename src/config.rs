use std::{env, num::NonZeroUsize, path::Path, path::PathBuf, time::Duration};

use thiserror::Error;

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    generation_base_url: String,
    generation_timeout: Duration,
    generation_api_key: Option<String>,
    storage_dir: PathBuf,
    activity_log_capacity: NonZeroUsize,
    structuring_min_score: f64,
    batch_concurrency: NonZeroUsize,
    import_path: Option<PathBuf>,
    http_max_retries: usize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数からバッチ実行の設定値を読み込み、検証する。
    ///
    /// # Errors
    /// `PICTO_GENERATION_BASE_URL` が未設定、もしくは各種値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let generation_base_url = env_var("PICTO_GENERATION_BASE_URL")?;
        let generation_timeout = parse_duration_secs("PICTO_GENERATION_TIMEOUT_SECS", 120)?;
        let generation_api_key = env::var("PICTO_GENERATION_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let storage_dir = PathBuf::from(
            env::var("PICTO_STORAGE_DIR").unwrap_or_else(|_| ".picto-studio".to_string()),
        );
        let activity_log_capacity = parse_non_zero_usize("PICTO_ACTIVITY_LOG_CAPACITY", 500)?;
        let structuring_min_score = parse_score("PICTO_STRUCTURING_MIN_SCORE", 4.0)?;
        let batch_concurrency = parse_non_zero_usize("PICTO_BATCH_CONCURRENCY", 4)?;
        let import_path = env::var("PICTO_IMPORT_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        // Retry settings (exponential backoff + jitter)
        let http_max_retries = parse_usize("HTTP_MAX_RETRIES", 3)?;
        let http_backoff_base_ms = parse_u64("HTTP_BACKOFF_BASE_MS", 250)?;
        let http_backoff_cap_ms = parse_u64("HTTP_BACKOFF_CAP_MS", 10000)?;

        Ok(Self {
            generation_base_url,
            generation_timeout,
            generation_api_key,
            storage_dir,
            activity_log_capacity,
            structuring_min_score,
            batch_concurrency,
            import_path,
            http_max_retries,
            http_backoff_base_ms,
            http_backoff_cap_ms,
        })
    }

    #[must_use]
    pub fn generation_base_url(&self) -> &str {
        &self.generation_base_url
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        self.generation_timeout
    }

    #[must_use]
    pub fn generation_api_key(&self) -> Option<&str> {
        self.generation_api_key.as_deref()
    }

    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    #[must_use]
    pub fn activity_log_capacity(&self) -> usize {
        self.activity_log_capacity.get()
    }

    #[must_use]
    pub fn structuring_min_score(&self) -> f64 {
        self.structuring_min_score
    }

    #[must_use]
    pub fn batch_concurrency(&self) -> usize {
        self.batch_concurrency.get()
    }

    #[must_use]
    pub fn import_path(&self) -> Option<&Path> {
        self.import_path.as_deref()
    }

    #[must_use]
    pub fn http_max_retries(&self) -> usize {
        self.http_max_retries
    }

    #[must_use]
    pub fn http_backoff_base_ms(&self) -> u64 {
        self.http_backoff_base_ms
    }

    #[must_use]
    pub fn http_backoff_cap_ms(&self) -> u64 {
        self.http_backoff_cap_ms
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

/// Likert 平均と比較するため 1.0〜5.0 の範囲に限定する。
fn parse_score(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(1.0..=5.0).contains(&parsed) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be between 1 and 5"),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests hold ENV_MUTEX and assign valid UTF-8 values.
        unsafe {
            env::set_var(name, value);
        }
    }

    fn remove_env(name: &str) {
        // SAFETY: tests hold ENV_MUTEX and clean up deterministic keys.
        unsafe {
            env::remove_var(name);
        }
    }

    fn reset_env() {
        for name in [
            "PICTO_GENERATION_BASE_URL",
            "PICTO_GENERATION_TIMEOUT_SECS",
            "PICTO_GENERATION_API_KEY",
            "PICTO_STORAGE_DIR",
            "PICTO_ACTIVITY_LOG_CAPACITY",
            "PICTO_STRUCTURING_MIN_SCORE",
            "PICTO_BATCH_CONCURRENCY",
            "PICTO_IMPORT_PATH",
            "HTTP_MAX_RETRIES",
            "HTTP_BACKOFF_BASE_MS",
            "HTTP_BACKOFF_CAP_MS",
        ] {
            remove_env(name);
        }
    }

    #[test]
    fn from_env_uses_defaults_when_optional_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("PICTO_GENERATION_BASE_URL", "http://localhost:8700/");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.generation_base_url(), "http://localhost:8700/");
        assert_eq!(config.generation_timeout(), Duration::from_secs(120));
        assert!(config.generation_api_key().is_none());
        assert_eq!(config.storage_dir(), Path::new(".picto-studio"));
        assert_eq!(config.activity_log_capacity(), 500);
        assert!((config.structuring_min_score() - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.batch_concurrency(), 4);
        assert!(config.import_path().is_none());
        assert_eq!(config.http_max_retries(), 3);
        assert_eq!(config.http_backoff_base_ms(), 250);
        assert_eq!(config.http_backoff_cap_ms(), 10000);
    }

    #[test]
    fn from_env_overrides_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("PICTO_GENERATION_BASE_URL", "https://gen.example.com/");
        set_env("PICTO_GENERATION_TIMEOUT_SECS", "30");
        set_env("PICTO_GENERATION_API_KEY", "secret");
        set_env("PICTO_STORAGE_DIR", "/var/lib/picto");
        set_env("PICTO_ACTIVITY_LOG_CAPACITY", "50");
        set_env("PICTO_STRUCTURING_MIN_SCORE", "3.5");
        set_env("PICTO_BATCH_CONCURRENCY", "2");
        set_env("PICTO_IMPORT_PATH", "phrases.txt");
        set_env("HTTP_MAX_RETRIES", "5");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.generation_timeout(), Duration::from_secs(30));
        assert_eq!(config.generation_api_key(), Some("secret"));
        assert_eq!(config.storage_dir(), Path::new("/var/lib/picto"));
        assert_eq!(config.activity_log_capacity(), 50);
        assert!((config.structuring_min_score() - 3.5).abs() < f64::EPSILON);
        assert_eq!(config.batch_concurrency(), 2);
        assert_eq!(config.import_path(), Some(Path::new("phrases.txt")));
        assert_eq!(config.http_max_retries(), 5);
        reset_env();
    }

    #[test]
    fn from_env_errors_when_base_url_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();

        let error = Config::from_env().expect_err("base url is required");
        assert!(matches!(
            error,
            ConfigError::Missing("PICTO_GENERATION_BASE_URL")
        ));
    }

    #[test]
    fn from_env_rejects_out_of_range_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("PICTO_GENERATION_BASE_URL", "http://localhost:8700/");
        set_env("PICTO_STRUCTURING_MIN_SCORE", "7");
        let error = Config::from_env().expect_err("score out of range");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "PICTO_STRUCTURING_MIN_SCORE",
                ..
            }
        ));

        set_env("PICTO_STRUCTURING_MIN_SCORE", "4");
        set_env("PICTO_BATCH_CONCURRENCY", "0");
        let error = Config::from_env().expect_err("zero concurrency");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "PICTO_BATCH_CONCURRENCY",
                ..
            }
        ));
        reset_env();
    }
}
