use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub webdriver_url: String,
    pub browser_headless: bool,
    pub profile_path: PathBuf,
    pub cv_path: Option<PathBuf>,
    pub cover_letter_path: Option<PathBuf>,
    /// Root for pending questions, snapshots, and result artifacts.
    pub data_dir: PathBuf,
    pub answer_poll_interval: Duration,
    /// `None` waits for answers indefinitely.
    pub answer_timeout: Option<Duration>,
    pub navigation_timeout: Duration,
    /// How long finished runs stay visible through the status API.
    pub run_retention: Duration,
    pub search_top_k: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let poll_secs: u64 = parse_env("ANSWER_POLL_INTERVAL_SECS", 10)?;
        if poll_secs == 0 {
            bail!("ANSWER_POLL_INTERVAL_SECS must be at least 1");
        }

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_string()),
            browser_headless: parse_bool_env("BROWSER_HEADLESS", true)?,
            profile_path: PathBuf::from(require_env("PROFILE_PATH")?),
            cv_path: optional_env("CV_PATH").map(PathBuf::from),
            cover_letter_path: optional_env("COVER_LETTER_PATH").map(PathBuf::from),
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ),
            answer_poll_interval: Duration::from_secs(poll_secs),
            answer_timeout: optional_env("ANSWER_TIMEOUT_SECS")
                .map(|raw| {
                    raw.parse::<u64>()
                        .context("ANSWER_TIMEOUT_SECS must be a whole number of seconds")
                })
                .transpose()?
                .map(Duration::from_secs),
            navigation_timeout: Duration::from_secs(parse_env("NAVIGATION_TIMEOUT_SECS", 45)?),
            run_retention: Duration::from_secs(parse_env("RUN_RETENTION_SECS", 86_400)?),
            search_top_k: parse_env("SEARCH_TOP_K", 6)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.data_dir.join("pending")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool> {
    match optional_env(key) {
        Some(raw) => parse_bool(&raw).with_context(|| format!("{key} must be true or false")),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
