use serde::{Deserialize, Serialize};

use crate::Timeframe;

/// Configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection string, e.g. `sqlite://vigil.db`.
    pub database_url: String,
    /// Optional CryptoCompare API key. The provider works unauthenticated at
    /// a reduced rate limit.
    pub cryptocompare_api_key: Option<String>,
    /// Path to the TOML tunables file.
    pub settings_path: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            database_url: required_env("DATABASE_URL"),
            cryptocompare_api_key: optional_env("CRYPTOCOMPARE_API_KEY"),
            settings_path: optional_env("VIGIL_SETTINGS_PATH")
                .unwrap_or_else(|| "config/vigil.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Tunables loaded from `config/vigil.toml`.
///
/// Example:
/// ```toml
/// symbol = "BTC"
/// timeframe = "1h"
/// expiry_minutes = 60
///
/// [jobs]
/// generation_secs = 30
/// dynamic_secs = 300
/// monitor_secs = 60
/// calibration_secs = 604800
///
/// [filters]
/// min_probability = 70
/// min_risk_reward = 2.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Timeframe scored by the recurring generation job.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Signal lifetime before it expires as a loss.
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: i64,
    /// Suppress a new dynamic signal when one of the same direction was
    /// created within this window.
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_minutes: i64,
    #[serde(default)]
    pub jobs: JobSettings,
    #[serde(default)]
    pub filters: FilterSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSettings {
    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,
    #[serde(default = "default_dynamic_secs")]
    pub dynamic_secs: u64,
    #[serde(default = "default_monitor_secs")]
    pub monitor_secs: u64,
    #[serde(default = "default_calibration_secs")]
    pub calibration_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterSettings {
    /// Minimum probability for a signal to appear in the active listing.
    #[serde(default = "default_min_probability")]
    pub min_probability: u8,
    /// Minimum reward:risk ratio for the active listing.
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            generation_secs: default_generation_secs(),
            dynamic_secs: default_dynamic_secs(),
            monitor_secs: default_monitor_secs(),
            calibration_secs: default_calibration_secs(),
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_probability: default_min_probability(),
            min_risk_reward: default_min_risk_reward(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            expiry_minutes: default_expiry_minutes(),
            duplicate_window_minutes: default_duplicate_window(),
            jobs: JobSettings::default(),
            filters: FilterSettings::default(),
        }
    }
}

impl Settings {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read settings at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse settings at '{path}': {e}"))
    }

    /// The generation timeframe as a typed value. Panics on an invalid
    /// string, which is a startup configuration error.
    pub fn generation_timeframe(&self) -> Timeframe {
        self.timeframe
            .parse()
            .unwrap_or_else(|e| panic!("Invalid timeframe in settings: {e}"))
    }
}

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_expiry_minutes() -> i64 {
    60
}

fn default_duplicate_window() -> i64 {
    15
}

fn default_generation_secs() -> u64 {
    30
}

fn default_dynamic_secs() -> u64 {
    300
}

fn default_monitor_secs() -> u64 {
    60
}

fn default_calibration_secs() -> u64 {
    604_800
}

fn default_min_probability() -> u8 {
    70
}

fn default_min_risk_reward() -> f64 {
    2.0
}
