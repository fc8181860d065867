// =============================================================================
// Engine Configuration — JSON settings with atomic save and env overrides
// =============================================================================
//
// Which provider and symbols to load, the source interval stored in the
// database, the interval to resample to, and how the binary behaves at
// startup.
//
// Persistence uses an atomic tmp + rename pattern.  All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an
// older config file.
//
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Interval;

pub const SYMBOLS_ENV: &str = "CANDLE_ENGINE_SYMBOLS";
pub const LIVE_ENV: &str = "CANDLE_ENGINE_LIVE";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_provider() -> String {
    "binance_futures".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_source_interval() -> Interval {
    Interval::OneMinute
}

fn default_window() -> usize {
    100
}

fn default_database_path() -> PathBuf {
    PathBuf::from("candles.db")
}

// =============================================================================
// EngineConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Provider name the candles are stored under.
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Interval of the stored candles.
    #[serde(default = "default_source_interval")]
    pub source_interval: Interval,

    /// Interval to resample to; `None` serves the stored candles as-is.
    #[serde(default)]
    pub target_interval: Option<Interval>,

    /// Bound on buckets kept per symbol.
    #[serde(default)]
    pub max_history: Option<usize>,

    /// Width of the window summarised at startup.
    #[serde(default = "default_window")]
    pub window: usize,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Kline dump imported into the database at startup.
    #[serde(default)]
    pub kline_dump: Option<PathBuf>,

    /// Aggregate the live trade feed after the initial load.
    #[serde(default)]
    pub live: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            symbols: default_symbols(),
            source_interval: default_source_interval(),
            target_interval: None,
            max_history: None,
            window: default_window(),
            database_path: default_database_path(),
            kline_dump: None,
            live: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            provider = %config.provider,
            symbols = ?config.symbols,
            source_interval = %config.source_interval,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Apply `CANDLE_ENGINE_SYMBOLS` / `CANDLE_ENGINE_LIVE` from the process
    /// environment.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(
            std::env::var(SYMBOLS_ENV).ok().as_deref(),
            std::env::var(LIVE_ENV).ok().as_deref(),
        );
        self
    }

    fn apply_overrides(&mut self, symbols: Option<&str>, live: Option<&str>) {
        if let Some(list) = symbols {
            let parsed: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                info!(symbols = ?parsed, "symbols overridden from environment");
                self.symbols = parsed;
            }
        }
        if let Some(flag) = live {
            self.live = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true");
        }
    }

    /// Target period in seconds, if resampling is configured.
    pub fn target_period(&self) -> Option<i64> {
        self.target_interval.map(Interval::seconds)
    }
}
