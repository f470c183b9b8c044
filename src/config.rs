use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::extract::vocab::CATEGORY_KEYWORDS;

const DEFAULT_CONFIG_FILE: &str = "harvest.toml";
const ENV_PREFIX: &str = "HARVEST";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub run_log_path: PathBuf,
    pub targets_url: Option<String>,
    pub targets_file: Option<PathBuf>,
    pub session_url: Option<String>,
    pub cooldown_secs: u64,
    pub queue: QueueSettings,
    pub collector: CollectorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output_dir: PathBuf::from("output"),
            run_log_path: PathBuf::from("data/harvest.sqlite"),
            targets_url: None,
            targets_file: None,
            session_url: None,
            cooldown_secs: 30 * 60,
            queue: QueueSettings::default(),
            collector: CollectorSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then the config file (explicit path, or `harvest.toml` if present),
    /// then `HARVEST_*` environment variables (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                builder = builder.add_source(File::from(p).required(true));
            }
            None => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            concurrency: 1,
            max_retries: 2,
            poll_interval_ms: 100,
        }
    }
}

/// Inclusive range a randomized delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min_ms: 0, max_ms: 0 };

    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        DelayRange { min_ms, max_ms }
    }

    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub max_scroll_times: u32,
    /// Consecutive iterations without new records before giving up.
    pub patience: u32,
    pub min_text_len: usize,
    pub navigation_timeout_secs: u64,
    pub extraction_timeout_secs: u64,
    pub post_navigation_delay: DelayRange,
    pub settle_delay: DelayRange,
    pub category_keywords: Vec<String>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            max_scroll_times: 10,
            patience: 2,
            min_text_len: 20,
            navigation_timeout_secs: 60,
            extraction_timeout_secs: 30,
            post_navigation_delay: DelayRange::new(3000, 5000),
            settle_delay: DelayRange::new(2000, 4000),
            category_keywords: CATEGORY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl CollectorSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_sources() {
        let settings: Settings = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.queue.concurrency, 1);
        assert_eq!(settings.queue.max_retries, 2);
        assert_eq!(settings.collector.patience, 2);
        assert_eq!(settings.collector.min_text_len, 20);
        assert!(!settings.collector.category_keywords.is_empty());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(
            &path,
            "output_dir = \"results\"\n[queue]\nconcurrency = 3\n[collector]\nmax_scroll_times = 4\n",
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("results"));
        assert_eq!(settings.queue.concurrency, 3);
        assert_eq!(settings.queue.max_retries, 2);
        assert_eq!(settings.collector.max_scroll_times, 4);
        assert_eq!(settings.collector.patience, 2);
    }

    #[test]
    fn env_overrides_nested_keys() {
        std::env::set_var("HARVEST_COLLECTOR__MIN_TEXT_LEN", "35");
        let settings = Settings::load(None);
        std::env::remove_var("HARVEST_COLLECTOR__MIN_TEXT_LEN");

        let settings = settings.unwrap();
        assert_eq!(settings.collector.min_text_len, 35);
        assert_eq!(settings.collector.patience, 2);
    }

    #[test]
    fn delay_range_sampling() {
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
        let d = DelayRange::new(10, 20).sample();
        assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
    }
}
