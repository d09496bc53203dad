use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::HistoryLimits;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = crate::paths::OPRIME_DIR;

fn default_instructions_dir() -> String {
    "dev_instructions".to_string()
}

fn default_logs_dir() -> String {
    "dev_logs".to_string()
}

fn default_app_data_dir() -> String {
    "app_data".to_string()
}

fn default_advisory_program() -> String {
    "claude".to_string()
}

fn default_advisory_args() -> Vec<String> {
    vec![
        "-p".to_string(),
        "--output-format".to_string(),
        "text".to_string(),
    ]
}

fn default_advisory_timeout_secs() -> u64 {
    120
}

fn default_result_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_millis() -> u64 {
    200
}

fn default_debounce_millis() -> u64 {
    500
}

fn default_max_history_turns() -> usize {
    20
}

fn default_max_context_tokens() -> usize {
    100_000
}

fn default_summarization_interval() -> u32 {
    10
}

/// File-channel and app-data locations, relative to the project workspace
/// root (instructions/logs) or the working directory (app data).
#[derive(Debug, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_instructions_dir")]
    pub instructions_dir: String,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    #[serde(default = "default_app_data_dir")]
    pub app_data_dir: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            instructions_dir: default_instructions_dir(),
            logs_dir: default_logs_dir(),
            app_data_dir: default_app_data_dir(),
        }
    }
}

/// How to invoke the advisory backend.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorySettings {
    #[serde(default = "default_advisory_program")]
    pub program: String,
    #[serde(default = "default_advisory_args")]
    pub args: Vec<String>,
    #[serde(default = "default_advisory_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AdvisorySettings {
    fn default() -> Self {
        Self {
            program: default_advisory_program(),
            args: default_advisory_args(),
            timeout_secs: default_advisory_timeout_secs(),
        }
    }
}

/// Session loop timing and history thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_result_timeout_secs")]
    pub result_timeout_secs: u64,
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    #[serde(default = "default_debounce_millis")]
    pub debounce_millis: u64,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_summarization_interval")]
    pub summarization_interval: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            result_timeout_secs: default_result_timeout_secs(),
            poll_interval_millis: default_poll_interval_millis(),
            debounce_millis: default_debounce_millis(),
            max_history_turns: default_max_history_turns(),
            max_context_tokens: default_max_context_tokens(),
            summarization_interval: default_summarization_interval(),
        }
    }
}

impl SessionSettings {
    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_history_turns: self.max_history_turns,
            max_context_tokens: self.max_context_tokens,
            summarization_interval: self.summarization_interval,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub advisory: AdvisorySettings,
    #[serde(default)]
    pub session: SessionSettings,
}

impl AppConfig {
    /// Search upward from `start` for a `.oprime/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((AppConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
