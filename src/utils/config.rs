use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::web::BrowserType;
use crate::error::RecorderError;

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Quiet period after the last DOM change before an action counts as settled (ms)
    pub settle_timeout_ms: u64,

    /// Upper bound on the settlement wait, measured from arming (ms)
    pub hard_cap_ms: u64,

    /// How often the in-page event queue is drained (ms)
    pub poll_interval_ms: u64,

    /// Drop DOM changes on elements that only have class/tag selectors.
    ///
    /// Off by default: such changes are kept and the generated test flags
    /// their selectors as fragile.
    pub only_stable_selectors: bool,

    /// Maximum DOM+CSS changes kept per action
    pub max_changes_per_action: usize,

    /// Maximum elements whose CSS is re-checked at settlement
    pub max_style_targets: usize,

    /// Requests whose URL contains any of these are never reported
    pub ignored_url_patterns: Vec<String>,

    pub headless: bool,
    pub browser: BrowserType,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        let headless = std::env::var("LUMI_HEADLESS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            settle_timeout_ms: 500,
            hard_cap_ms: 5000,
            poll_interval_ms: 50,
            only_stable_selectors: false,
            max_changes_per_action: 10,
            max_style_targets: 20,
            ignored_url_patterns: vec![
                "google-analytics".to_string(),
                "googletagmanager".to_string(),
                "/collect?".to_string(),
                "beacon".to_string(),
                "/tracking".to_string(),
            ],
            headless,
            browser: BrowserType::Chromium,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from an explicit file, the user config directory, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };

        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.settle_timeout_ms == 0 {
            return Err(RecorderError::Config(
                "settleTimeoutMs must be greater than 0".to_string(),
            ));
        }
        if self.hard_cap_ms < self.settle_timeout_ms {
            return Err(RecorderError::Config(format!(
                "hardCapMs ({}) must not be smaller than settleTimeoutMs ({})",
                self.hard_cap_ms, self.settle_timeout_ms
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(RecorderError::Config(
                "pollIntervalMs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn hard_cap(&self) -> Duration {
        Duration::from_millis(self.hard_cap_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `<config dir>/lumi-recorder/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lumi-recorder").join("config.yaml"))
}
