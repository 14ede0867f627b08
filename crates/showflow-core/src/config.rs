//! Engine configuration
//!
//! Stored as JSON, by default under the platform config directory
//! (`<config>/ShowFlow/config.json`). Missing fields take their defaults.

use crate::arbitration::{DrawSource, RandomDraw};
use crate::error::Result;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Action dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Pending events above which the dispatcher warns about a backlog
    pub backlog_warning: usize,
    /// Callbacks running longer than this are reported as slow
    pub slow_callback_ms: u64,
    /// Callbacks still running after this are abandoned and counted as failed
    pub callback_timeout_ms: u64,
    /// MIDI output port name (substring match); none logs messages only
    pub midi_port: Option<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            backlog_warning: 256,
            slow_callback_ms: 50,
            callback_timeout_ms: 1000,
            midi_port: None,
        }
    }
}

impl DispatcherSettings {
    pub fn slow_callback(&self) -> Duration {
        Duration::from_millis(self.slow_callback_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms.max(1))
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed seed for reproducible arbitration
    pub random_seed: Option<u64>,
    pub dispatcher: DispatcherSettings,
    pub log: LogConfig,
}

impl EngineConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("ShowFlow");
            p.push("config.json");
            p
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Load from the default path, or defaults when there is no file
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Draw source for arbitration: seeded when a seed is configured
    pub fn draw_source(&self) -> Box<dyn DrawSource> {
        match self.random_seed {
            Some(seed) => Box::new(RandomDraw::seeded(seed)),
            None => Box::new(RandomDraw::new()),
        }
    }
}
