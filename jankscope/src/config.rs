use analyzer::{AnalyzeOptions, CapabilitySet, Thresholds, DEFAULT_FPS_TARGET};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_fps_target")]
    pub fps_target: f64,

    /// Capabilities of the adapter that captured the trace. Omitted means all.
    #[serde(default)]
    pub capabilities: Option<CapabilitySet>,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fps_target: default_fps_target(),
            capabilities: None,
            parallel: false,
            thresholds: Thresholds::default(),
        }
    }
}

fn default_fps_target() -> f64 {
    DEFAULT_FPS_TARGET
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn analyze_options(&self) -> AnalyzeOptions {
        AnalyzeOptions {
            fps_target: self.fps_target,
            capabilities: self.capabilities.clone(),
            parallel: self.parallel,
        }
    }
}
