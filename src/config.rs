use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diagram::{DiagramConfig, PanZoomOptions};
use crate::engine::{CommandsConfig, EngineOptions};
use crate::error::{Error, Result};
use crate::flash::FlashConfig;
use crate::theme::ThemeConfig;
use crate::tooltip::TooltipConfig;

/// Page-wide settings. Every section and field falls back to its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineOptions,
    pub pan_zoom: PanZoomOptions,
    pub diagram: DiagramConfig,
    pub tooltip: TooltipConfig,
    pub theme: ThemeConfig,
    pub flash: FlashConfig,
    pub commands: CommandsConfig,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {}", e)))
    }

    /// Loads a TOML or YAML file, chosen by extension. Unknown extensions
    /// try TOML first, then YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("toml") => Self::from_toml(&content),
            Some("yaml" | "yml") => Self::from_yaml(&content),
            _ => Self::from_toml(&content).or_else(|_| {
                Self::from_yaml(&content).map_err(|_| {
                    Error::Config("Failed to parse config file as TOML or YAML".to_string())
                })
            }),
        }
    }
}
