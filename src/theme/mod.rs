mod bridge;
mod store;
mod toggle;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use bridge::{Subscription, ThemeBridge, WeakThemeBridge};
pub use store::{FileStore, MemoryStore, PreferenceStore};
pub use toggle::ThemeToggleHook;

const LIGHT: &str = "light";
const DARK: &str = "dark";

const DEFAULT_STORAGE_KEY: &str = "atlas-theme";
const DEFAULT_DARK_CLASS: &str = "dark";
const DEFAULT_CHANGE_EVENT: &str = "set-theme";

/// Color theme applied to the page root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn from_dark(dark: bool) -> Self {
        if dark { Theme::Dark } else { Theme::Light }
    }

    pub fn is_dark(self) -> bool {
        self == Theme::Dark
    }

    pub fn toggled(self) -> Self {
        Self::from_dark(!self.is_dark())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => LIGHT,
            Theme::Dark => DARK,
        }
    }

    /// Theme name understood by mermaid-style engines.
    pub fn engine_theme(self) -> &'static str {
        match self {
            Theme::Light => "default",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            LIGHT => Ok(Theme::Light),
            DARK => Ok(Theme::Dark),
            other => Err(format!("Unknown theme '{}'. Available: {}, {}", other, LIGHT, DARK)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeConfig {
    /// Preference store key holding `light` or `dark`.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Class toggled on the root element while the dark theme is applied.
    #[serde(default = "default_dark_class")]
    pub dark_class: String,
    /// Outbound event name used to report theme changes.
    #[serde(default = "default_change_event")]
    pub change_event: String,
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}
fn default_dark_class() -> String {
    DEFAULT_DARK_CLASS.to_string()
}
fn default_change_event() -> String {
    DEFAULT_CHANGE_EVENT.to_string()
}

impl Default for ThemeConfig {
    fn default() -> Self {
        ThemeConfig {
            storage_key: default_storage_key(),
            dark_class: default_dark_class(),
            change_event: default_change_event(),
        }
    }
}
