use std::fmt;
use std::str::FromStr;

use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::error::{Error, Result};

/// Attribute naming the hook an element is mounted with.
pub const HOOK_ATTRIBUTE: &str = "data-hook";

pub type HookFuture = LocalBoxFuture<'static, Result<()>>;

/// Host lifecycle contract.
///
/// The host calls `on_mount` before any `on_update`; `on_destroy` is terminal.
pub trait LifecycleHook {
    fn on_mount(&mut self) -> HookFuture;
    fn on_update(&mut self) -> HookFuture;
    fn on_destroy(&mut self);
}

/// An already-settled hook future.
pub fn ready(result: Result<()>) -> HookFuture {
    future::ready(result).boxed_local()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Diagram rendered with the mermaid grammar.
    Mermaid,
    /// Diagram rendered with graphviz.
    Viz,
    Tooltip,
    ThemeToggle,
    Flash,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::Mermaid => "Mermaid",
            HookKind::Viz => "Viz",
            HookKind::Tooltip => "Tooltip",
            HookKind::ThemeToggle => "ThemeToggle",
            HookKind::Flash => "Flash",
        }
    }

    pub fn is_diagram(self) -> bool {
        matches!(self, HookKind::Mermaid | HookKind::Viz)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Mermaid" => Ok(HookKind::Mermaid),
            "Viz" | "Graphviz" => Ok(HookKind::Viz),
            "Tooltip" => Ok(HookKind::Tooltip),
            "ThemeToggle" => Ok(HookKind::ThemeToggle),
            "Flash" => Ok(HookKind::Flash),
            other => Err(Error::UnknownHook(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hook_names() {
        assert_eq!("Viz".parse::<HookKind>().unwrap(), HookKind::Viz);
        assert_eq!(" Mermaid ".parse::<HookKind>().unwrap(), HookKind::Mermaid);
        assert!(HookKind::Viz.is_diagram());
        assert!(!HookKind::Flash.is_diagram());
        assert!(matches!(
            "Carousel".parse::<HookKind>(),
            Err(Error::UnknownHook(name)) if name == "Carousel"
        ));
    }
}
