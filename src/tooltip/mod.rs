//! Hover tooltips.
//!
//! Tooltip surfaces register under their element id; triggers anywhere in the
//! page name a surface through [`TRIGGER_ATTRIBUTE`]. One [`HoverDispatcher`]
//! per page serves every trigger.

mod dispatcher;
mod registry;

use std::cell::RefCell;
use std::rc::Weak;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::error::{Error, Result};
use crate::hook::{HookFuture, LifecycleHook, ready};

pub use dispatcher::HoverDispatcher;
pub use registry::{TooltipRegistry, TriggerEntry};

/// Carried by a trigger; the value is the id of its tooltip surface.
pub const TRIGGER_ATTRIBUTE: &str = "data-tooltip";
/// Optional per-surface override of [`TooltipConfig::default_mode`].
pub const MODE_ATTRIBUTE: &str = "data-tooltip-mode";
/// Present on a surface while it is hidden.
pub const HIDDEN_CLASS: &str = "hidden";

/// How a revealed tooltip is positioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TooltipMode {
    /// Placed relative to its trigger through a named anchor.
    #[default]
    #[serde(rename = "anchored")]
    Anchored,
    /// Placed relative to a shared element that tracks the pointer.
    #[serde(rename = "cursor")]
    CursorFollow,
}

impl TooltipMode {
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value.trim() {
            "anchored" | "anchor" => Some(TooltipMode::Anchored),
            "cursor" | "follow" => Some(TooltipMode::CursorFollow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TooltipConfig {
    #[serde(default)]
    pub default_mode: TooltipMode,
    /// Id of the shared pointer-tracking element.
    #[serde(default = "default_cursor_id")]
    pub cursor_id: String,
}

fn default_cursor_id() -> String {
    "tooltip-cursor".to_string()
}

impl Default for TooltipConfig {
    fn default() -> Self {
        TooltipConfig {
            default_mode: TooltipMode::default(),
            cursor_id: default_cursor_id(),
        }
    }
}

/// Shows `surface`. Returns `false` if it was already shown.
pub fn reveal(doc: &mut Document, surface: NodeId) -> bool {
    doc.remove_class(surface, HIDDEN_CLASS)
}

/// Hides `surface`. Returns `false` if it was already hidden.
pub fn conceal(doc: &mut Document, surface: NodeId) -> bool {
    doc.add_class(surface, HIDDEN_CLASS)
}

/// Mounted on a tooltip surface; keeps its registry entry in step with the
/// element's id.
pub struct TooltipHook {
    element: NodeId,
    doc: Weak<RefCell<Document>>,
    registry: TooltipRegistry,
    dispatcher: HoverDispatcher,
    default_mode: TooltipMode,
    registered: Option<String>,
}

impl TooltipHook {
    pub fn new(
        element: NodeId,
        doc: Weak<RefCell<Document>>,
        registry: TooltipRegistry,
        dispatcher: HoverDispatcher,
        default_mode: TooltipMode,
    ) -> Self {
        Self {
            element,
            doc,
            registry,
            dispatcher,
            default_mode,
            registered: None,
        }
    }

    fn read_entry(&self) -> Result<TriggerEntry> {
        let doc = self.doc.upgrade().ok_or(Error::DocumentDropped)?;
        let doc = doc.borrow();
        let id = doc
            .attribute(self.element, "id")
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingTooltipId)?;
        let mode = doc
            .attribute(self.element, MODE_ATTRIBUTE)
            .and_then(TooltipMode::from_attribute)
            .unwrap_or(self.default_mode);
        Ok(TriggerEntry {
            id: id.to_string(),
            surface: self.element,
            mode,
        })
    }

    fn register(&mut self) -> Result<()> {
        let entry = self.read_entry()?;
        if let Some(previous) = self.registered.take()
            && previous != entry.id
        {
            self.registry.release(&previous, self.element);
        }
        debug!(id = %entry.id, mode = ?entry.mode, "tooltip registered");
        self.registered = Some(entry.id.clone());
        self.registry.register(entry);
        Ok(())
    }
}

impl LifecycleHook for TooltipHook {
    fn on_mount(&mut self) -> HookFuture {
        let result = self
            .register()
            .and_then(|()| self.dispatcher.ensure_installed().map(|_| ()));
        ready(result)
    }

    fn on_update(&mut self) -> HookFuture {
        ready(self.register())
    }

    fn on_destroy(&mut self) {
        if let Some(id) = self.registered.take() {
            self.registry.release(&id, self.element);
        }
    }
}
