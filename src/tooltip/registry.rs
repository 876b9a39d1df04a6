use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::TooltipMode;
use crate::dom::NodeId;

/// A registered tooltip surface.
///
/// The registry maps ids to surfaces; it never owns the surface node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEntry {
    pub id: String,
    pub surface: NodeId,
    pub mode: TooltipMode,
}

/// Shared id → surface map. Clones refer to the same map.
///
/// Ids are expected to be unique among mounted surfaces. A duplicate
/// registration replaces the earlier one and is logged.
#[derive(Debug, Clone, Default)]
pub struct TooltipRegistry {
    entries: Arc<RwLock<HashMap<String, TriggerEntry>>>,
}

impl TooltipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites; returns the entry that was replaced.
    pub fn register(&self, entry: TriggerEntry) -> Option<TriggerEntry> {
        let surface = entry.surface;
        let previous = self.entries.write().insert(entry.id.clone(), entry);
        if let Some(previous) = previous.as_ref().filter(|p| p.surface != surface) {
            warn!(id = %previous.id, "tooltip id registered twice, last registration wins");
        }
        previous
    }

    pub fn unregister(&self, id: &str) -> Option<TriggerEntry> {
        self.entries.write().remove(id)
    }

    /// Removes `id` only while it still maps to `surface`, so unmounting a
    /// shadowed duplicate leaves the newer registration alone.
    pub fn release(&self, id: &str, surface: NodeId) -> bool {
        let mut entries = self.entries.write();
        if entries.get(id).is_some_and(|entry| entry.surface == surface) {
            entries.remove(id);
            return true;
        }
        false
    }

    pub fn lookup(&self, id: &str) -> Option<TriggerEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
