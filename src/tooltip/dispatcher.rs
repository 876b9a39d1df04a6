use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::{TRIGGER_ATTRIBUTE, TooltipConfig, TooltipMode, TooltipRegistry, TriggerEntry};
use super::{conceal, reveal};
use crate::dom::{
    Document, DomEvent, EventKind, EventTarget, ListenerOptions, NodeId, SharedDocument,
};
use crate::error::{Error, Result};

struct DispatcherInner {
    doc: Weak<RefCell<Document>>,
    registry: TooltipRegistry,
    cursor_id: String,
    installed: Cell<bool>,
    cursor: Cell<Option<NodeId>>,
    /// Triggers with a pending one-shot leave listener.
    armed: RefCell<HashSet<NodeId>>,
}

/// Document-level hover listeners shared by every tooltip on a page.
///
/// Cloning yields another handle to the same dispatcher.
#[derive(Clone)]
pub struct HoverDispatcher {
    inner: Rc<DispatcherInner>,
}

impl HoverDispatcher {
    pub fn new(doc: &SharedDocument, registry: TooltipRegistry, config: &TooltipConfig) -> Self {
        Self {
            inner: Rc::new(DispatcherInner {
                doc: Rc::downgrade(doc),
                registry,
                cursor_id: config.cursor_id.clone(),
                installed: Cell::new(false),
                cursor: Cell::new(None),
                armed: RefCell::new(HashSet::new()),
            }),
        }
    }

    pub fn registry(&self) -> &TooltipRegistry {
        &self.inner.registry
    }

    pub fn is_installed(&self) -> bool {
        self.inner.installed.get()
    }

    /// The shared pointer-tracking element, once installed.
    pub fn cursor_element(&self) -> Option<NodeId> {
        self.inner.cursor.get()
    }

    /// Installs the listeners on first call. Later calls do nothing and
    /// return `Ok(false)`.
    pub fn ensure_installed(&self) -> Result<bool> {
        if self.inner.installed.get() {
            return Ok(false);
        }
        let doc = self.inner.doc.upgrade().ok_or(Error::DocumentDropped)?;
        let mut doc = doc.borrow_mut();

        let cursor = doc.create_element("div");
        doc.set_attribute(cursor, "id", self.inner.cursor_id.as_str());
        doc.set_style_property(cursor, "position", "fixed");
        doc.set_style_property(cursor, "pointer-events", "none");
        doc.set_style_property(cursor, "anchor-name", format!("--{}", self.inner.cursor_id));
        let body = doc.body();
        doc.prepend_child(body, cursor)?;
        self.inner.cursor.set(Some(cursor));

        let root = EventTarget::Node(doc.root());
        let watch = ListenerOptions::capture().passive();

        let weak = Rc::downgrade(&self.inner);
        doc.add_listener(root, EventKind::PointerEnter, watch, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.enter(event);
            }
        });
        let weak = Rc::downgrade(&self.inner);
        doc.add_listener(root, EventKind::PointerLeave, watch, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.leave(event);
            }
        });
        let weak = Rc::downgrade(&self.inner);
        doc.add_listener(
            root,
            EventKind::PointerMove,
            ListenerOptions::default().passive(),
            move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.track(event);
                }
            },
        );

        self.inner.installed.set(true);
        debug!("hover dispatcher installed");
        Ok(true)
    }
}

impl DispatcherInner {
    /// Nearest inclusive trigger of the event target and its live entry.
    fn resolve(&self, doc: &Document, event: &DomEvent) -> Option<(NodeId, TriggerEntry)> {
        let target = event.target_node()?;
        let trigger = doc.closest(target, TRIGGER_ATTRIBUTE)?;
        let id = doc.attribute(trigger, TRIGGER_ATTRIBUTE)?;
        let entry = self.registry.lookup(id)?;
        if !doc.is_connected(entry.surface) {
            trace!(id, "tooltip surface is detached");
            return None;
        }
        Some((trigger, entry))
    }

    fn enter(self: &Rc<Self>, event: &mut DomEvent) {
        let Some(doc) = self.doc.upgrade() else {
            return;
        };
        let mut d = doc.borrow_mut();
        let Some((trigger, entry)) = self.resolve(&d, event) else {
            return;
        };
        reveal(&mut d, entry.surface);

        match entry.mode {
            TooltipMode::Anchored => {
                let anchor = format!("--{}", entry.id);
                d.set_style_property(trigger, "anchor-name", anchor.as_str());
                d.set_style_property(entry.surface, "position-anchor", anchor);
            }
            TooltipMode::CursorFollow => {
                d.set_style_property(
                    entry.surface,
                    "position-anchor",
                    format!("--{}", self.cursor_id),
                );
                if self.armed.borrow_mut().insert(trigger) {
                    let weak = Rc::downgrade(self);
                    let surface = entry.surface;
                    d.add_listener(
                        EventTarget::Node(trigger),
                        EventKind::PointerLeave,
                        ListenerOptions::default().once().passive(),
                        move |_| {
                            if let Some(inner) = weak.upgrade() {
                                inner.disarm(trigger, surface);
                            }
                        },
                    );
                }
            }
        }
    }

    fn leave(&self, event: &mut DomEvent) {
        let Some(doc) = self.doc.upgrade() else {
            return;
        };
        let mut d = doc.borrow_mut();
        let Some((trigger, entry)) = self.resolve(&d, event) else {
            return;
        };
        // Leaving a descendant keeps the pointer inside the trigger.
        if event.target_node() != Some(trigger) || entry.mode != TooltipMode::Anchored {
            return;
        }
        conceal(&mut d, entry.surface);
    }

    fn disarm(&self, trigger: NodeId, surface: NodeId) {
        self.armed.borrow_mut().remove(&trigger);
        if let Some(doc) = self.doc.upgrade() {
            conceal(&mut doc.borrow_mut(), surface);
        }
    }

    fn track(&self, event: &mut DomEvent) {
        let (Some(cursor), Some(doc)) = (self.cursor.get(), self.doc.upgrade()) else {
            return;
        };
        let mut d = doc.borrow_mut();
        d.set_style_property(cursor, "top", format!("{}px", event.client_y));
        d.set_style_property(cursor, "left", format!("{}px", event.client_x));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::PointerTracker;

    struct Page {
        doc: SharedDocument,
        registry: TooltipRegistry,
        dispatcher: HoverDispatcher,
    }

    impl Page {
        fn new() -> Self {
            let doc = Document::new().into_shared();
            let registry = TooltipRegistry::new();
            let dispatcher = HoverDispatcher::new(&doc, registry.clone(), &TooltipConfig::default());
            dispatcher.ensure_installed().unwrap();
            Self {
                doc,
                registry,
                dispatcher,
            }
        }

        fn element(&self, parent: Option<NodeId>, attrs: &[(&str, &str)]) -> NodeId {
            let mut d = self.doc.borrow_mut();
            let el = d.create_element("div");
            for (k, v) in attrs {
                d.set_attribute(el, k, *v);
            }
            let parent = parent.unwrap_or_else(|| d.body());
            d.append_child(parent, el).unwrap();
            el
        }

        fn surface(&self, id: &str, mode: TooltipMode) -> NodeId {
            let el = self.element(None, &[("id", id), ("class", "hidden")]);
            self.registry.register(TriggerEntry {
                id: id.to_string(),
                surface: el,
                mode,
            });
            el
        }

        fn hidden(&self, node: NodeId) -> bool {
            self.doc.borrow().has_class(node, "hidden")
        }
    }

    #[test]
    fn install_is_idempotent() {
        let page = Page::new();
        assert!(!page.dispatcher.ensure_installed().unwrap());
        assert!(!page.dispatcher.clone().ensure_installed().unwrap());

        let d = page.doc.borrow();
        let root = EventTarget::Node(d.root());
        assert_eq!(d.listener_count(root, EventKind::PointerEnter), 1);
        assert_eq!(d.listener_count(root, EventKind::PointerLeave), 1);
        assert_eq!(d.listener_count(root, EventKind::PointerMove), 1);

        let cursor = page.dispatcher.cursor_element().unwrap();
        assert_eq!(d.children(d.body()).first(), Some(&cursor));
        assert_eq!(d.attribute(cursor, "id"), Some("tooltip-cursor"));
    }

    #[test]
    fn hovering_one_trigger_reveals_only_its_tooltip() {
        let page = Page::new();
        let t1 = page.surface("t1", TooltipMode::Anchored);
        let t2 = page.surface("t2", TooltipMode::Anchored);
        let a = page.element(None, &[(TRIGGER_ATTRIBUTE, "t1")]);
        let b = page.element(None, &[(TRIGGER_ATTRIBUTE, "t2")]);

        let mut pointer = PointerTracker::default();
        pointer.move_to(&page.doc, Some(a), 5.0, 5.0);
        assert!(!page.hidden(t1));
        assert!(page.hidden(t2));
        {
            let d = page.doc.borrow();
            assert_eq!(d.style_property(a, "anchor-name").as_deref(), Some("--t1"));
            assert_eq!(d.style_property(t1, "position-anchor").as_deref(), Some("--t1"));
        }

        pointer.move_to(&page.doc, Some(b), 50.0, 5.0);
        assert!(page.hidden(t1));
        assert!(!page.hidden(t2));
    }

    #[test]
    fn deep_descendant_resolves_to_enclosing_trigger() {
        let page = Page::new();
        let tip = page.surface("t1", TooltipMode::Anchored);
        let trigger = page.element(None, &[(TRIGGER_ATTRIBUTE, "t1")]);
        let mid = page.element(Some(trigger), &[]);
        let leaf = page.element(Some(mid), &[]);

        let mut pointer = PointerTracker::default();
        pointer.move_to(&page.doc, Some(leaf), 1.0, 1.0);
        assert!(!page.hidden(tip));

        // Still inside the trigger.
        pointer.move_to(&page.doc, Some(mid), 1.0, 1.0);
        assert!(!page.hidden(tip));

        pointer.move_to(&page.doc, None, 0.0, 0.0);
        assert!(page.hidden(tip));
    }

    #[test]
    fn leaving_nested_trigger_keeps_ancestor_tooltip() {
        let page = Page::new();
        let outer_tip = page.surface("outer", TooltipMode::Anchored);
        let inner_tip = page.surface("inner", TooltipMode::Anchored);
        let outer = page.element(None, &[(TRIGGER_ATTRIBUTE, "outer")]);
        let inner = page.element(Some(outer), &[(TRIGGER_ATTRIBUTE, "inner")]);

        let mut pointer = PointerTracker::default();
        pointer.move_to(&page.doc, Some(inner), 1.0, 1.0);
        assert!(!page.hidden(inner_tip));

        pointer.move_to(&page.doc, Some(outer), 1.0, 1.0);
        assert!(page.hidden(inner_tip));
        assert!(!page.hidden(outer_tip));
    }

    #[test]
    fn unregistered_or_detached_targets_are_ignored() {
        let page = Page::new();
        let stray = page.element(None, &[(TRIGGER_ATTRIBUTE, "nobody")]);
        let tip = page.surface("gone", TooltipMode::Anchored);
        let trigger = page.element(None, &[(TRIGGER_ATTRIBUTE, "gone")]);
        page.doc.borrow_mut().detach(tip);

        let mut pointer = PointerTracker::default();
        pointer.move_to(&page.doc, Some(stray), 1.0, 1.0);
        pointer.move_to(&page.doc, Some(trigger), 1.0, 1.0);
        assert!(page.hidden(tip));
    }

    #[test]
    fn cursor_mode_tracks_pointer_and_hides_once() {
        let page = Page::new();
        let tip = page.surface("t1", TooltipMode::CursorFollow);
        let trigger = page.element(None, &[(TRIGGER_ATTRIBUTE, "t1")]);
        let child = page.element(Some(trigger), &[]);

        let mut pointer = PointerTracker::default();
        pointer.move_to(&page.doc, Some(trigger), 10.0, 20.0);
        pointer.move_to(&page.doc, Some(child), 12.0, 24.0);
        assert!(!page.hidden(tip));

        let cursor = page.dispatcher.cursor_element().unwrap();
        {
            let d = page.doc.borrow();
            assert_eq!(d.style_property(cursor, "top").as_deref(), Some("24px"));
            assert_eq!(d.style_property(cursor, "left").as_deref(), Some("12px"));
            assert_eq!(
                d.style_property(tip, "position-anchor").as_deref(),
                Some("--tooltip-cursor")
            );
            // Re-entering did not stack a second one-shot listener.
            assert_eq!(
                d.listener_count(EventTarget::Node(trigger), EventKind::PointerLeave),
                1
            );
        }

        pointer.move_to(&page.doc, None, 0.0, 0.0);
        assert!(page.hidden(tip));
        assert_eq!(
            page.doc
                .borrow()
                .listener_count(EventTarget::Node(trigger), EventKind::PointerLeave),
            0
        );
    }
}
