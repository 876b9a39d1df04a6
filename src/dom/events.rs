use std::rc::Rc;

use super::{Document, NodeId, SharedDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    PointerEnter,
    PointerLeave,
    PointerMove,
    Resize,
}

impl EventKind {
    /// Enter/leave are delivered to the element itself and to capturing
    /// ancestors only, as in the browser.
    pub fn bubbles(self) -> bool {
        matches!(self, Self::Click | Self::PointerMove)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Window,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
}

impl ListenerOptions {
    pub fn capture() -> Self {
        Self {
            capture: true,
            ..Self::default()
        }
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Rc<dyn Fn(&mut DomEvent)>;

#[derive(Debug, Clone)]
pub struct DomEvent {
    pub kind: EventKind,
    pub target: EventTarget,
    pub related_target: Option<NodeId>,
    pub client_x: f32,
    pub client_y: f32,
    current_target: EventTarget,
    default_prevented: bool,
    propagation_stopped: bool,
    in_passive_listener: bool,
}

impl DomEvent {
    pub fn new(kind: EventKind, target: EventTarget) -> Self {
        Self {
            kind,
            target,
            related_target: None,
            client_x: 0.0,
            client_y: 0.0,
            current_target: target,
            default_prevented: false,
            propagation_stopped: false,
            in_passive_listener: false,
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.client_x = x;
        self.client_y = y;
        self
    }

    pub fn related(mut self, node: Option<NodeId>) -> Self {
        self.related_target = node;
        self
    }

    pub fn target_node(&self) -> Option<NodeId> {
        match self.target {
            EventTarget::Node(node) => Some(node),
            EventTarget::Window => None,
        }
    }

    pub fn current_target(&self) -> EventTarget {
        self.current_target
    }

    /// Ignored while a passive listener runs.
    pub fn prevent_default(&mut self) {
        if !self.in_passive_listener {
            self.default_prevented = true;
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

struct ListenerEntry {
    id: ListenerId,
    target: EventTarget,
    kind: EventKind,
    options: ListenerOptions,
    callback: Listener,
}

#[derive(Default)]
pub(super) struct ListenerTable {
    entries: Vec<ListenerEntry>,
    next_id: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Capture,
    Target,
    Bubble,
}

impl ListenerTable {
    pub(super) fn remove_targets(&mut self, nodes: &[NodeId]) {
        self.entries.retain(|entry| match entry.target {
            EventTarget::Node(node) => !nodes.contains(&node),
            EventTarget::Window => true,
        });
    }

    /// Clones out the callbacks to run for one propagation step, dropping
    /// `once` entries as they are taken.
    fn take_matching(
        &mut self,
        target: EventTarget,
        kind: EventKind,
        phase: Phase,
    ) -> Vec<(Listener, bool)> {
        let matches = |entry: &ListenerEntry| {
            entry.target == target
                && entry.kind == kind
                && match phase {
                    Phase::Capture => entry.options.capture,
                    Phase::Bubble => !entry.options.capture,
                    Phase::Target => true,
                }
        };

        let taken = self
            .entries
            .iter()
            .filter(|e| matches(*e))
            .map(|e| (Rc::clone(&e.callback), e.options.passive))
            .collect();
        self.entries.retain(|e| !(e.options.once && matches(e)));
        taken
    }
}

impl Document {
    pub fn add_listener(
        &mut self,
        target: EventTarget,
        kind: EventKind,
        options: ListenerOptions,
        callback: impl Fn(&mut DomEvent) + 'static,
    ) -> ListenerId {
        let table = &mut self.listeners;
        let id = ListenerId(table.next_id);
        table.next_id += 1;
        table.entries.push(ListenerEntry {
            id,
            target,
            kind,
            options,
            callback: Rc::new(callback),
        });
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.entries.len();
        self.listeners.entries.retain(|e| e.id != id);
        before != self.listeners.entries.len()
    }

    pub fn listener_count(&self, target: EventTarget, kind: EventKind) -> usize {
        self.listeners
            .entries
            .iter()
            .filter(|e| e.target == target && e.kind == kind)
            .count()
    }
}

fn invoke(doc: &SharedDocument, event: &mut DomEvent, current: EventTarget, phase: Phase) {
    let callbacks = doc
        .borrow_mut()
        .listeners
        .take_matching(current, event.kind, phase);
    event.current_target = current;
    for (callback, passive) in callbacks {
        event.in_passive_listener = passive;
        callback(event);
        event.in_passive_listener = false;
    }
}

/// Runs capture, target and (for bubbling kinds) bubble phases. No document
/// borrow is held while a listener runs.
pub fn dispatch(doc: &SharedDocument, mut event: DomEvent) -> DomEvent {
    let path: Vec<EventTarget> = match event.target {
        EventTarget::Window => vec![EventTarget::Window],
        EventTarget::Node(node) => doc.borrow().ancestors(node).map(EventTarget::Node).collect(),
    };

    for &current in path.iter().skip(1).rev() {
        invoke(doc, &mut event, current, Phase::Capture);
        if event.propagation_stopped {
            return event;
        }
    }

    invoke(doc, &mut event, path[0], Phase::Target);
    if event.propagation_stopped || !event.kind.bubbles() {
        return event;
    }

    for &current in path.iter().skip(1) {
        invoke(doc, &mut event, current, Phase::Bubble);
        if event.propagation_stopped {
            break;
        }
    }
    event
}

/// Turns "the pointer is now over this node" into per-element enter/leave
/// events followed by a bubbling move.
#[derive(Debug, Default)]
pub struct PointerTracker {
    hovered: Option<NodeId>,
}

impl PointerTracker {
    pub fn hovered(&self) -> Option<NodeId> {
        self.hovered
    }

    pub fn move_to(&mut self, doc: &SharedDocument, target: Option<NodeId>, x: f32, y: f32) {
        let (left, entered) = {
            let doc = doc.borrow();
            let old = self.hovered.map(|n| element_chain(&doc, n)).unwrap_or_default();
            let new = target.map(|n| element_chain(&doc, n)).unwrap_or_default();
            let left: Vec<NodeId> = old.iter().copied().filter(|n| !new.contains(n)).collect();
            let entered: Vec<NodeId> = new
                .iter()
                .rev()
                .copied()
                .filter(|n| !old.contains(n))
                .collect();
            (left, entered)
        };
        let previous = std::mem::replace(&mut self.hovered, target);

        for node in left {
            let event = DomEvent::new(EventKind::PointerLeave, EventTarget::Node(node))
                .at(x, y)
                .related(target);
            dispatch(doc, event);
        }
        for node in entered {
            let event = DomEvent::new(EventKind::PointerEnter, EventTarget::Node(node))
                .at(x, y)
                .related(previous);
            dispatch(doc, event);
        }
        if let Some(node) = target {
            dispatch(
                doc,
                DomEvent::new(EventKind::PointerMove, EventTarget::Node(node)).at(x, y),
            );
        }
    }
}

/// Deepest-first element ancestry of a live node.
fn element_chain(doc: &Document, node: NodeId) -> Vec<NodeId> {
    doc.ancestors(node)
        .filter(|n| doc.is_element(*n) && !doc.is_released(*n))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn tree() -> (SharedDocument, NodeId, NodeId) {
        let mut doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("span");
        doc.append_child(doc.body(), outer).unwrap();
        doc.append_child(outer, inner).unwrap();
        (doc.into_shared(), outer, inner)
    }

    #[test]
    fn capture_runs_before_target_and_bubble_after() {
        let (doc, outer, inner) = tree();
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = doc.borrow().root();
        {
            let mut d = doc.borrow_mut();
            let l = Rc::clone(&log);
            d.add_listener(EventTarget::Node(root), EventKind::Click, ListenerOptions::capture(), move |_| {
                l.borrow_mut().push("capture")
            });
            let l = Rc::clone(&log);
            d.add_listener(EventTarget::Node(inner), EventKind::Click, ListenerOptions::default(), move |_| {
                l.borrow_mut().push("target")
            });
            let l = Rc::clone(&log);
            d.add_listener(EventTarget::Node(outer), EventKind::Click, ListenerOptions::default(), move |_| {
                l.borrow_mut().push("bubble")
            });
        }

        dispatch(&doc, DomEvent::new(EventKind::Click, EventTarget::Node(inner)));
        assert_eq!(*log.borrow(), vec!["capture", "target", "bubble"]);
    }

    #[test]
    fn stop_propagation_and_prevent_default() {
        let (doc, outer, inner) = tree();
        let bubbled = Rc::new(RefCell::new(false));
        {
            let mut d = doc.borrow_mut();
            d.add_listener(EventTarget::Node(inner), EventKind::Click, ListenerOptions::default(), |e| {
                e.prevent_default();
                e.stop_propagation();
            });
            let b = Rc::clone(&bubbled);
            d.add_listener(EventTarget::Node(outer), EventKind::Click, ListenerOptions::default(), move |_| {
                *b.borrow_mut() = true
            });
        }

        let event = dispatch(&doc, DomEvent::new(EventKind::Click, EventTarget::Node(inner)));
        assert!(event.default_prevented());
        assert!(!*bubbled.borrow());
    }

    #[test]
    fn passive_listener_cannot_prevent_default() {
        let (doc, _, inner) = tree();
        doc.borrow_mut().add_listener(
            EventTarget::Node(inner),
            EventKind::Click,
            ListenerOptions::default().passive(),
            |e| e.prevent_default(),
        );
        let event = dispatch(&doc, DomEvent::new(EventKind::Click, EventTarget::Node(inner)));
        assert!(!event.default_prevented());
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let (doc, _, inner) = tree();
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        doc.borrow_mut().add_listener(
            EventTarget::Node(inner),
            EventKind::PointerLeave,
            ListenerOptions::default().once(),
            move |_| *c.borrow_mut() += 1,
        );
        for _ in 0..3 {
            dispatch(&doc, DomEvent::new(EventKind::PointerLeave, EventTarget::Node(inner)));
        }
        assert_eq!(*count.borrow(), 1);
        assert_eq!(
            doc.borrow().listener_count(EventTarget::Node(inner), EventKind::PointerLeave),
            0
        );
    }

    #[test]
    fn tracker_emits_enter_outermost_first_and_leave_deepest_first() {
        let (doc, outer, inner) = tree();
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = doc.borrow().root();
        for kind in [EventKind::PointerEnter, EventKind::PointerLeave] {
            let l = Rc::clone(&log);
            doc.borrow_mut().add_listener(
                EventTarget::Node(root),
                kind,
                ListenerOptions::capture(),
                move |e| l.borrow_mut().push((e.kind, e.target_node())),
            );
        }

        let mut tracker = PointerTracker::default();
        tracker.move_to(&doc, Some(inner), 1.0, 1.0);
        let body = doc.borrow().body();
        let html = doc.borrow().document_element();
        assert_eq!(
            *log.borrow(),
            vec![
                (EventKind::PointerEnter, Some(html)),
                (EventKind::PointerEnter, Some(body)),
                (EventKind::PointerEnter, Some(outer)),
                (EventKind::PointerEnter, Some(inner)),
            ]
        );

        log.borrow_mut().clear();
        tracker.move_to(&doc, Some(body), 2.0, 2.0);
        assert_eq!(
            *log.borrow(),
            vec![
                (EventKind::PointerLeave, Some(inner)),
                (EventKind::PointerLeave, Some(outer)),
            ]
        );
    }
}
