//! Auto-dismissing flash messages.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::error::Error;
use crate::hook::{HookFuture, LifecycleHook, ready};
use crate::timer::{Scheduler, TimerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Delay before the message starts fading out.
    #[serde(default = "default_dismiss_after_ms")]
    pub dismiss_after_ms: u64,
    /// Fade duration; the element is hidden once it elapses.
    #[serde(default = "default_fade_ms")]
    pub fade_ms: u64,
}

fn default_dismiss_after_ms() -> u64 {
    5000
}
fn default_fade_ms() -> u64 {
    300
}

impl Default for FlashConfig {
    fn default() -> Self {
        FlashConfig {
            dismiss_after_ms: default_dismiss_after_ms(),
            fade_ms: default_fade_ms(),
        }
    }
}

impl FlashConfig {
    pub fn dismiss_after(&self) -> Duration {
        Duration::from_millis(self.dismiss_after_ms)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }
}

pub struct FlashHook {
    element: NodeId,
    doc: Weak<RefCell<Document>>,
    scheduler: Weak<dyn Scheduler>,
    config: FlashConfig,
    pending: Rc<Cell<Option<TimerId>>>,
}

fn style(doc: &Weak<RefCell<Document>>, element: NodeId, property: &str, value: &str) {
    if let Some(doc) = doc.upgrade() {
        doc.borrow_mut().set_style_property(element, property, value);
    }
}

impl FlashHook {
    pub fn new(
        element: NodeId,
        doc: Weak<RefCell<Document>>,
        scheduler: Weak<dyn Scheduler>,
        config: FlashConfig,
    ) -> Self {
        Self {
            element,
            doc,
            scheduler,
            config,
            pending: Rc::new(Cell::new(None)),
        }
    }

    /// Timer currently pending for this message, if any.
    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending.get()
    }
}

impl LifecycleHook for FlashHook {
    fn on_mount(&mut self) -> HookFuture {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return ready(Err(Error::Config("flash message mounted without a scheduler".into())));
        };
        let (element, doc, pending) = (self.element, self.doc.clone(), Rc::clone(&self.pending));
        let (weak_scheduler, fade) = (self.scheduler.clone(), self.config.fade());

        let id = scheduler.schedule(
            self.config.dismiss_after(),
            Box::new(move || {
                pending.set(None);
                style(&doc, element, "opacity", "0");
                let Some(scheduler) = weak_scheduler.upgrade() else {
                    return;
                };
                let hide_pending = Rc::clone(&pending);
                let id = scheduler.schedule(
                    fade,
                    Box::new(move || {
                        hide_pending.set(None);
                        style(&doc, element, "display", "none");
                        debug!(?element, "flash dismissed");
                    }),
                );
                pending.set(Some(id));
            }),
        );
        self.pending.set(Some(id));
        ready(Ok(()))
    }

    fn on_update(&mut self) -> HookFuture {
        ready(Ok(()))
    }

    fn on_destroy(&mut self) {
        let Some(id) = self.pending.take() else {
            return;
        };
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::dom::SharedDocument;
    use crate::timer::ManualScheduler;

    fn setup() -> (SharedDocument, NodeId, Rc<ManualScheduler>, FlashHook) {
        let doc = Document::new().into_shared();
        let element = {
            let mut d = doc.borrow_mut();
            let el = d.create_element("div");
            let body = d.body();
            d.append_child(body, el).unwrap();
            el
        };
        let scheduler = Rc::new(ManualScheduler::default());
        let weak: Weak<dyn Scheduler> = Rc::downgrade(&scheduler) as Weak<dyn Scheduler>;
        let hook = FlashHook::new(element, Rc::downgrade(&doc), weak, FlashConfig::default());
        (doc, element, scheduler, hook)
    }

    fn style_of(doc: &SharedDocument, element: NodeId, property: &str) -> Option<String> {
        doc.borrow().style_property(element, property)
    }

    #[test]
    fn fades_then_hides() {
        let (doc, element, clock, mut hook) = setup();
        block_on(hook.on_mount()).unwrap();

        clock.advance(Duration::from_millis(4999));
        assert_eq!(style_of(&doc, element, "opacity"), None);

        clock.advance(Duration::from_millis(1));
        assert_eq!(style_of(&doc, element, "opacity").as_deref(), Some("0"));
        assert_eq!(style_of(&doc, element, "display"), None);
        assert!(hook.pending_timer().is_some());

        clock.advance(Duration::from_millis(300));
        assert_eq!(style_of(&doc, element, "display").as_deref(), Some("none"));
        assert_eq!(hook.pending_timer(), None);
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn destroy_before_dismiss_cancels() {
        let (doc, element, clock, mut hook) = setup();
        block_on(hook.on_mount()).unwrap();
        hook.on_destroy();

        assert_eq!(clock.pending_count(), 0);
        clock.advance(Duration::from_secs(10));
        assert_eq!(style_of(&doc, element, "opacity"), None);
    }

    #[test]
    fn destroy_during_fade_keeps_element_visible() {
        let (doc, element, clock, mut hook) = setup();
        block_on(hook.on_mount()).unwrap();
        clock.advance(Duration::from_millis(5100));
        hook.on_destroy();

        clock.advance(Duration::from_secs(1));
        assert_eq!(style_of(&doc, element, "opacity").as_deref(), Some("0"));
        assert_eq!(style_of(&doc, element, "display"), None);
    }

    #[test]
    fn config_accepts_partial_tables() {
        let config: FlashConfig = toml::from_str("fade_ms = 150").unwrap();
        assert_eq!(config.dismiss_after(), Duration::from_millis(5000));
        assert_eq!(config.fade(), Duration::from_millis(150));
    }
}
