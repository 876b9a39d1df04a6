use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::debug;

use super::{PreferenceStore, Theme, ThemeConfig};
use crate::dom::{Document, SharedDocument};
use crate::error::Result;

type Callback<T> = Rc<dyn Fn(&T)>;

struct ObserverList<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// Broadcast set; callbacks run in subscription order.
struct Observers<T> {
    list: Rc<RefCell<ObserverList<T>>>,
}

impl<T: 'static> Observers<T> {
    fn new() -> Self {
        Self {
            list: Rc::new(RefCell::new(ObserverList {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut list = self.list.borrow_mut();
            let id = list.next_id;
            list.next_id += 1;
            list.callbacks.push((id, Rc::new(callback)));
            id
        };
        let list: Weak<RefCell<ObserverList<T>>> = Rc::downgrade(&self.list);
        Subscription::new(move || {
            if let Some(list) = list.upgrade() {
                list.borrow_mut().callbacks.retain(|(i, _)| *i != id);
            }
        })
    }

    fn notify(&self, value: &T) {
        // Snapshot so callbacks may unsubscribe while being notified.
        let callbacks: Vec<Callback<T>> = self
            .list
            .borrow()
            .callbacks
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    fn len(&self) -> usize {
        self.list.borrow().callbacks.len()
    }
}

/// Unregister capability returned by a subscribe call.
///
/// [`Subscription::unsubscribe`] removes the callback exactly once; later
/// calls do nothing. Dropping the value does not unsubscribe.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    cancel: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: RefCell::new(Some(Box::new(cancel))),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self.cancel.borrow_mut().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.borrow().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

struct BridgeInner {
    doc: Weak<RefCell<Document>>,
    store: Rc<dyn PreferenceStore>,
    config: ThemeConfig,
    prefers_dark: Cell<bool>,
    theme_observers: Observers<Theme>,
    system_observers: Observers<bool>,
}

/// Page-wide theme state and change broadcast.
///
/// The applied theme lives on the root element's class list; the store only
/// remembers an explicit user choice.
#[derive(Clone)]
pub struct ThemeBridge {
    inner: Rc<BridgeInner>,
}

#[derive(Clone)]
pub struct WeakThemeBridge {
    inner: Weak<BridgeInner>,
}

impl WeakThemeBridge {
    pub fn upgrade(&self) -> Option<ThemeBridge> {
        self.inner.upgrade().map(|inner| ThemeBridge { inner })
    }
}

impl ThemeBridge {
    pub fn new(doc: &SharedDocument, store: Rc<dyn PreferenceStore>, config: ThemeConfig) -> Self {
        Self {
            inner: Rc::new(BridgeInner {
                doc: Rc::downgrade(doc),
                store,
                config,
                prefers_dark: Cell::new(false),
                theme_observers: Observers::new(),
                system_observers: Observers::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakThemeBridge {
        WeakThemeBridge {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &ThemeConfig {
        &self.inner.config
    }

    /// The stored choice, if it names a known theme.
    pub fn stored_preference(&self) -> Option<Theme> {
        self.inner
            .store
            .get(&self.inner.config.storage_key)
            .and_then(|value| value.parse().ok())
    }

    pub fn system_prefers_dark(&self) -> bool {
        self.inner.prefers_dark.get()
    }

    pub fn initial_theme(&self) -> Theme {
        self.stored_preference()
            .unwrap_or_else(|| Theme::from_dark(self.system_prefers_dark()))
    }

    pub fn current_theme(&self) -> Theme {
        let Some(doc) = self.inner.doc.upgrade() else {
            return Theme::default();
        };
        let doc = doc.borrow();
        Theme::from_dark(doc.has_class(doc.document_element(), &self.inner.config.dark_class))
    }

    pub fn subscribe(&self, callback: impl Fn(Theme) + 'static) -> Subscription {
        self.inner.theme_observers.subscribe(move |theme| callback(*theme))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.theme_observers.len()
    }

    /// Subscribes to platform color-scheme changes (`true` = dark).
    pub fn on_system_change(&self, callback: impl Fn(bool) + 'static) -> Subscription {
        self.inner.system_observers.subscribe(move |dark| callback(*dark))
    }

    fn paint(&self, theme: Theme) {
        let Some(doc) = self.inner.doc.upgrade() else {
            return;
        };
        let mut doc = doc.borrow_mut();
        let root = doc.document_element();
        let class = &self.inner.config.dark_class;
        if theme.is_dark() {
            doc.add_class(root, class);
        } else {
            doc.remove_class(root, class);
        }
    }

    /// Applies `theme` to the root element and notifies subscribers without
    /// touching the stored preference.
    pub fn apply_theme(&self, theme: Theme) {
        self.paint(theme);
        debug!(%theme, "theme applied");
        self.inner.theme_observers.notify(&theme);
    }

    /// Applies, persists, then notifies every subscriber before returning.
    ///
    /// A persistence failure is reported after subscribers ran.
    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.paint(theme);
        let persisted = self
            .inner
            .store
            .set(&self.inner.config.storage_key, theme.as_str());
        debug!(%theme, "theme set");
        self.inner.theme_observers.notify(&theme);
        persisted
    }

    pub fn toggle(&self) -> Result<Theme> {
        let theme = self.current_theme().toggled();
        self.set_theme(theme)?;
        Ok(theme)
    }

    /// Records the platform signal and informs system-change subscribers.
    pub fn set_system_prefers_dark(&self, dark: bool) {
        if self.inner.prefers_dark.replace(dark) == dark {
            return;
        }
        self.inner.system_observers.notify(&dark);
    }
}
