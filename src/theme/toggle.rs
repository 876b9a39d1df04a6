use std::cell::RefCell;
use std::rc::Weak;

use tracing::{debug, warn};

use super::{Subscription, Theme, ThemeBridge, WeakThemeBridge};
use crate::channel::{InteractionChannel, ThemeChange};
use crate::dom::{Document, EventKind, EventTarget, ListenerId, ListenerOptions, NodeId};
use crate::error::Error;
use crate::hook::{HookFuture, LifecycleHook, ready};

/// Button that flips the page theme and reports each change to the host.
pub struct ThemeToggleHook {
    element: NodeId,
    doc: Weak<RefCell<Document>>,
    bridge: ThemeBridge,
    channel: InteractionChannel,
    click_listener: Option<ListenerId>,
    system_subscription: Option<Subscription>,
}

fn announce(channel: &InteractionChannel, event: &str, theme: Theme) {
    channel.emit(event, ThemeChange { theme });
}

impl ThemeToggleHook {
    pub fn new(
        element: NodeId,
        doc: Weak<RefCell<Document>>,
        bridge: ThemeBridge,
        channel: InteractionChannel,
    ) -> Self {
        Self {
            element,
            doc,
            bridge,
            channel,
            click_listener: None,
            system_subscription: None,
        }
    }

    fn on_click(bridge: &WeakThemeBridge, channel: &InteractionChannel) {
        let Some(bridge) = bridge.upgrade() else {
            return;
        };
        match bridge.toggle() {
            Ok(theme) => announce(channel, &bridge.config().change_event, theme),
            Err(err) => {
                // The theme is applied even when it could not be stored.
                warn!(error = %err, "failed to persist theme preference");
                announce(channel, &bridge.config().change_event, bridge.current_theme());
            }
        }
    }

    fn on_system_change(bridge: &WeakThemeBridge, channel: &InteractionChannel, dark: bool) {
        let Some(bridge) = bridge.upgrade() else {
            return;
        };
        if bridge.stored_preference().is_some() {
            return;
        }
        let theme = Theme::from_dark(dark);
        bridge.apply_theme(theme);
        announce(channel, &bridge.config().change_event, theme);
    }
}

impl LifecycleHook for ThemeToggleHook {
    fn on_mount(&mut self) -> HookFuture {
        let Some(doc) = self.doc.upgrade() else {
            return ready(Err(Error::DocumentDropped));
        };
        let theme = self.bridge.initial_theme();
        self.bridge.apply_theme(theme);
        debug!(%theme, "theme toggle mounted");

        let (bridge, channel) = (self.bridge.downgrade(), self.channel.clone());
        self.click_listener = Some(doc.borrow_mut().add_listener(
            EventTarget::Node(self.element),
            EventKind::Click,
            ListenerOptions::default(),
            move |_| Self::on_click(&bridge, &channel),
        ));

        let (bridge, channel) = (self.bridge.downgrade(), self.channel.clone());
        self.system_subscription = Some(
            self.bridge
                .on_system_change(move |dark| Self::on_system_change(&bridge, &channel, dark)),
        );
        ready(Ok(()))
    }

    fn on_update(&mut self) -> HookFuture {
        ready(Ok(()))
    }

    fn on_destroy(&mut self) {
        if let (Some(id), Some(doc)) = (self.click_listener.take(), self.doc.upgrade()) {
            doc.borrow_mut().remove_listener(id);
        }
        if let Some(subscription) = self.system_subscription.take() {
            subscription.unsubscribe();
        }
    }
}
