use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One message to the controller that owns the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub event: String,
    pub payload: Value,
}

/// Payload of a diagram link click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkClick {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeChange {
    pub theme: crate::theme::Theme,
}

/// Reported for re-renders nobody awaits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderFailed {
    pub id: String,
    pub message: String,
}

/// Sending half of the outbound interaction channel.
///
/// Emitting after the receiver is gone drops the event.
#[derive(Debug, Clone)]
pub struct InteractionChannel {
    sender: UnboundedSender<OutboundEvent>,
}

pub fn interaction_channel() -> (InteractionChannel, UnboundedReceiver<OutboundEvent>) {
    let (sender, receiver) = unbounded();
    (InteractionChannel { sender }, receiver)
}

impl InteractionChannel {
    pub fn emit(&self, event: &str, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event, error = %err, "dropping unserializable payload");
                return;
            }
        };
        debug!(event, %payload, "emit");
        let message = OutboundEvent {
            event: event.to_string(),
            payload,
        };
        if self.sender.unbounded_send(message).is_err() {
            debug!(event, "no receiver for outbound event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::Theme;

    #[test]
    fn emit_serializes_payload_in_order() {
        let (channel, mut receiver) = interaction_channel();
        channel.emit("viz:click", LinkClick { id: "node5".into() });
        channel.emit("set-theme", ThemeChange { theme: Theme::Dark });

        let first = receiver.try_next().unwrap().unwrap();
        assert_eq!(first.event, "viz:click");
        assert_eq!(first.payload, serde_json::json!({ "id": "node5" }));

        let second = receiver.try_next().unwrap().unwrap();
        assert_eq!(second.payload["theme"], "dark");
        assert!(receiver.try_next().is_err());
    }

    #[test]
    fn emit_without_receiver_is_silent() {
        let (channel, receiver) = interaction_channel();
        drop(receiver);
        channel.emit("viz:click", LinkClick { id: "a".into() });
    }
}
