use tracing::trace;

use crate::channel::{InteractionChannel, LinkClick};
use crate::dom::{Document, EventKind, EventTarget, ListenerOptions, NodeId};
use crate::tooltip::TRIGGER_ATTRIBUTE;

/// Where intercepted link clicks go.
#[derive(Debug, Clone)]
pub struct LinkBinding {
    pub channel: InteractionChannel,
    /// Outbound event name, e.g. `viz:click`.
    pub event: String,
    /// When set, each link also becomes a tooltip trigger for
    /// `{prefix}{id}`.
    pub tooltip_prefix: Option<String>,
}

fn fragment_target(doc: &Document, anchor: NodeId) -> Option<String> {
    let href = doc
        .attribute(anchor, "xlink:href")
        .or_else(|| doc.attribute(anchor, "href"))?;
    href.strip_prefix('#').map(str::to_string)
}

/// Intercepts every in-document link of a freshly rendered surface.
///
/// A click on one of them never navigates; it emits one event carrying the
/// fragment id. Other links are left alone. Returns the ids in document
/// order.
pub fn map_links(doc: &mut Document, surface: NodeId, binding: &LinkBinding) -> Vec<String> {
    let mut ids = Vec::new();
    for anchor in doc.elements_by_local_name(surface, "a") {
        let Some(id) = fragment_target(doc, anchor) else {
            continue;
        };

        let channel = binding.channel.clone();
        let event_name = binding.event.clone();
        let payload_id = id.clone();
        doc.add_listener(
            EventTarget::Node(anchor),
            EventKind::Click,
            ListenerOptions::default(),
            move |event| {
                event.prevent_default();
                event.stop_propagation();
                channel.emit(&event_name, LinkClick {
                    id: payload_id.clone(),
                });
            },
        );

        if let Some(prefix) = &binding.tooltip_prefix {
            doc.set_attribute(anchor, TRIGGER_ATTRIBUTE, format!("{prefix}{id}"));
        }
        trace!(%id, "link mapped");
        ids.push(id);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::interaction_channel;
    use crate::dom::{DomEvent, dispatch};

    const SURFACE: &str = r##"<svg xmlns:xlink="http://www.w3.org/1999/xlink">
  <g id="node1"><a xlink:href="#node5"><text>five</text></a></g>
  <g id="node2"><a href="https://example.com/docs"><text>docs</text></a></g>
  <g id="node3"><svg:a xmlns:svg="http://www.w3.org/2000/svg" href="#node7"/></g>
</svg>"##;

    #[test]
    fn maps_fragment_links_only() {
        let (channel, _events) = interaction_channel();
        let mut doc = Document::new();
        let svg = doc.parse_fragment(SURFACE).unwrap();
        let binding = LinkBinding {
            channel,
            event: "viz:click".to_string(),
            tooltip_prefix: Some("tooltip-".to_string()),
        };

        let ids = map_links(&mut doc, svg, &binding);
        assert_eq!(ids, vec!["node5".to_string(), "node7".to_string()]);

        let anchors = doc.elements_by_local_name(svg, "a");
        assert_eq!(doc.attribute(anchors[0], TRIGGER_ATTRIBUTE), Some("tooltip-node5"));
        assert_eq!(doc.attribute(anchors[1], TRIGGER_ATTRIBUTE), None);
        assert_eq!(
            doc.listener_count(EventTarget::Node(anchors[1]), EventKind::Click),
            0
        );
    }

    #[test]
    fn surface_without_links_is_untouched() {
        let (channel, _events) = interaction_channel();
        let mut doc = Document::new();
        let svg = doc.parse_fragment("<svg><g><text>A</text></g></svg>").unwrap();
        let before = doc.outer_xml(svg);
        let binding = LinkBinding {
            channel,
            event: "viz:click".to_string(),
            tooltip_prefix: None,
        };
        assert!(map_links(&mut doc, svg, &binding).is_empty());
        assert_eq!(doc.outer_xml(svg), before);
    }

    #[test]
    fn click_emits_once_and_blocks_navigation_and_bubbling() {
        let (channel, mut events) = interaction_channel();
        let mut doc = Document::new();
        let svg = doc.parse_fragment(SURFACE).unwrap();
        let body = doc.body();
        doc.append_child(body, svg).unwrap();
        map_links(
            &mut doc,
            svg,
            &LinkBinding {
                channel,
                event: "viz:click".to_string(),
                tooltip_prefix: None,
            },
        );
        let anchor = doc.elements_by_local_name(svg, "a")[0];
        let text = doc.children(anchor)[0];

        let bubbled = std::rc::Rc::new(std::cell::Cell::new(false));
        let b = bubbled.clone();
        doc.add_listener(EventTarget::Node(body), EventKind::Click, ListenerOptions::default(), move |_| {
            b.set(true)
        });

        let doc = doc.into_shared();
        let event = dispatch(&doc, DomEvent::new(EventKind::Click, EventTarget::Node(text)));

        assert!(event.default_prevented());
        assert!(!bubbled.get());
        let emitted = events.try_next().unwrap().unwrap();
        assert_eq!(emitted.event, "viz:click");
        assert_eq!(emitted.payload["id"], "node5");
        assert!(events.try_next().is_err());
    }
}
