use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dom::{Document, EventKind, EventTarget, ListenerOptions, NodeId, SharedDocument};
use crate::error::{Error, Result};

pub const VIEWPORT_CLASS: &str = "svg-pan-zoom_viewport";
pub const CONTROLS_ID: &str = "svg-pan-zoom-controls";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanZoomOptions {
    #[serde(default = "default_true")]
    pub control_icons_enabled: bool,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,
    #[serde(default = "default_min_zoom")]
    pub min_zoom: f32,
    /// Keep the drawing from being panned out of the viewport.
    #[serde(default = "default_true")]
    pub contain: bool,
    /// Fit the drawing into its container on attach and resize.
    #[serde(default = "default_true")]
    pub fit: bool,
    /// Zoom step used by the zoom controls.
    #[serde(default = "default_zoom_scale_sensitivity")]
    pub zoom_scale_sensitivity: f32,
}

fn default_true() -> bool {
    true
}
fn default_max_zoom() -> f32 {
    100.0
}
fn default_min_zoom() -> f32 {
    0.5
}
fn default_zoom_scale_sensitivity() -> f32 {
    0.2
}

impl Default for PanZoomOptions {
    fn default() -> Self {
        PanZoomOptions {
            control_icons_enabled: true,
            max_zoom: default_max_zoom(),
            min_zoom: default_min_zoom(),
            contain: true,
            fit: true,
            zoom_scale_sensitivity: default_zoom_scale_sensitivity(),
        }
    }
}

/// Adds pan/zoom behavior to a rendered surface.
pub trait PanZoomBackend {
    fn attach(
        &self,
        doc: &SharedDocument,
        surface: NodeId,
        options: &PanZoomOptions,
    ) -> Result<Box<dyn PanZoomHandle>>;
}

/// Live pan/zoom state of one surface. Every call after `destroy` is a no-op.
pub trait PanZoomHandle {
    /// Re-reads the container size and re-fits.
    fn resize(&self);
    fn zoom(&self) -> f32;
    fn zoom_by(&self, factor: f32);
    fn pan_by(&self, dx: f32, dy: f32);
    fn reset(&self);
    fn destroy(&self);
}

/// Transform-based pan/zoom on the surface itself.
///
/// The drawing is moved into a `svg-pan-zoom_viewport` group whose
/// `transform` carries the current view.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewportPanZoom;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ViewBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

fn parse_length(value: &str) -> Option<f32> {
    let value = value.trim();
    let number = value.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '%');
    if value.ends_with('%') {
        return None;
    }
    number.trim().parse().ok().filter(|v: &f32| v.is_finite() && *v > 0.0)
}

fn read_view_box(doc: &Document, surface: NodeId) -> ViewBox {
    let parsed = doc.attribute(surface, "viewBox").and_then(|raw| {
        let parts: Vec<f32> = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.parse().ok())
            .collect();
        match parts.as_slice() {
            [x, y, w, h] if *w > 0.0 && *h > 0.0 => Some(ViewBox {
                x: *x,
                y: *y,
                width: *w,
                height: *h,
            }),
            _ => None,
        }
    });
    parsed.unwrap_or_else(|| ViewBox {
        x: 0.0,
        y: 0.0,
        width: doc
            .attribute(surface, "width")
            .and_then(parse_length)
            .unwrap_or(1.0),
        height: doc
            .attribute(surface, "height")
            .and_then(parse_length)
            .unwrap_or(1.0),
    })
}

struct Viewport {
    doc: Weak<RefCell<Document>>,
    surface: NodeId,
    group: NodeId,
    controls: Option<NodeId>,
    options: PanZoomOptions,
    view_box: ViewBox,
    container: (f32, f32),
    fit_scale: f32,
    zoom: f32,
    pan: (f32, f32),
    destroyed: bool,
}

impl Viewport {
    fn container_size(&self, doc: &Document) -> (f32, f32) {
        doc.parent(self.surface)
            .and_then(|parent| doc.measured_size(parent))
            .or_else(|| doc.measured_size(self.surface))
            .filter(|(w, h)| *w > 0.0 && *h > 0.0)
            .unwrap_or((self.view_box.width, self.view_box.height))
    }

    fn scale(&self) -> f32 {
        self.fit_scale * self.zoom
    }

    fn centered_pan(&self) -> (f32, f32) {
        let s = self.scale();
        let vb = self.view_box;
        (
            (self.container.0 - vb.width * s) / 2.0 - vb.x * s,
            (self.container.1 - vb.height * s) / 2.0 - vb.y * s,
        )
    }

    fn refit(&mut self, doc: &Document) {
        self.container = self.container_size(doc);
        self.fit_scale = if self.options.fit {
            (self.container.0 / self.view_box.width).min(self.container.1 / self.view_box.height)
        } else {
            1.0
        };
        self.pan = self.centered_pan();
    }

    fn clamp_pan(&mut self) {
        if !self.options.contain {
            return;
        }
        let s = self.scale();
        let vb = self.view_box;
        let bound = |origin: f32, extent: f32, container: f32, pan: f32| {
            let a = -origin * s;
            let b = container - (origin + extent) * s;
            pan.clamp(a.min(b), a.max(b))
        };
        self.pan = (
            bound(vb.x, vb.width, self.container.0, self.pan.0),
            bound(vb.y, vb.height, self.container.1, self.pan.1),
        );
    }

    fn write(&self, doc: &mut Document) {
        // Adding zero folds -0 into 0 so the output never reads "-0".
        let (s, tx, ty) = (self.scale() + 0.0, self.pan.0 + 0.0, self.pan.1 + 0.0);
        doc.set_attribute(
            self.group,
            "transform",
            format!("matrix({s},0,0,{s},{tx},{ty})"),
        );
    }

    fn zoom_by(&mut self, factor: f32) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let old = self.scale();
        self.zoom = (self.zoom * factor).clamp(self.options.min_zoom, self.options.max_zoom);
        let ratio = self.scale() / old;
        let (cx, cy) = (self.container.0 / 2.0, self.container.1 / 2.0);
        self.pan = (cx - (cx - self.pan.0) * ratio, cy - (cy - self.pan.1) * ratio);
        self.clamp_pan();
    }
}

/// Runs `f` against a live viewport and writes the resulting transform.
fn with_viewport(viewport: &RefCell<Viewport>, f: impl FnOnce(&mut Viewport, &Document)) {
    let mut viewport = viewport.borrow_mut();
    if viewport.destroyed {
        return;
    }
    let Some(doc) = viewport.doc.upgrade() else {
        return;
    };
    {
        let d = doc.borrow();
        f(&mut *viewport, &*d);
    }
    viewport.write(&mut doc.borrow_mut());
}

struct ViewportHandle {
    viewport: Rc<RefCell<Viewport>>,
}

impl PanZoomHandle for ViewportHandle {
    fn resize(&self) {
        with_viewport(&self.viewport, |v, doc| {
            v.refit(doc);
            trace!(width = v.container.0, height = v.container.1, "pan/zoom resized");
        });
    }

    fn zoom(&self) -> f32 {
        self.viewport.borrow().zoom
    }

    fn zoom_by(&self, factor: f32) {
        with_viewport(&self.viewport, |v, _| v.zoom_by(factor));
    }

    fn pan_by(&self, dx: f32, dy: f32) {
        with_viewport(&self.viewport, |v, _| {
            v.pan = (v.pan.0 + dx, v.pan.1 + dy);
            v.clamp_pan();
        });
    }

    fn reset(&self) {
        with_viewport(&self.viewport, |v, _| {
            v.zoom = 1.0;
            v.pan = v.centered_pan();
        });
    }

    fn destroy(&self) {
        let mut viewport = self.viewport.borrow_mut();
        if std::mem::replace(&mut viewport.destroyed, true) {
            return;
        }
        if let (Some(controls), Some(doc)) = (viewport.controls.take(), viewport.doc.upgrade()) {
            doc.borrow_mut().release(controls);
        }
        debug!(surface = ?viewport.surface, "pan/zoom destroyed");
    }
}

fn control_button(
    doc: &mut Document,
    controls: NodeId,
    id: &str,
    viewport: &Rc<RefCell<Viewport>>,
    action: fn(&ViewportHandle),
) -> Result<()> {
    let button = doc.create_element("g");
    doc.set_attribute(button, "id", id);
    doc.set_attribute(button, "class", "svg-pan-zoom-control");
    doc.append_child(controls, button)?;

    let weak = Rc::downgrade(viewport);
    doc.add_listener(
        EventTarget::Node(button),
        EventKind::Click,
        ListenerOptions::default(),
        move |event| {
            event.prevent_default();
            if let Some(viewport) = weak.upgrade() {
                action(&ViewportHandle { viewport });
            }
        },
    );
    Ok(())
}

impl PanZoomBackend for ViewportPanZoom {
    fn attach(
        &self,
        shared: &SharedDocument,
        surface: NodeId,
        options: &PanZoomOptions,
    ) -> Result<Box<dyn PanZoomHandle>> {
        let mut doc = shared.borrow_mut();
        if doc.is_released(surface) {
            return Err(Error::DetachedNode(surface));
        }
        let view_box = read_view_box(&doc, surface);
        doc.remove_attribute(surface, "viewBox");

        let group = doc.create_element("g");
        doc.set_attribute(group, "class", VIEWPORT_CLASS);
        let children: Vec<NodeId> = doc.children(surface).to_vec();
        for child in children {
            doc.append_child(group, child)?;
        }
        doc.append_child(surface, group)?;

        let mut viewport = Viewport {
            doc: Rc::downgrade(shared),
            surface,
            group,
            controls: None,
            options: options.clone(),
            view_box,
            container: (view_box.width, view_box.height),
            fit_scale: 1.0,
            zoom: 1.0,
            pan: (0.0, 0.0),
            destroyed: false,
        };
        viewport.refit(&doc);
        viewport.write(&mut doc);
        let viewport = Rc::new(RefCell::new(viewport));

        if options.control_icons_enabled {
            let controls = doc.create_element("g");
            doc.set_attribute(controls, "id", CONTROLS_ID);
            doc.append_child(surface, controls)?;

            control_button(&mut doc, controls, "svg-pan-zoom-zoom-in", &viewport, |h| {
                let step = 1.0 + h.viewport.borrow().options.zoom_scale_sensitivity;
                h.zoom_by(step);
            })?;
            control_button(&mut doc, controls, "svg-pan-zoom-reset-pan-zoom", &viewport, |h| {
                h.reset()
            })?;
            control_button(&mut doc, controls, "svg-pan-zoom-zoom-out", &viewport, |h| {
                let step = 1.0 + h.viewport.borrow().options.zoom_scale_sensitivity;
                h.zoom_by(1.0 / step);
            })?;
            viewport.borrow_mut().controls = Some(controls);
        }

        Ok(Box::new(ViewportHandle { viewport }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{DomEvent, dispatch};

    fn mounted_surface(container: Option<(f32, f32)>) -> (SharedDocument, NodeId, NodeId) {
        let mut doc = Document::new();
        let host = doc.create_element("div");
        let body = doc.body();
        doc.append_child(body, host).unwrap();
        if let Some((w, h)) = container {
            doc.set_measured_size(host, w, h);
        }
        let svg = doc
            .parse_fragment(r#"<svg viewBox="0 0 200 100"><g id="graph0"><rect/></g></svg>"#)
            .unwrap();
        doc.append_child(host, svg).unwrap();
        (doc.into_shared(), host, svg)
    }

    fn transform(doc: &SharedDocument, svg: NodeId) -> String {
        let d = doc.borrow();
        let group = d.children(svg)[0];
        d.attribute(group, "transform").unwrap_or_default().to_string()
    }

    #[test]
    fn attach_wraps_content_and_fits_container() {
        let (doc, _, svg) = mounted_surface(Some((400.0, 400.0)));
        let handle = ViewportPanZoom.attach(&doc, svg, &PanZoomOptions::default()).unwrap();

        {
            let d = doc.borrow();
            let group = d.children(svg)[0];
            assert_eq!(d.attribute(group, "class"), Some(VIEWPORT_CLASS));
            assert_eq!(d.attribute(d.children(group)[0], "id"), Some("graph0"));
            assert_eq!(d.attribute(svg, "viewBox"), None);
            assert_eq!(d.attribute(d.children(svg)[1], "id"), Some(CONTROLS_ID));
        }
        // 200x100 into 400x400: scale 2, centered vertically.
        assert_eq!(transform(&doc, svg), "matrix(2,0,0,2,0,100)");
        assert_eq!(handle.zoom(), 1.0);
    }

    #[test]
    fn attach_to_released_surface_fails() {
        let (doc, _, svg) = mounted_surface(None);
        doc.borrow_mut().release(svg);
        let result = ViewportPanZoom.attach(&doc, svg, &PanZoomOptions::default());
        assert!(matches!(result, Err(Error::DetachedNode(node)) if node == svg));
        assert!(doc.borrow().element_by_id(CONTROLS_ID).is_none());
    }

    #[test]
    fn zoom_is_clamped_and_reset_restores_fit() {
        let (doc, _, svg) = mounted_surface(None);
        let options = PanZoomOptions {
            max_zoom: 4.0,
            ..PanZoomOptions::default()
        };
        let handle = ViewportPanZoom.attach(&doc, svg, &options).unwrap();

        handle.zoom_by(100.0);
        assert_eq!(handle.zoom(), 4.0);
        handle.zoom_by(0.001);
        assert_eq!(handle.zoom(), 0.5);

        handle.reset();
        assert_eq!(handle.zoom(), 1.0);
        assert_eq!(transform(&doc, svg), "matrix(1,0,0,1,0,0)");
    }

    #[test]
    fn contain_keeps_drawing_in_view() {
        let (doc, _, svg) = mounted_surface(None);
        let handle = ViewportPanZoom.attach(&doc, svg, &PanZoomOptions::default()).unwrap();
        handle.pan_by(-1000.0, 0.0);
        assert_eq!(transform(&doc, svg), "matrix(1,0,0,1,0,0)");

        handle.zoom_by(2.0);
        handle.pan_by(-1000.0, -1000.0);
        // Zoomed 2x: the drawing may scroll until its far edge meets the viewport.
        assert_eq!(transform(&doc, svg), "matrix(2,0,0,2,-200,-100)");
    }

    #[test]
    fn resize_refits_to_new_container() {
        let (doc, host, svg) = mounted_surface(Some((200.0, 100.0)));
        let handle = ViewportPanZoom.attach(&doc, svg, &PanZoomOptions::default()).unwrap();
        assert_eq!(transform(&doc, svg), "matrix(1,0,0,1,0,0)");

        doc.borrow_mut().set_measured_size(host, 100.0, 50.0);
        handle.resize();
        assert_eq!(transform(&doc, svg), "matrix(0.5,0,0,0.5,0,0)");
    }

    #[test]
    fn controls_zoom_and_destroy_removes_them() {
        let (doc, _, svg) = mounted_surface(None);
        let handle = ViewportPanZoom.attach(&doc, svg, &PanZoomOptions::default()).unwrap();
        let zoom_in = doc.borrow().element_by_id("svg-pan-zoom-zoom-in").unwrap();
        let reset = doc.borrow().element_by_id("svg-pan-zoom-reset-pan-zoom").unwrap();

        let event = dispatch(&doc, DomEvent::new(EventKind::Click, EventTarget::Node(zoom_in)));
        assert!(event.default_prevented());
        assert!((handle.zoom() - 1.2).abs() < 1e-6);

        dispatch(&doc, DomEvent::new(EventKind::Click, EventTarget::Node(reset)));
        assert_eq!(handle.zoom(), 1.0);

        handle.destroy();
        assert!(doc.borrow().element_by_id(CONTROLS_ID).is_none());
        handle.zoom_by(2.0);
        assert_eq!(handle.zoom(), 1.0);
    }
}
