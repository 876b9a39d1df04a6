//! Diagram render lifecycle.
//!
//! A [`DiagramHook`] owns one container element. Each render issues a new
//! sequence token before the engine is called; a result is committed only if
//! its token is still the latest, so completions may arrive in any order.

mod links;
mod panzoom;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::{LocalSpawn, LocalSpawnExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::channel::{InteractionChannel, RenderFailed};
use crate::dom::{
    Document, EventKind, EventTarget, ListenerId, ListenerOptions, NodeId, SharedDocument,
};
use crate::engine::{RenderEngine, RenderRequest};
use crate::error::{EngineError, Error, Result};
use crate::hook::{HookFuture, LifecycleHook};
use crate::theme::{Subscription, Theme, ThemeBridge};

pub use links::{LinkBinding, map_links};
pub use panzoom::{
    CONTROLS_ID, PanZoomBackend, PanZoomHandle, PanZoomOptions, VIEWPORT_CLASS, ViewportPanZoom,
};

/// Container attribute holding the graph description.
pub const GRAPH_ATTRIBUTE: &str = "data-graph";
/// Optional container attribute overriding the sizing policy.
pub const SIZING_ATTRIBUTE: &str = "data-sizing";
/// Outbound event for failures of re-renders nobody awaits.
pub const ERROR_EVENT: &str = "diagram:error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramGrammar {
    Mermaid,
    Graphviz,
}

impl DiagramGrammar {
    /// Id handed to the engine for a container.
    pub fn render_id(self, container_id: &str) -> String {
        match self {
            DiagramGrammar::Mermaid => format!("{container_id}_content"),
            DiagramGrammar::Graphviz => container_id.to_string(),
        }
    }

    /// Grammar-specific rewriting of a description before it is rendered.
    pub fn prepare(self, description: &str, container_id: &str) -> String {
        match self {
            DiagramGrammar::Mermaid => description.to_string(),
            DiagramGrammar::Graphviz => tag_emit_calls(description, container_id),
        }
    }

    /// Whether output depends on the page theme.
    pub fn follows_theme(self) -> bool {
        matches!(self, DiagramGrammar::Mermaid)
    }
}

impl fmt::Display for DiagramGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagramGrammar::Mermaid => "mermaid",
            DiagramGrammar::Graphviz => "graphviz",
        })
    }
}

impl FromStr for DiagramGrammar {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mermaid" | "mmd" => Ok(DiagramGrammar::Mermaid),
            "graphviz" | "dot" | "gv" | "viz" => Ok(DiagramGrammar::Graphviz),
            other => Err(format!(
                "Unknown grammar '{}'. Available: mermaid, graphviz",
                other
            )),
        }
    }
}

/// Prefixes every `emit(` callback with the quoted container id so link
/// handlers can tell diagrams on one page apart.
pub fn tag_emit_calls(description: &str, container_id: &str) -> String {
    let quoted = container_id.replace('\\', "\\\\").replace('"', "\\\"");
    description.replace("emit(", &format!("emit(\"{quoted}\", "))
}

/// How a rendered surface is sized inside its container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingPolicy {
    /// Fill the container, cropping to keep the aspect ratio.
    #[default]
    Responsive,
    /// Use the container size captured at mount.
    Measured,
}

impl SizingPolicy {
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value.trim() {
            "responsive" => Some(SizingPolicy::Responsive),
            "measured" => Some(SizingPolicy::Measured),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramConfig {
    #[serde(default)]
    pub sizing: SizingPolicy,
    /// Outbound event name for link clicks.
    #[serde(default = "default_link_event")]
    pub link_event: String,
    #[serde(default = "default_tooltip_prefix")]
    pub tooltip_prefix: String,
    /// Turn diagram links into tooltip triggers.
    #[serde(default = "default_bind_link_tooltips")]
    pub bind_link_tooltips: bool,
}

fn default_link_event() -> String {
    "viz:click".to_string()
}
fn default_tooltip_prefix() -> String {
    "tooltip-".to_string()
}
fn default_bind_link_tooltips() -> bool {
    true
}

impl Default for DiagramConfig {
    fn default() -> Self {
        DiagramConfig {
            sizing: SizingPolicy::default(),
            link_event: default_link_event(),
            tooltip_prefix: default_tooltip_prefix(),
            bind_link_tooltips: default_bind_link_tooltips(),
        }
    }
}

/// Per-instance settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramOptions {
    pub grammar: DiagramGrammar,
    /// Used unless the container carries `data-sizing`.
    pub sizing: SizingPolicy,
    pub pan_zoom: PanZoomOptions,
    pub link_event: String,
    pub tooltip_prefix: Option<String>,
}

impl DiagramOptions {
    pub fn new(grammar: DiagramGrammar, config: &DiagramConfig, pan_zoom: &PanZoomOptions) -> Self {
        Self {
            grammar,
            sizing: config.sizing,
            pan_zoom: pan_zoom.clone(),
            link_event: config.link_event.clone(),
            tooltip_prefix: config
                .bind_link_tooltips
                .then(|| config.tooltip_prefix.clone()),
        }
    }
}

/// Collaborators shared by the diagrams of a page.
#[derive(Clone)]
pub struct DiagramServices {
    pub engine: Rc<dyn RenderEngine>,
    pub pan_zoom: Rc<dyn PanZoomBackend>,
    pub channel: InteractionChannel,
    /// Runs re-renders triggered by theme changes.
    pub spawner: Rc<dyn LocalSpawn>,
    pub theme: Option<ThemeBridge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The result became the visible surface.
    Committed { token: u64 },
    /// A newer render was issued before this one finished; its result was
    /// dropped.
    Superseded { token: u64 },
    /// The instance was not mounted or was destroyed.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Unmounted,
    Mounting,
    Rendering,
    Rendered,
    Destroyed,
}

struct RenderState {
    phase: RenderPhase,
    container_id: Option<String>,
    description: String,
    sizing: SizingPolicy,
    last_token: u64,
    committed_token: Option<u64>,
    surface: Option<NodeId>,
    pan_zoom: Option<Box<dyn PanZoomHandle>>,
    container_size: Option<(f32, f32)>,
    links: Vec<String>,
}

struct DiagramShared {
    element: NodeId,
    doc: Weak<RefCell<Document>>,
    services: DiagramServices,
    options: DiagramOptions,
    state: RefCell<RenderState>,
    subscription: RefCell<Option<Subscription>>,
    resize_listener: Cell<Option<ListenerId>>,
}

/// One diagram instance bound to a container element.
///
/// Clones are handles to the same instance.
#[derive(Clone)]
pub struct DiagramHook {
    shared: Rc<DiagramShared>,
}

fn settled(result: Result<RenderOutcome>) -> LocalBoxFuture<'static, Result<RenderOutcome>> {
    future::ready(result).boxed_local()
}

fn apply_sizing(
    doc: &mut Document,
    surface: NodeId,
    sizing: SizingPolicy,
    container: Option<(f32, f32)>,
) {
    match (sizing, container) {
        (SizingPolicy::Measured, Some((width, height))) => {
            doc.set_attribute(surface, "width", format!("{width}"));
            doc.set_attribute(surface, "height", format!("{height}"));
        }
        (policy, _) => {
            if policy == SizingPolicy::Measured {
                debug!("no measured container size, falling back to responsive sizing");
            }
            doc.set_attribute(surface, "preserveAspectRatio", "xMidYMid slice");
            doc.set_attribute(surface, "width", "100%");
            doc.set_attribute(surface, "height", "100%");
        }
    }
    doc.set_attribute(surface, "style", "");
}

impl DiagramHook {
    pub fn new(
        element: NodeId,
        doc: &SharedDocument,
        services: DiagramServices,
        options: DiagramOptions,
    ) -> Self {
        Self {
            shared: Rc::new(DiagramShared {
                element,
                doc: Rc::downgrade(doc),
                state: RefCell::new(RenderState {
                    phase: RenderPhase::Unmounted,
                    container_id: None,
                    description: String::new(),
                    sizing: options.sizing,
                    last_token: 0,
                    committed_token: None,
                    surface: None,
                    pan_zoom: None,
                    container_size: None,
                    links: Vec::new(),
                }),
                services,
                options,
                subscription: RefCell::new(None),
                resize_listener: Cell::new(None),
            }),
        }
    }

    pub fn element(&self) -> NodeId {
        self.shared.element
    }

    pub fn grammar(&self) -> DiagramGrammar {
        self.shared.options.grammar
    }

    pub fn phase(&self) -> RenderPhase {
        self.shared.state.borrow().phase
    }

    /// The committed surface, if any.
    pub fn surface(&self) -> Option<NodeId> {
        self.shared.state.borrow().surface
    }

    /// Latest issued token. Zero before the first render.
    pub fn last_token(&self) -> u64 {
        self.shared.state.borrow().last_token
    }

    pub fn committed_token(&self) -> Option<u64> {
        self.shared.state.borrow().committed_token
    }

    pub fn description(&self) -> String {
        self.shared.state.borrow().description.clone()
    }

    pub fn sizing(&self) -> SizingPolicy {
        self.shared.state.borrow().sizing
    }

    /// Container size captured at mount.
    pub fn container_size(&self) -> Option<(f32, f32)> {
        self.shared.state.borrow().container_size
    }

    /// Fragment ids of the links mapped on the committed surface.
    pub fn link_ids(&self) -> Vec<String> {
        self.shared.state.borrow().links.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared
            .subscription
            .borrow()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Runs `f` against the pan/zoom handle of the committed surface.
    pub fn with_pan_zoom<R>(&self, f: impl FnOnce(&dyn PanZoomHandle) -> R) -> Option<R> {
        let state = self.shared.state.borrow();
        state.pan_zoom.as_deref().map(f)
    }

    /// Reads the container, hooks up resize forwarding and theme changes,
    /// then renders. The render is issued before this returns.
    pub fn mount(&self) -> LocalBoxFuture<'static, Result<RenderOutcome>> {
        if let Err(err) = self.shared.prepare_mount() {
            return settled(Err(err));
        }
        self.render()
    }

    /// Re-reads the description and renders it. Any render still in flight
    /// will be superseded.
    pub fn update(&self) -> LocalBoxFuture<'static, Result<RenderOutcome>> {
        let refreshed = match self.phase() {
            RenderPhase::Destroyed => Ok(()),
            RenderPhase::Unmounted => self.shared.prepare_mount(),
            _ => self.shared.refresh_description(),
        };
        if let Err(err) = refreshed {
            return settled(Err(err));
        }
        self.render()
    }

    /// Issues a render of the current description.
    pub fn render(&self) -> LocalBoxFuture<'static, Result<RenderOutcome>> {
        let shared = Rc::clone(&self.shared);
        match shared.issue() {
            Ok(Some((token, pending))) => async move {
                let result = pending.await;
                shared.complete(token, result)
            }
            .boxed_local(),
            Ok(None) => settled(Ok(RenderOutcome::Skipped)),
            Err(err) => settled(Err(err)),
        }
    }

    /// Releases the surface, the pan/zoom handle, the resize listener and the
    /// theme subscription. Terminal.
    pub fn destroy(&self) {
        self.shared.teardown();
    }
}

impl DiagramShared {
    fn read_container(&self, doc: &Document) -> Result<(String, String)> {
        if doc.is_released(self.element) {
            return Err(Error::DetachedNode(self.element));
        }
        let id = doc
            .attribute(self.element, "id")
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingContainerId)?;
        let description = doc
            .attribute(self.element, GRAPH_ATTRIBUTE)
            .ok_or_else(|| Error::MissingDescription(id.to_string()))?;
        Ok((id.to_string(), description.to_string()))
    }

    fn prepare_mount(self: &Rc<Self>) -> Result<()> {
        let doc = self.doc.upgrade().ok_or(Error::DocumentDropped)?;
        {
            let d = doc.borrow();
            let (id, description) = self.read_container(&d)?;
            let sizing = d
                .attribute(self.element, SIZING_ATTRIBUTE)
                .and_then(SizingPolicy::from_attribute)
                .unwrap_or(self.options.sizing);

            let mut state = self.state.borrow_mut();
            if state.phase != RenderPhase::Unmounted {
                return Ok(());
            }
            debug!(%id, grammar = %self.options.grammar, ?sizing, "mounting diagram");
            state.container_id = Some(id);
            state.description = description;
            state.sizing = sizing;
            state.container_size = d.measured_size(self.element);
            state.phase = RenderPhase::Mounting;
        }

        let weak = Rc::downgrade(self);
        let listener = doc.borrow_mut().add_listener(
            EventTarget::Window,
            EventKind::Resize,
            ListenerOptions::default().passive(),
            move |_| {
                if let Some(shared) = weak.upgrade() {
                    shared.forward_resize();
                }
            },
        );
        self.resize_listener.set(Some(listener));

        if let Some(bridge) = &self.services.theme
            && self.options.grammar.follows_theme()
        {
            let weak = Rc::downgrade(self);
            let subscription = bridge.subscribe(move |theme| {
                if let Some(shared) = weak.upgrade() {
                    shared.rerender_for_theme(theme);
                }
            });
            *self.subscription.borrow_mut() = Some(subscription);
        }
        Ok(())
    }

    fn refresh_description(&self) -> Result<()> {
        let doc = self.doc.upgrade().ok_or(Error::DocumentDropped)?;
        let (id, description) = self.read_container(&doc.borrow())?;
        let mut state = self.state.borrow_mut();
        state.container_id = Some(id);
        state.description = description;
        Ok(())
    }

    fn current_theme(&self) -> Option<Theme> {
        self.options.grammar.follows_theme().then(|| {
            self.services
                .theme
                .as_ref()
                .map(ThemeBridge::current_theme)
                .unwrap_or_default()
        })
    }

    /// Issues the next token and starts the engine.
    fn issue(&self) -> Result<Option<(u64, crate::engine::EngineFuture)>> {
        let (token, request) = {
            let mut state = self.state.borrow_mut();
            if matches!(state.phase, RenderPhase::Unmounted | RenderPhase::Destroyed) {
                return Ok(None);
            }
            let id = state.container_id.clone().ok_or(Error::MissingContainerId)?;
            let grammar = self.options.grammar;
            let request = RenderRequest {
                render_id: grammar.render_id(&id),
                description: grammar.prepare(&state.description, &id),
                theme: self.current_theme(),
            };
            state.last_token += 1;
            state.phase = RenderPhase::Rendering;
            (state.last_token, request)
        };
        debug!(id = %request.render_id, token, "render issued");
        Ok(Some((token, self.services.engine.render(request))))
    }

    fn container_label(&self) -> String {
        self.state
            .borrow()
            .container_id
            .clone()
            .unwrap_or_default()
    }

    fn complete(
        &self,
        token: u64,
        result: std::result::Result<String, EngineError>,
    ) -> Result<RenderOutcome> {
        {
            let state = self.state.borrow();
            if state.phase == RenderPhase::Destroyed {
                return Ok(RenderOutcome::Skipped);
            }
            if token != state.last_token {
                debug!(
                    token,
                    latest = state.last_token,
                    failed = result.is_err(),
                    "discarding stale render"
                );
                return Ok(RenderOutcome::Superseded { token });
            }
        }

        let outcome = result
            .map_err(|source| Error::Render {
                element: self.container_label(),
                source,
            })
            .and_then(|svg| self.commit(token, &svg));

        if let Err(err) = &outcome {
            let mut state = self.state.borrow_mut();
            state.phase = if state.surface.is_some() {
                RenderPhase::Rendered
            } else {
                RenderPhase::Mounting
            };
            warn!(token, error = %err, "render failed, keeping previous surface");
        }
        outcome
    }

    fn commit(&self, token: u64, svg: &str) -> Result<RenderOutcome> {
        let doc = self.doc.upgrade().ok_or(Error::DocumentDropped)?;
        let (sizing, container_size) = {
            let state = self.state.borrow();
            (state.sizing, state.container_size)
        };
        let binding = LinkBinding {
            channel: self.services.channel.clone(),
            event: self.options.link_event.clone(),
            tooltip_prefix: self.options.tooltip_prefix.clone(),
        };

        let (surface, links) = {
            let mut d = doc.borrow_mut();
            let surface = d.parse_fragment(svg)?;
            if d.local_name(surface) != Some("svg") {
                let found = d.tag_name(surface).unwrap_or_default().to_string();
                d.release(surface);
                return Err(Error::Surface(format!("expected an <svg> root, found <{found}>")));
            }
            apply_sizing(&mut d, surface, sizing, container_size);
            let links = map_links(&mut d, surface, &binding);
            if let Err(err) = d.append_child(self.element, surface) {
                d.release(surface);
                return Err(err);
            }
            (surface, links)
        };

        let handle = match self
            .services
            .pan_zoom
            .attach(&doc, surface, &self.options.pan_zoom)
        {
            Ok(handle) => handle,
            Err(err) => {
                doc.borrow_mut().release(surface);
                return Err(err);
            }
        };

        let (previous, previous_handle) = {
            let mut state = self.state.borrow_mut();
            (state.surface.take(), state.pan_zoom.take())
        };
        if let Some(handle) = previous_handle {
            handle.destroy();
        }
        if let Some(previous) = previous {
            doc.borrow_mut().release(previous);
        }

        let mut state = self.state.borrow_mut();
        state.surface = Some(surface);
        state.pan_zoom = Some(handle);
        state.committed_token = Some(token);
        state.phase = RenderPhase::Rendered;
        debug!(token, links = links.len(), "render committed");
        state.links = links;
        Ok(RenderOutcome::Committed { token })
    }

    fn forward_resize(&self) {
        let state = self.state.borrow();
        if let Some(handle) = &state.pan_zoom {
            handle.resize();
        }
    }

    fn rerender_for_theme(self: &Rc<Self>, theme: Theme) {
        trace!(%theme, "theme changed, re-rendering");
        let render = DiagramHook {
            shared: Rc::clone(self),
        }
        .render();
        let channel = self.services.channel.clone();
        let id = self.container_label();
        let task = async move {
            if let Err(err) = render.await {
                error!(%id, error = %err, "theme re-render failed");
                channel.emit(
                    ERROR_EVENT,
                    RenderFailed {
                        id,
                        message: err.to_string(),
                    },
                );
            }
        };
        if let Err(err) = self.services.spawner.spawn_local(task) {
            error!(error = %err, "could not schedule theme re-render");
        }
    }

    fn teardown(&self) {
        let (surface, handle) = {
            let mut state = self.state.borrow_mut();
            if state.phase == RenderPhase::Destroyed {
                return;
            }
            state.phase = RenderPhase::Destroyed;
            state.links.clear();
            (state.surface.take(), state.pan_zoom.take())
        };
        if let Some(subscription) = self.subscription.borrow_mut().take() {
            subscription.unsubscribe();
        }
        if let Some(handle) = handle {
            handle.destroy();
        }
        if let Some(doc) = self.doc.upgrade() {
            let mut d = doc.borrow_mut();
            if let Some(listener) = self.resize_listener.take() {
                d.remove_listener(listener);
            }
            if let Some(surface) = surface {
                d.release(surface);
            }
        }
        debug!(element = ?self.element, "diagram destroyed");
    }
}

impl LifecycleHook for DiagramHook {
    fn on_mount(&mut self) -> HookFuture {
        let render = self.mount();
        async move { render.await.map(|_| ()) }.boxed_local()
    }

    fn on_update(&mut self) -> HookFuture {
        let render = self.update();
        async move { render.await.map(|_| ()) }.boxed_local()
    }

    fn on_destroy(&mut self) {
        self.destroy();
    }
}
