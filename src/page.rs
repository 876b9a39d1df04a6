//! Composition root: one document, its hooks and their shared services.

use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::channel::mpsc::UnboundedReceiver;
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::LocalSpawn;
use tracing::{debug, info};

use crate::channel::{InteractionChannel, OutboundEvent, interaction_channel};
use crate::config::Config;
use crate::diagram::{
    DiagramGrammar, DiagramHook, DiagramOptions, DiagramServices, PanZoomBackend, ViewportPanZoom,
};
use crate::dom::{
    Document, DomEvent, EventKind, EventTarget, NodeId, PointerTracker, SharedDocument, dispatch,
};
use crate::engine::{CachingEngine, CommandEngine, RenderEngine};
use crate::error::{Error, Result};
use crate::flash::FlashHook;
use crate::hook::{HOOK_ATTRIBUTE, HookFuture, HookKind, LifecycleHook, ready};
use crate::theme::{MemoryStore, PreferenceStore, ThemeBridge, ThemeToggleHook};
use crate::timer::{ManualScheduler, Scheduler};
use crate::tooltip::{HoverDispatcher, TooltipHook, TooltipRegistry};

/// Builds a [`Page`] from a config and injected collaborators.
///
/// Missing engines default to external commands from `config.commands`
/// behind an LRU cache; the pan/zoom backend defaults to
/// [`ViewportPanZoom`] and the store to an in-memory one. A spawner is
/// required.
pub struct PageBuilder {
    config: Config,
    document: Option<Document>,
    mermaid: Option<Rc<dyn RenderEngine>>,
    graphviz: Option<Rc<dyn RenderEngine>>,
    pan_zoom: Option<Rc<dyn PanZoomBackend>>,
    store: Option<Rc<dyn PreferenceStore>>,
    spawner: Option<Rc<dyn LocalSpawn>>,
    system_prefers_dark: bool,
}

impl PageBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            document: None,
            mermaid: None,
            graphviz: None,
            pan_zoom: None,
            store: None,
            spawner: None,
            system_prefers_dark: false,
        }
    }

    pub fn document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn mermaid_engine(mut self, engine: Rc<dyn RenderEngine>) -> Self {
        self.mermaid = Some(engine);
        self
    }

    pub fn graphviz_engine(mut self, engine: Rc<dyn RenderEngine>) -> Self {
        self.graphviz = Some(engine);
        self
    }

    pub fn pan_zoom(mut self, backend: Rc<dyn PanZoomBackend>) -> Self {
        self.pan_zoom = Some(backend);
        self
    }

    pub fn store(mut self, store: Rc<dyn PreferenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn spawner(mut self, spawner: Rc<dyn LocalSpawn>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Platform color-scheme signal at page load.
    pub fn system_prefers_dark(mut self, dark: bool) -> Self {
        self.system_prefers_dark = dark;
        self
    }

    pub fn build(self) -> Result<(Page, UnboundedReceiver<OutboundEvent>)> {
        let spawner = self
            .spawner
            .ok_or_else(|| Error::Config("a local spawner is required".to_string()))?;
        let mermaid: Rc<dyn RenderEngine> = match self.mermaid {
            Some(engine) => engine,
            None => Rc::new(CachingEngine::new(CommandEngine::mermaid(&self.config.commands)?)),
        };
        let graphviz: Rc<dyn RenderEngine> = match self.graphviz {
            Some(engine) => engine,
            None => Rc::new(CachingEngine::new(CommandEngine::graphviz(&self.config.commands)?)),
        };
        mermaid.configure(&self.config.engine);
        graphviz.configure(&self.config.engine);

        let doc = self.document.unwrap_or_default().into_shared();
        let store = self
            .store
            .unwrap_or_else(|| Rc::new(MemoryStore::default()));
        let bridge = ThemeBridge::new(&doc, store, self.config.theme.clone());
        bridge.set_system_prefers_dark(self.system_prefers_dark);

        let registry = TooltipRegistry::new();
        let dispatcher = HoverDispatcher::new(&doc, registry.clone(), &self.config.tooltip);
        let (channel, events) = interaction_channel();

        let page = Page {
            doc,
            registry,
            dispatcher,
            bridge,
            channel,
            scheduler: Rc::new(ManualScheduler::default()),
            mermaid,
            graphviz,
            pan_zoom: self.pan_zoom.unwrap_or_else(|| Rc::new(ViewportPanZoom)),
            spawner,
            config: self.config,
            pointer: PointerTracker::default(),
            hooks: HashMap::new(),
            diagrams: HashMap::new(),
        };
        Ok((page, events))
    }
}

/// A host page with its mounted hooks.
pub struct Page {
    doc: SharedDocument,
    registry: TooltipRegistry,
    dispatcher: HoverDispatcher,
    bridge: ThemeBridge,
    channel: InteractionChannel,
    scheduler: Rc<ManualScheduler>,
    mermaid: Rc<dyn RenderEngine>,
    graphviz: Rc<dyn RenderEngine>,
    pan_zoom: Rc<dyn PanZoomBackend>,
    spawner: Rc<dyn LocalSpawn>,
    config: Config,
    pointer: PointerTracker,
    hooks: HashMap<NodeId, Box<dyn LifecycleHook>>,
    diagrams: HashMap<NodeId, DiagramHook>,
}

impl Page {
    pub fn document(&self) -> &SharedDocument {
        &self.doc
    }

    pub fn registry(&self) -> &TooltipRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &HoverDispatcher {
        &self.dispatcher
    }

    pub fn bridge(&self) -> &ThemeBridge {
        &self.bridge
    }

    pub fn channel(&self) -> &InteractionChannel {
        &self.channel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &ManualScheduler {
        &self.scheduler
    }

    pub fn is_mounted(&self, node: NodeId) -> bool {
        self.hooks.contains_key(&node)
    }

    pub fn mounted_count(&self) -> usize {
        self.hooks.len()
    }

    /// The diagram instance mounted on `node`, if any.
    pub fn diagram(&self, node: NodeId) -> Option<&DiagramHook> {
        self.diagrams.get(&node)
    }

    fn diagram_services(&self, grammar: DiagramGrammar) -> DiagramServices {
        let engine = match grammar {
            DiagramGrammar::Mermaid => Rc::clone(&self.mermaid),
            DiagramGrammar::Graphviz => Rc::clone(&self.graphviz),
        };
        DiagramServices {
            engine,
            pan_zoom: Rc::clone(&self.pan_zoom),
            channel: self.channel.clone(),
            spawner: Rc::clone(&self.spawner),
            theme: Some(self.bridge.clone()),
        }
    }

    fn create_hook(&mut self, node: NodeId, kind: HookKind) -> Box<dyn LifecycleHook> {
        let weak_doc = Rc::downgrade(&self.doc);
        match kind {
            HookKind::Mermaid | HookKind::Viz => {
                let grammar = if kind == HookKind::Mermaid {
                    DiagramGrammar::Mermaid
                } else {
                    DiagramGrammar::Graphviz
                };
                let options =
                    DiagramOptions::new(grammar, &self.config.diagram, &self.config.pan_zoom);
                let hook =
                    DiagramHook::new(node, &self.doc, self.diagram_services(grammar), options);
                self.diagrams.insert(node, hook.clone());
                Box::new(hook)
            }
            HookKind::Tooltip => Box::new(TooltipHook::new(
                node,
                weak_doc,
                self.registry.clone(),
                self.dispatcher.clone(),
                self.config.tooltip.default_mode,
            )),
            HookKind::ThemeToggle => Box::new(ThemeToggleHook::new(
                node,
                weak_doc,
                self.bridge.clone(),
                self.channel.clone(),
            )),
            HookKind::Flash => {
                let scheduler: Rc<dyn Scheduler> = self.scheduler.clone();
                let scheduler: Weak<dyn Scheduler> = Rc::downgrade(&scheduler);
                Box::new(FlashHook::new(
                    node,
                    weak_doc,
                    scheduler,
                    self.config.flash.clone(),
                ))
            }
        }
    }

    /// Mounts the hook named by the element's `data-hook` attribute. An
    /// element that is already mounted gets an update instead.
    pub fn mount(&mut self, node: NodeId) -> HookFuture {
        if self.hooks.contains_key(&node) {
            return self.update(node);
        }
        let name = match self.doc.borrow().attribute(node, HOOK_ATTRIBUTE) {
            Some(name) => name.to_string(),
            None => return ready(Err(Error::UnknownHook(String::new()))),
        };
        let kind = match name.parse::<HookKind>() {
            Ok(kind) => kind,
            Err(err) => return ready(Err(err)),
        };
        debug!(?node, %kind, "mounting hook");
        let mut hook = self.create_hook(node, kind);
        let mounted = hook.on_mount();
        self.hooks.insert(node, hook);
        mounted
    }

    /// Mounts every element carrying `data-hook`, in document order.
    ///
    /// Every mount is started before the first one is awaited; the future
    /// settles once all have, with the first error if any failed.
    pub fn mount_all(&mut self) -> LocalBoxFuture<'static, Result<()>> {
        let nodes: Vec<NodeId> = {
            let doc = self.doc.borrow();
            doc.descendants(doc.root())
                .into_iter()
                .filter(|&node| doc.has_attribute(node, HOOK_ATTRIBUTE))
                .collect()
        };
        info!(count = nodes.len(), "mounting page hooks");
        let mounts: Vec<HookFuture> = nodes.into_iter().map(|node| self.mount(node)).collect();
        async move {
            future::join_all(mounts)
                .await
                .into_iter()
                .collect::<Result<Vec<()>>>()
                .map(|_| ())
        }
        .boxed_local()
    }

    pub fn update(&mut self, node: NodeId) -> HookFuture {
        match self.hooks.get_mut(&node) {
            Some(hook) => hook.on_update(),
            None => ready(Err(Error::NotMounted(node))),
        }
    }

    /// Destroys the hook on `node`. Terminal: the node can be mounted again
    /// only as a fresh instance.
    pub fn destroy(&mut self, node: NodeId) -> Result<()> {
        let mut hook = self.hooks.remove(&node).ok_or(Error::NotMounted(node))?;
        self.diagrams.remove(&node);
        hook.on_destroy();
        debug!(?node, "hook destroyed");
        Ok(())
    }

    /// Destroys every mounted hook.
    pub fn destroy_all(&mut self) {
        for (_, mut hook) in self.hooks.drain() {
            hook.on_destroy();
        }
        self.diagrams.clear();
    }

    /// Moves the pointer onto `target` (or off the page), firing enter,
    /// leave and move events.
    pub fn pointer_move(&mut self, target: Option<NodeId>, x: f32, y: f32) {
        self.pointer.move_to(&self.doc, target, x, y);
    }

    /// Clicks `node`. Returns the href the click would navigate to, or
    /// `None` when there is no link or a listener prevented the default.
    pub fn click(&self, node: NodeId) -> Option<String> {
        let event = dispatch(
            &self.doc,
            DomEvent::new(EventKind::Click, EventTarget::Node(node)),
        );
        if event.default_prevented() {
            return None;
        }
        let doc = self.doc.borrow();
        doc.ancestors(node)
            .find(|&n| doc.local_name(n) == Some("a"))
            .and_then(|anchor| {
                doc.attribute(anchor, "href")
                    .or_else(|| doc.attribute(anchor, "xlink:href"))
            })
            .map(str::to_string)
    }

    /// Records the new viewport size on the root element and fires a window
    /// resize.
    pub fn resize_viewport(&mut self, width: f32, height: f32) {
        {
            let mut doc = self.doc.borrow_mut();
            let root = doc.document_element();
            doc.set_measured_size(root, width, height);
        }
        dispatch(&self.doc, DomEvent::new(EventKind::Resize, EventTarget::Window));
    }

    pub fn set_system_prefers_dark(&self, dark: bool) {
        self.bridge.set_system_prefers_dark(dark);
    }

    /// Advances the page clock, returning how many timers fired.
    pub fn advance(&self, by: Duration) -> usize {
        self.scheduler.advance(by)
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
