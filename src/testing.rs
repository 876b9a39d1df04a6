//! Test doubles shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;

use crate::diagram::{PanZoomBackend, PanZoomHandle, PanZoomOptions};
use crate::dom::{NodeId, SharedDocument};
use crate::engine::{EngineFuture, EngineOptions, RenderEngine, RenderRequest};
use crate::error::EngineError;
use crate::xml::escape_text;

/// A surface whose text content is `label`.
pub fn svg_for(label: &str) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 120 60"><g class="graph"><text>{}</text></g></svg>"#,
        escape_text(label)
    )
}

/// A render the test settles by hand.
pub struct PendingRender {
    pub request: RenderRequest,
    sender: oneshot::Sender<Result<String, EngineError>>,
}

impl PendingRender {
    pub fn resolve(self, svg: impl Into<String>) {
        let _ = self.sender.send(Ok(svg.into()));
    }

    /// Resolves with [`svg_for`] of the request's description.
    pub fn resolve_echo(self) {
        let svg = svg_for(&self.request.description);
        self.resolve(svg);
    }

    pub fn reject(self, message: &str) {
        let _ = self.sender.send(Err(EngineError::Rejected(message.to_string())));
    }
}

/// Engine whose renders stay pending until the test resolves them.
#[derive(Default)]
pub struct ManualEngine {
    pending: RefCell<VecDeque<PendingRender>>,
    configured: RefCell<Vec<EngineOptions>>,
}

impl ManualEngine {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Oldest unsettled render.
    pub fn next(&self) -> Option<PendingRender> {
        self.pending.borrow_mut().pop_front()
    }

    pub fn take_all(&self) -> Vec<PendingRender> {
        self.pending.borrow_mut().drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn configured(&self) -> Vec<EngineOptions> {
        self.configured.borrow().clone()
    }
}

impl RenderEngine for ManualEngine {
    fn configure(&self, options: &EngineOptions) {
        self.configured.borrow_mut().push(options.clone());
    }

    fn render(&self, request: RenderRequest) -> EngineFuture {
        let (sender, receiver) = oneshot::channel();
        self.pending
            .borrow_mut()
            .push_back(PendingRender { request, sender });
        async move { receiver.await.unwrap_or(Err(EngineError::Canceled)) }.boxed_local()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanZoomCall {
    Attach(NodeId),
    Resize(NodeId),
    Destroy(NodeId),
}

/// Pan/zoom backend that only records what it is asked to do.
#[derive(Default)]
pub struct RecordingPanZoom {
    pub calls: Rc<RefCell<Vec<PanZoomCall>>>,
}

impl RecordingPanZoom {
    pub fn calls(&self) -> Vec<PanZoomCall> {
        self.calls.borrow().clone()
    }
}

struct RecordingHandle {
    surface: NodeId,
    calls: Rc<RefCell<Vec<PanZoomCall>>>,
    zoom: Cell<f32>,
    destroyed: Cell<bool>,
}

impl PanZoomHandle for RecordingHandle {
    fn resize(&self) {
        if !self.destroyed.get() {
            self.calls.borrow_mut().push(PanZoomCall::Resize(self.surface));
        }
    }

    fn zoom(&self) -> f32 {
        self.zoom.get()
    }

    fn zoom_by(&self, factor: f32) {
        self.zoom.set(self.zoom.get() * factor);
    }

    fn pan_by(&self, _dx: f32, _dy: f32) {}

    fn reset(&self) {
        self.zoom.set(1.0);
    }

    fn destroy(&self) {
        if !self.destroyed.replace(true) {
            self.calls.borrow_mut().push(PanZoomCall::Destroy(self.surface));
        }
    }
}

impl PanZoomBackend for RecordingPanZoom {
    fn attach(
        &self,
        _doc: &SharedDocument,
        surface: NodeId,
        _options: &PanZoomOptions,
    ) -> crate::error::Result<Box<dyn PanZoomHandle>> {
        self.calls.borrow_mut().push(PanZoomCall::Attach(surface));
        Ok(Box::new(RecordingHandle {
            surface,
            calls: Rc::clone(&self.calls),
            zoom: Cell::new(1.0),
            destroyed: Cell::new(false),
        }))
    }
}
