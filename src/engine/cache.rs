use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use super::{EngineFuture, EngineOptions, RenderEngine, RenderRequest};

const DEFAULT_CAPACITY: usize = 64;

/// Memoizes successful renders of an inner engine.
///
/// Reconfiguring clears the cache since options change the output.
pub struct CachingEngine<E> {
    inner: E,
    cache: Arc<Mutex<LruCache<RenderRequest, String>>>,
}

impl<E: RenderEngine> CachingEngine<E> {
    pub fn new(inner: E) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: E, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl<E: RenderEngine> RenderEngine for CachingEngine<E> {
    fn configure(&self, options: &EngineOptions) {
        self.cache.lock().clear();
        self.inner.configure(options);
    }

    fn render(&self, request: RenderRequest) -> EngineFuture {
        if let Some(svg) = self.cache.lock().get(&request).cloned() {
            trace!(id = %request.render_id, "render cache hit");
            return futures::future::ready(Ok(svg)).boxed_local();
        }

        let pending = self.inner.render(request.clone());
        let cache = Arc::clone(&self.cache);
        async move {
            let result = pending.await;
            if let Ok(svg) = &result {
                cache.lock().put(request, svg.clone());
            }
            result
        }
        .boxed_local()
    }
}
