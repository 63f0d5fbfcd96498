//! The module contract and the pipeline manager that drives it.
//!
//! A pipeline is an ordered stack of [`Module`]s. A `read` enters at index 0
//! (closest to the transport) and climbs toward the application; a `build`
//! enters at the top index (closest to the application) and descends toward
//! the transport. Each module only ever sees its own neighbors through the
//! continuation calls on [`ModuleHandle`] — it has no notion of the rest of
//! the stack.
//!
//! The source this is ported from gives each module a direct back-reference
//! to its owning manager plus its own index, forming a reference cycle
//! between manager and modules. Here the manager owns modules by `Arc` and
//! hands each module only a [`Weak`] handle back to itself: ownership flows
//! one way, dispatch flows both.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

/// A transformer in the pipeline stack.
///
/// `bind` is called once per attachment to a pipeline (initially, and again
/// whenever the owning manager's module list is replaced), handing the
/// module its current index and a handle for invoking continuations.
/// Implementations that run a background retransmission timer should spawn
/// it the first time `bind` runs and simply refresh their stored handle on
/// subsequent calls.
pub trait Module: Send + Sync + 'static {
    /// Attach this module to a pipeline at the position described by `handle`.
    fn bind(self: Arc<Self>, handle: ModuleHandle);

    /// Handle a frame arriving from below (the transport, or the module at
    /// `index - 1`).
    fn read(&self, data: Bytes);

    /// Handle a payload arriving from above (the application, or the module
    /// at `index + 1`).
    fn build(&self, data: Bytes);
}

/// A module's non-owning view of its position in the pipeline.
///
/// Cloning is cheap: it is a weak reference plus an index, mirroring the
/// "index within manager" data the module would otherwise carry itself.
#[derive(Clone)]
pub struct ModuleHandle {
    pipeline: Weak<PipelineInner>,
    index: usize,
}

impl ModuleHandle {
    /// This module's position in the stack (0 = closest to the transport).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Advance a read toward the application.
    pub fn continue_read(&self, data: Bytes) {
        if let Some(inner) = self.pipeline.upgrade() {
            inner.dispatch_read(data, self.index + 1);
        }
    }

    /// Advance a build toward the transport.
    pub fn continue_build(&self, data: Bytes) {
        if let Some(inner) = self.pipeline.upgrade() {
            inner.dispatch_build(data, self.index as isize - 1);
        }
    }
}

type Sink = Box<dyn Fn(Bytes) + Send + Sync>;

struct PipelineInner {
    modules: RwLock<Vec<Arc<dyn Module>>>,
    on_read_complete: RwLock<Option<Sink>>,
    on_build_complete: RwLock<Option<Sink>>,
}

impl PipelineInner {
    fn dispatch_read(&self, data: Bytes, index: usize) {
        let module = {
            let modules = self.modules.read();
            if index == modules.len() {
                None
            } else {
                Some(Arc::clone(&modules[index]))
            }
        };
        match module {
            Some(module) => module.read(data),
            None => {
                if let Some(sink) = self.on_read_complete.read().as_ref() {
                    sink(data);
                }
            }
        }
    }

    fn dispatch_build(&self, data: Bytes, index: isize) {
        if index < 0 {
            if let Some(sink) = self.on_build_complete.read().as_ref() {
                sink(data);
            }
            return;
        }
        let module = Arc::clone(&self.modules.read()[index as usize]);
        module.build(data);
    }
}

/// Owns the ordered module stack and the two terminal event sinks, and
/// drives dispatch across it. The manager performs no buffering or
/// ordering of its own — reentrancy across the application, transport, and
/// per-module timer contexts is each module's responsibility.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Build a pipeline from an ordered module list (index 0 closest to the
    /// transport). Each module is bound immediately.
    pub fn new(modules: Vec<Arc<dyn Module>>) -> Self {
        let inner = Arc::new(PipelineInner {
            modules: RwLock::new(Vec::new()),
            on_read_complete: RwLock::new(None),
            on_build_complete: RwLock::new(None),
        });
        let pipeline = Self { inner };
        pipeline.set_modules(modules);
        pipeline
    }

    /// Replace the module stack. Every module is re-stamped with its new
    /// index and a fresh handle back to this manager; the previous stack is
    /// no longer driven by `read`/`build`.
    pub fn set_modules(&self, modules: Vec<Arc<dyn Module>>) {
        for (index, module) in modules.iter().enumerate() {
            let handle = ModuleHandle {
                pipeline: Arc::downgrade(&self.inner),
                index,
            };
            Arc::clone(module).bind(handle);
        }
        *self.inner.modules.write() = modules;
    }

    /// Register the sink that receives a message once it has fully
    /// surfaced to the application. Only the most recently registered sink
    /// is kept.
    pub fn on_read_complete(&self, sink: impl Fn(Bytes) + Send + Sync + 'static) {
        *self.inner.on_read_complete.write() = Some(Box::new(sink));
    }

    /// Register the sink that receives a frame once it has been fully
    /// lowered to the transport.
    pub fn on_build_complete(&self, sink: impl Fn(Bytes) + Send + Sync + 'static) {
        *self.inner.on_build_complete.write() = Some(Box::new(sink));
    }

    /// Inject a frame from the transport, entering at index 0.
    pub fn read(&self, data: Bytes) {
        self.inner.dispatch_read(data, 0);
    }

    /// Submit a message from the application, entering at the top index.
    pub fn build(&self, data: Bytes) {
        let top = self.inner.modules.read().len() as isize - 1;
        self.inner.dispatch_build(data, top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PassThrough;
    impl Module for PassThrough {
        fn bind(self: Arc<Self>, _handle: ModuleHandle) {}
        fn read(&self, data: Bytes) {
            // no handle stored; pass-through only exercised via manager-level
            // dispatch tests below, which call modules directly via Pipeline.
            let _ = data;
        }
        fn build(&self, data: Bytes) {
            let _ = data;
        }
    }

    struct Echo {
        handle: Mutex<Option<ModuleHandle>>,
    }
    impl Module for Echo {
        fn bind(self: Arc<Self>, handle: ModuleHandle) {
            *self.handle.lock() = Some(handle);
        }
        fn read(&self, data: Bytes) {
            self.handle.lock().as_ref().unwrap().continue_read(data);
        }
        fn build(&self, data: Bytes) {
            self.handle.lock().as_ref().unwrap().continue_build(data);
        }
    }

    #[test]
    fn empty_pipeline_passes_through() {
        let pipeline = Pipeline::new(vec![]);
        let seen_read = Arc::new(Mutex::new(None));
        let seen_build = Arc::new(Mutex::new(None));
        let r = Arc::clone(&seen_read);
        let b = Arc::clone(&seen_build);
        pipeline.on_read_complete(move |d| *r.lock() = Some(d));
        pipeline.on_build_complete(move |d| *b.lock() = Some(d));

        pipeline.read(Bytes::from_static(b"up"));
        pipeline.build(Bytes::from_static(b"down"));

        assert_eq!(seen_read.lock().take(), Some(Bytes::from_static(b"up")));
        assert_eq!(seen_build.lock().take(), Some(Bytes::from_static(b"down")));
    }

    #[test]
    fn stacked_modules_forward_in_order() {
        let m1 = Arc::new(Echo {
            handle: Mutex::new(None),
        });
        let m2 = Arc::new(Echo {
            handle: Mutex::new(None),
        });
        let pipeline = Pipeline::new(vec![m1.clone(), m2.clone()]);

        assert_eq!(m1.handle.lock().as_ref().unwrap().index(), 0);
        assert_eq!(m2.handle.lock().as_ref().unwrap().index(), 1);

        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        pipeline.on_read_complete(move |d| *s.lock() = Some(d));
        pipeline.read(Bytes::from_static(b"payload"));
        assert_eq!(seen.lock().take(), Some(Bytes::from_static(b"payload")));
    }

    #[test]
    fn set_modules_restamps_indices() {
        let m1 = Arc::new(Echo {
            handle: Mutex::new(None),
        });
        let pipeline = Pipeline::new(vec![m1.clone()]);
        assert_eq!(m1.handle.lock().as_ref().unwrap().index(), 0);

        let m0 = Arc::new(PassThrough);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        // PassThrough never calls continue_read, so on_read_complete should
        // only fire through the new m1 at index 1, never via the stale
        // index-0 handle captured before set_modules.
        pipeline.on_read_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        pipeline.set_modules(vec![m0, m1.clone()]);
        assert_eq!(m1.handle.lock().as_ref().unwrap().index(), 1);
    }
}
