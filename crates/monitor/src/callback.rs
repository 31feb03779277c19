//! Watcher callbacks and the dispatcher that invokes them.
//!
//! A [`Callback`] is tagged when it is registered: [`Callback::Inline`]
//! runs synchronously on the transport I/O task, [`Callback::Deferred`]
//! produces a future that must run on the application's runtime. The
//! dispatcher hands deferred work to a [`SchedulingContext`], a channel
//! drained by a task on the runtime that was current when the context
//! was captured. The I/O task only ever enqueues; it never awaits a
//! callback.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

type InlineFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type DeferredFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Unit of work handed to a scheduling context.
pub type DeferredJob = BoxFuture<'static, ()>;

/// A watcher callback, tagged with how it must be invoked.
pub enum Callback<T> {
    /// Called in place on the I/O task. Must not block.
    Inline(InlineFn<T>),
    /// Scheduled fire-and-forget onto the captured scheduling context.
    Deferred(DeferredFn<T>),
}

impl<T: 'static> Callback<T> {
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::Inline(Arc::new(f))
    }

    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Deferred(Arc::new(move |payload| f(payload).boxed()))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Inline(f) => Self::Inline(Arc::clone(f)),
            Self::Deferred(f) => Self::Deferred(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Callback::Inline"),
            Self::Deferred(_) => f.write_str("Callback::Deferred"),
        }
    }
}

/// Sender half of a queue drained on a specific tokio runtime.
#[derive(Clone)]
pub struct SchedulingContext {
    tx: mpsc::UnboundedSender<DeferredJob>,
}

impl SchedulingContext {
    /// Spawn a drain task on `handle` and return the queue feeding it.
    ///
    /// Each job is spawned as its own task, so a slow callback does not
    /// hold up the ones queued behind it.
    pub fn spawn_on(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeferredJob>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                tokio::spawn(async move {
                    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                        tracing::error!(
                            panic = %panic_message(&panic),
                            "Deferred callback panicked",
                        );
                    }
                });
            }
            tracing::debug!("Scheduling context closed");
        });
        Self { tx }
    }

    /// Capture the runtime the caller is running on, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(|handle| Self::spawn_on(&handle))
    }

    /// Enqueue a job. Returns `false` when the drain task is gone.
    pub fn schedule(&self, job: DeferredJob) -> bool {
        self.tx.send(job).is_ok()
    }
}

/// Invokes callbacks inline or through the captured scheduling context.
#[derive(Default)]
pub struct CallbackDispatcher {
    context: OnceLock<SchedulingContext>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: SchedulingContext) -> Self {
        let dispatcher = Self::new();
        let _ = dispatcher.context.set(context);
        dispatcher
    }

    /// Capture the caller's runtime unless a context is already held.
    ///
    /// Called from construction and from every subscribe so that the
    /// first call made inside a runtime wins.
    pub fn capture_current(&self) {
        if self.context.get().is_some() {
            return;
        }
        if let Some(context) = SchedulingContext::current() {
            if self.context.set(context).is_ok() {
                tracing::debug!("Captured scheduling context for deferred callbacks");
            }
        }
    }

    pub fn has_context(&self) -> bool {
        self.context.get().is_some()
    }

    pub fn invoke<T: Send + 'static>(&self, callback: &Callback<T>, payload: T) {
        self.invoke_ordered(vec![(callback.clone(), payload)]);
    }

    /// Invoke a batch of callbacks preserving their order.
    ///
    /// Leading inline callbacks run immediately. From the first deferred
    /// callback on, the remainder of the batch is chained into a single
    /// job so that nothing overtakes an earlier call.
    pub fn invoke_ordered<T: Send + 'static>(&self, calls: Vec<(Callback<T>, T)>) {
        let mut calls = calls.into_iter();
        while let Some((callback, payload)) = calls.next() {
            match callback {
                Callback::Inline(f) => run_inline(&f, payload),
                Callback::Deferred(f) => {
                    let rest: Vec<(Callback<T>, T)> = calls.by_ref().collect();
                    let job = async move {
                        f(payload).await;
                        for (callback, payload) in rest {
                            match callback {
                                Callback::Inline(f) => run_inline(&f, payload),
                                Callback::Deferred(f) => f(payload).await,
                            }
                        }
                    };
                    self.schedule(job.boxed());
                    return;
                }
            }
        }
    }

    fn schedule(&self, job: DeferredJob) {
        match self.context.get() {
            Some(context) => {
                if !context.schedule(job) {
                    tracing::warn!("Scheduling context is gone, dropping deferred callback");
                }
            }
            None => {
                tracing::warn!("No scheduling context available, dropping deferred callback");
            }
        }
    }
}

fn run_inline<T>(f: &InlineFn<T>, payload: T) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| f(payload))) {
        tracing::error!(panic = %panic_message(&panic), "Callback panicked");
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
