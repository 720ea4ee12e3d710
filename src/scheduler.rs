//! Cooperative tick driver.
//!
//! [`Scheduler::run`] polls a top-level future until it stops making progress
//! on its own, then flushes every queue registered in the [`TickContext`]
//! (loader batches and cache lookups) concurrently, and resumes the future.
//! Keys queued while resuming land in fresh queues and are flushed in the
//! next tick.

use crate::batch::{Loader, LoaderId, RecordSource};
use crate::{Error, ErrorContext, Result};
use futures::future::{join_all, BoxFuture};
use futures::task::{waker, ArcWake, AtomicWaker};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tracing::debug;

/// A queue that can hand over its pending work at a tick boundary.
pub(crate) trait Flushable: Send {
    fn pending(&self) -> usize;
    /// Drain the queue; `None` when there is nothing to flush.
    fn take_flush(&mut self) -> Option<BoxFuture<'static, ()>>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Which queue a piece of pending work belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum QueueId {
    Loader(LoaderId),
    /// Bulk lookups against one fragment cache instance (its address).
    CacheLookup(usize),
}

#[derive(Default)]
struct TickState {
    queues: HashMap<QueueId, Box<dyn Flushable>>,
}

/// Shared state of one request cycle: the open queues of the current tick.
#[derive(Clone, Default)]
pub struct TickContext {
    state: Arc<Mutex<TickState>>,
}

impl TickContext {
    fn lock(&self) -> MutexGuard<'_, TickState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the queue `id`, creating it with `make` on first use.
    ///
    /// Fails if `id` was already registered with a different queue type,
    /// e.g. two record sources reporting the same loader id.
    pub(crate) fn with_queue<Q, R>(
        &self,
        id: QueueId,
        make: impl FnOnce() -> Q,
        f: impl FnOnce(&mut Q) -> R,
    ) -> Result<R>
    where
        Q: Flushable + 'static,
    {
        let mut state = self.lock();
        let queue = state
            .queues
            .entry(id.clone())
            .or_insert_with(|| Box::new(make()));
        match queue.as_any_mut().downcast_mut::<Q>() {
            Some(q) => Ok(f(q)),
            None => Err(Error::configuration_with_context(
                "queue registered twice with different types",
                ErrorContext::new()
                    .with_field_path(format!("{:?}", id))
                    .with_details(std::any::type_name::<Q>())
                    .with_source("tick_context"),
            )),
        }
    }

    /// Number of keys and lookups waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.lock().queues.values().map(|q| q.pending()).sum()
    }

    fn take_flushes(&self) -> Vec<BoxFuture<'static, ()>> {
        self.lock()
            .queues
            .values_mut()
            .filter_map(|q| q.take_flush())
            .collect()
    }
}

/// Wake flag shared with everything the root future registers its waker with.
#[derive(Default)]
struct WakeSignal {
    woken: AtomicBool,
    outer: AtomicWaker,
}

impl ArcWake for WakeSignal {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::SeqCst);
        arc_self.outer.wake();
    }
}

/// Drives one request cycle in discrete ticks.
#[derive(Default)]
pub struct Scheduler {
    ctx: TickContext,
    ticks: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> &TickContext {
        &self.ctx
    }

    /// A loader handle bound to this scheduler's ticks.
    pub fn loader<S: RecordSource>(&self, source: Arc<S>) -> Loader<S> {
        Loader::new(source, self.ctx.clone())
    }

    /// Number of ticks flushed so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run `root` to completion, flushing queued work whenever it is idle.
    ///
    /// When `root` is idle with nothing queued (it waits on I/O outside any
    /// batch), the driver yields to the runtime until it is woken. Work still
    /// queued after `root` completes is flushed before returning.
    pub async fn run<F: Future>(&self, root: F) -> F::Output {
        let mut root = std::pin::pin!(root);
        let signal = Arc::new(WakeSignal::default());
        let waker = waker(Arc::clone(&signal));

        let output = loop {
            if let Poll::Ready(out) = poll_until_idle(root.as_mut(), &signal, &waker) {
                break out;
            }
            if !self.flush().await {
                wait_for_wake(&signal).await;
            }
        };

        if self.ctx.pending() > 0 {
            debug!(pending = self.ctx.pending(), "flushing work left after completion");
            self.flush().await;
        }
        output
    }

    /// Flush every non-empty queue once. Returns `false` if nothing was queued.
    async fn flush(&self) -> bool {
        let pending = self.ctx.pending();
        let flushes = self.ctx.take_flushes();
        if flushes.is_empty() {
            return false;
        }
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(tick, queues = flushes.len(), pending, "tick boundary");
        join_all(flushes).await;
        true
    }
}

/// Poll `root` until it completes or stops waking itself.
fn poll_until_idle<F: Future>(
    mut root: std::pin::Pin<&mut F>,
    signal: &WakeSignal,
    waker: &std::task::Waker,
) -> Poll<F::Output> {
    let mut cx = Context::from_waker(waker);
    loop {
        signal.woken.store(false, Ordering::SeqCst);
        if let Poll::Ready(out) = root.as_mut().poll(&mut cx) {
            return Poll::Ready(out);
        }
        if !signal.woken.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
    }
}

async fn wait_for_wake(signal: &WakeSignal) {
    futures::future::poll_fn(|cx| {
        signal.outer.register(cx.waker());
        if signal.woken.load(Ordering::SeqCst) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    })
    .await
}
