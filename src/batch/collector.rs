//! Batch key collector.

use super::loader::{flush_batch, PendingBatch};
use super::{LoaderId, RecordSource};
use crate::scheduler::{Flushable, QueueId, TickContext};
use crate::{Error, ErrorContext, Result};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

pub(crate) type Waiter<R> = oneshot::Sender<Result<Vec<R>>>;
pub(crate) type Memo<K, R> = Arc<Mutex<HashMap<K, Vec<R>>>>;

/// Queue of one loader inside a [`TickContext`].
///
/// Holds the keys requested since the last flush, in first-seen order, and
/// the results already resolved during this request cycle.
pub(crate) struct BatchCollector<S: RecordSource> {
    source: Arc<S>,
    order: Vec<S::Key>,
    waiters: HashMap<S::Key, Vec<Waiter<S::Record>>>,
    resolved: Memo<S::Key, S::Record>,
}

impl<S: RecordSource> BatchCollector<S> {
    pub(crate) fn new(source: Arc<S>) -> Self {
        Self {
            source,
            order: Vec::new(),
            waiters: HashMap::new(),
            resolved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn add(&mut self, key: S::Key) -> LoadFuture<S::Record> {
        let memoized = self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(records) = memoized {
            return LoadFuture::ready(Ok(records));
        }

        let (tx, rx) = oneshot::channel();
        match self.waiters.get_mut(&key) {
            Some(list) => list.push(tx),
            None => {
                self.order.push(key.clone());
                self.waiters.insert(key, vec![tx]);
            }
        }
        LoadFuture::waiting(rx, self.source.loader_id())
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    fn drain(&mut self) -> Option<PendingBatch<S>> {
        if self.order.is_empty() {
            return None;
        }
        Some(PendingBatch {
            keys: std::mem::take(&mut self.order),
            waiters: std::mem::take(&mut self.waiters),
        })
    }
}

impl<S: RecordSource> Flushable for BatchCollector<S> {
    fn pending(&self) -> usize {
        self.len()
    }

    fn take_flush(&mut self) -> Option<BoxFuture<'static, ()>> {
        let batch = self.drain()?;
        Some(Box::pin(flush_batch(
            Arc::clone(&self.source),
            batch,
            Arc::clone(&self.resolved),
        )))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Handle for requesting records of one [`RecordSource`] inside a scheduler.
///
/// Cheap to clone. Every call to [`load`](Loader::load) queues its key
/// immediately; the key is fetched at the next tick boundary together with
/// every other key queued for the same loader.
pub struct Loader<S: RecordSource> {
    source: Arc<S>,
    ctx: TickContext,
}

impl<S: RecordSource> Clone for Loader<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: RecordSource> Loader<S> {
    pub(crate) fn new(source: Arc<S>, ctx: TickContext) -> Self {
        Self { source, ctx }
    }

    pub fn loader_id(&self) -> LoaderId {
        self.source.loader_id()
    }

    /// Request the records for `key`.
    ///
    /// Returns a new future on every call; duplicate keys within a tick share
    /// one fetch.
    pub fn load(&self, key: S::Key) -> LoadFuture<S::Record> {
        let id = self.source.loader_id();
        let source = Arc::clone(&self.source);
        let queued = self.ctx.with_queue(
            QueueId::Loader(id.clone()),
            || BatchCollector::new(source),
            |queue: &mut BatchCollector<S>| queue.add(key),
        );
        match queued {
            Ok(fut) => fut,
            Err(e) => LoadFuture::ready(Err(e)),
        }
    }

    /// Request several keys at once; results come back in input order.
    pub async fn load_many(&self, keys: Vec<S::Key>) -> Result<Vec<Vec<S::Record>>> {
        let futures: Vec<_> = keys.into_iter().map(|k| self.load(k)).collect();
        futures::future::try_join_all(futures).await
    }
}

/// Future returned by [`Loader::load`].
pub struct LoadFuture<R> {
    state: LoadState<R>,
}

enum LoadState<R> {
    Ready(Option<Result<Vec<R>>>),
    Waiting {
        rx: oneshot::Receiver<Result<Vec<R>>>,
        loader: LoaderId,
    },
}

impl<R> LoadFuture<R> {
    fn ready(result: Result<Vec<R>>) -> Self {
        Self {
            state: LoadState::Ready(Some(result)),
        }
    }

    fn waiting(rx: oneshot::Receiver<Result<Vec<R>>>, loader: LoaderId) -> Self {
        Self {
            state: LoadState::Waiting { rx, loader },
        }
    }
}

// Never pin-projected.
impl<R> Unpin for LoadFuture<R> {}

impl<R> Future for LoadFuture<R> {
    type Output = Result<Vec<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            LoadState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(Error::runtime_with_context(
                    "LoadFuture polled after completion",
                    ErrorContext::new().with_source("batch_collector"),
                ))
            })),
            LoadState::Waiting { rx, loader } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::runtime_with_context(
                    "batch dropped before it was flushed",
                    ErrorContext::new()
                        .with_field_path(loader.to_string())
                        .with_source("batch_collector"),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
