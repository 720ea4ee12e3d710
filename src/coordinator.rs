//! Cache-aware fragment resolution.
//!
//! Each call to [`Coordinator::resolve`] walks one fragment through
//!
//! ```text
//! Start -> CacheLookupPending -> Hit -> Done
//!                             -> Miss -> LoaderPending -> Computed -> CacheWritePending -> Done
//! ```
//!
//! Cache lookups are not issued one by one: every fragment that reaches
//! `CacheLookupPending` in the same tick is answered by a single
//! `read_many`, plus per-key `exists` probes in [`CacheMode::Deferred`].
//!
//! Consumers of the same fragment in one tick also share the miss path: the
//! first one computes and writes, the others wait for its encoded result.

use crate::cache::{CacheKey, FragmentCache, FragmentKeyGenerator};
use crate::config::{CacheMode, ConfirmPolicy, CoordinatorConfig};
use crate::scheduler::{Flushable, QueueId, Scheduler, TickContext};
use crate::{Error, ErrorContext};
use futures::channel::oneshot;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Logical identity of one fragment plus per-call overrides.
#[derive(Debug, Clone)]
pub struct FragmentRequest {
    /// Field path, e.g. `users.posts`.
    pub path: String,
    /// Id of the parent object the field is resolved on.
    pub object_id: Value,
    pub arguments: Value,
    pub mode: Option<CacheMode>,
    pub ttl: Option<Duration>,
    pub confirm: Option<ConfirmPolicy>,
}

impl FragmentRequest {
    pub fn new(path: impl Into<String>, object_id: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            object_id: object_id.into(),
            arguments: Value::Null,
            mode: None,
            ttl: None,
            confirm: None,
        }
    }
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }
    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = Some(mode);
        self
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
    /// Probe policy for this fragment when it is looked up in deferred mode.
    pub fn with_confirm(mut self, confirm: ConfirmPolicy) -> Self {
        self.confirm = Some(confirm);
        self
    }
}

/// Encoded result of a shared miss, or the error its computation hit.
type Published = std::result::Result<Vec<u8>, Arc<Error>>;

/// What a fragment lookup tells its consumer to do.
enum Lookup {
    Hit(Vec<u8>),
    /// Compute alone, without sharing the result.
    Miss,
    /// First consumer of a missed key: compute, write, then publish.
    Lead(oneshot::Sender<Published>),
    /// Another consumer of the same missed key is computing it.
    Follow(Shared<oneshot::Receiver<Published>>),
}

/// Decides per fragment whether to consult the cache before computing, and
/// batches those consultations per tick.
pub struct Coordinator {
    ctx: TickContext,
    cache: Arc<FragmentCache>,
    keys: FragmentKeyGenerator,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(scheduler: &Scheduler, cache: Arc<FragmentCache>, config: CoordinatorConfig) -> Self {
        Self {
            ctx: scheduler.context().clone(),
            cache,
            keys: FragmentKeyGenerator::new(),
            config,
        }
    }

    pub fn with_key_generator(mut self, keys: FragmentKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<FragmentCache> {
        &self.cache
    }

    pub fn cache_key(&self, request: &FragmentRequest) -> CacheKey {
        self.keys
            .generate(&request.path, &request.object_id, &request.arguments)
    }

    /// Resolve one fragment.
    ///
    /// `compute` runs only on a miss (or when caching is disabled); it is
    /// typically a [`Loader::load`](crate::batch::Loader::load) call so that
    /// misses of the same tick share one bulk fetch. Consumers of the same
    /// fragment in one tick run `compute` once between them. A computed value
    /// is written back with the request's TTL; a failed write is logged and
    /// the value is still returned.
    pub async fn resolve<T, F, Fut>(&self, request: FragmentRequest, compute: F) -> crate::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let mode = request.mode.unwrap_or(self.config.mode);
        if mode == CacheMode::Disabled {
            return compute().await;
        }

        let key = self.cache_key(&request);
        let ttl = request.ttl.unwrap_or(self.config.ttl);
        let confirm = (mode == CacheMode::Deferred)
            .then(|| request.confirm.unwrap_or(self.config.confirm));
        trace!(key = %key, ?mode, "fragment cache lookup pending");

        let publish = match self.lookup(key.clone(), confirm).await {
            Lookup::Hit(bytes) => {
                if let Some(value) = self.cache.decode::<T>(&key, &bytes) {
                    trace!(key = %key, "fragment cache hit");
                    return Ok(value);
                }
                None
            }
            Lookup::Follow(outcome) => match outcome.await {
                Ok(Ok(bytes)) => {
                    if let Some(value) = self.cache.decode::<T>(&key, &bytes) {
                        return Ok(value);
                    }
                    None
                }
                Ok(Err(e)) => return Err(unshare(&key, &e)),
                // the computing consumer went away; fall back to our own compute
                Err(oneshot::Canceled) => None,
            },
            Lookup::Lead(publish) => Some(publish),
            Lookup::Miss => None,
        };

        trace!(key = %key, "fragment cache miss");
        let value = match compute().await {
            Ok(value) => value,
            Err(e) => {
                if let Some(publish) = publish {
                    let _ = publish.send(Err(Arc::new(unshare(&key, &e))));
                }
                return Err(e);
            }
        };

        // Dropping `publish` on an encode failure lets followers compute themselves.
        match self.cache.encode(&value) {
            Ok(data) => {
                if let Some(publish) = publish {
                    let _ = publish.send(Ok(data.clone()));
                }
                if let Err(e) = self.cache.write_encoded(&key, &data, ttl).await {
                    warn!(key = %key, error = %e, "fragment cache write failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "fragment could not be encoded for caching"),
        }
        Ok(value)
    }

    /// Queue `key` in this tick's bulk lookup and wait for the flush.
    async fn lookup(&self, key: CacheKey, confirm: Option<ConfirmPolicy>) -> Lookup {
        let (tx, rx) = oneshot::channel();
        let cache = Arc::clone(&self.cache);
        let queued = self.ctx.with_queue(
            QueueId::CacheLookup(Arc::as_ptr(&self.cache) as usize),
            || LookupBatch::new(cache),
            |batch: &mut LookupBatch| batch.add(key, confirm, tx),
        );
        if let Err(e) = queued {
            warn!(error = %e, "could not queue fragment lookup");
            return Lookup::Miss;
        }
        rx.await.unwrap_or(Lookup::Miss)
    }
}

/// An owned copy of a failure, for a consumer that waited on another's compute.
fn unshare(key: &CacheKey, err: &Error) -> Error {
    match err {
        Error::Fetch { loader, source } => Error::fetch(loader.clone(), Arc::clone(source)),
        Error::Runtime { message, context } => {
            Error::runtime_with_context(message.clone(), context.clone())
        }
        other => Error::runtime_with_context(
            format!("shared fragment computation failed: {}", other),
            ErrorContext::new()
                .with_field_path(key.as_str())
                .with_source("coordinator"),
        ),
    }
}

struct KeyLookup {
    confirm: Option<ConfirmPolicy>,
    waiters: Vec<oneshot::Sender<Lookup>>,
}

/// Cache lookups queued against one [`FragmentCache`] during a tick.
struct LookupBatch {
    cache: Arc<FragmentCache>,
    order: Vec<CacheKey>,
    entries: HashMap<CacheKey, KeyLookup>,
}

impl LookupBatch {
    fn new(cache: Arc<FragmentCache>) -> Self {
        Self {
            cache,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    fn add(
        &mut self,
        key: CacheKey,
        confirm: Option<ConfirmPolicy>,
        tx: oneshot::Sender<Lookup>,
    ) {
        match self.entries.get_mut(&key) {
            Some(lookup) => {
                lookup.confirm = merge_confirm(lookup.confirm, confirm);
                lookup.waiters.push(tx);
            }
            None => {
                self.order.push(key.clone());
                self.entries.insert(
                    key,
                    KeyLookup {
                        confirm,
                        waiters: vec![tx],
                    },
                );
            }
        }
    }
}

fn merge_confirm(a: Option<ConfirmPolicy>, b: Option<ConfirmPolicy>) -> Option<ConfirmPolicy> {
    match (a, b) {
        (Some(ConfirmPolicy::EveryConsumer), _) | (_, Some(ConfirmPolicy::EveryConsumer)) => {
            Some(ConfirmPolicy::EveryConsumer)
        }
        (Some(p), _) | (_, Some(p)) => Some(p),
        (None, None) => None,
    }
}

impl Flushable for LookupBatch {
    fn pending(&self) -> usize {
        self.order.len()
    }

    fn take_flush(&mut self) -> Option<BoxFuture<'static, ()>> {
        if self.order.is_empty() {
            return None;
        }
        Some(Box::pin(flush_lookups(
            Arc::clone(&self.cache),
            std::mem::take(&mut self.order),
            std::mem::take(&mut self.entries),
        )))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One bulk read for every key, then the existence probes, then delivery.
/// Read and probe failures degrade to misses.
async fn flush_lookups(
    cache: Arc<FragmentCache>,
    keys: Vec<CacheKey>,
    mut entries: HashMap<CacheKey, KeyLookup>,
) {
    let mut found = match cache.read_many(&keys).await {
        Ok(found) => found,
        Err(e) => {
            warn!(keys = keys.len(), error = %e, "bulk fragment read failed; treating as misses");
            HashMap::new()
        }
    };

    let probes: Vec<&CacheKey> = keys
        .iter()
        .filter(|key| match entries.get(*key).and_then(|l| l.confirm) {
            Some(ConfirmPolicy::EveryConsumer) => true,
            Some(ConfirmPolicy::HitsOnly) => found.contains_key(*key),
            None => false,
        })
        .collect();
    let answers = join_all(probes.iter().map(|key| cache.exists(key))).await;
    let mut rejected = 0;
    for (key, answer) in probes.iter().zip(answers) {
        let confirmed = match answer {
            Ok(present) => present,
            Err(e) => {
                warn!(key = %key, error = %e, "fragment existence probe failed; treating as miss");
                false
            }
        };
        if !confirmed && found.remove(*key).is_some() {
            debug!(key = %key, "bulk hit rejected by existence probe");
            rejected += 1;
        }
    }
    cache.reclassify_hits_as_misses(rejected);

    debug!(
        keys = keys.len(),
        hits = found.len(),
        probes = probes.len(),
        "fragment lookups flushed"
    );

    for key in &keys {
        let Some(lookup) = entries.remove(key) else {
            continue;
        };
        match found.remove(key) {
            Some(bytes) => {
                for tx in lookup.waiters {
                    let _ = tx.send(Lookup::Hit(bytes.clone()));
                }
            }
            None => deliver_miss(lookup.waiters),
        }
    }
}

/// Make the first live waiter the one that computes; the rest follow it.
fn deliver_miss(waiters: Vec<oneshot::Sender<Lookup>>) {
    let (publish, outcome) = oneshot::channel();
    let outcome = outcome.shared();
    let mut lead = Some(publish);
    for tx in waiters {
        let role = match lead.take() {
            Some(publish) => Lookup::Lead(publish),
            None => Lookup::Follow(outcome.clone()),
        };
        // a dropped consumer hands the lead to the next one
        if let Err(Lookup::Lead(publish)) = tx.send(role) {
            lead = Some(publish);
        }
    }
}
