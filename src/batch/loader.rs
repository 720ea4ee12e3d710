//! Batch loader: executes the bulk fetch for one tick of one loader.

use super::collector::{Memo, Waiter};
use super::RecordSource;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Keys and waiters drained from a collector at a tick boundary.
pub(crate) struct PendingBatch<S: RecordSource> {
    pub(crate) keys: Vec<S::Key>,
    pub(crate) waiters: HashMap<S::Key, Vec<Waiter<S::Record>>>,
}

/// Fetch every key of `batch` and deliver the grouped records to its waiters.
///
/// Delivery is all-or-nothing: if any chunk fails, every waiter receives the
/// same shared error and nothing is memoized.
pub(crate) async fn flush_batch<S: RecordSource>(
    source: Arc<S>,
    batch: PendingBatch<S>,
    resolved: Memo<S::Key, S::Record>,
) {
    let loader = source.loader_id();
    let start = Instant::now();
    let PendingBatch { keys, mut waiters } = batch;

    match fetch_grouped(source.as_ref(), &keys).await {
        Ok(mut grouped) => {
            debug!(
                loader = %loader,
                keys = keys.len(),
                records = grouped.values().map(Vec::len).sum::<usize>(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "batch flushed"
            );
            let mut memo = resolved.lock().unwrap_or_else(PoisonError::into_inner);
            for key in keys {
                let records = grouped.remove(&key).unwrap_or_default();
                for tx in waiters.remove(&key).unwrap_or_default() {
                    // receiver may have been dropped; nothing to deliver then
                    let _ = tx.send(Ok(records.clone()));
                }
                memo.insert(key, records);
            }
        }
        Err(e) => {
            warn!(loader = %loader, keys = keys.len(), error = %e, "batch fetch failed");
            let shared = Arc::new(e);
            for (_, list) in waiters.drain() {
                for tx in list {
                    let _ = tx.send(Err(Error::fetch(loader.clone(), Arc::clone(&shared))));
                }
            }
        }
    }
}

/// Run `fetch_by_keys` (once, or once per chunk) and group the records by key
/// in a single pass. Every requested key is present in the result.
async fn fetch_grouped<S: RecordSource>(
    source: &S,
    keys: &[S::Key],
) -> Result<HashMap<S::Key, Vec<S::Record>>> {
    let mut grouped: HashMap<S::Key, Vec<S::Record>> =
        keys.iter().map(|k| (k.clone(), Vec::new())).collect();

    let chunk_size = source.max_batch_size().unwrap_or(keys.len()).max(1);
    for chunk in keys.chunks(chunk_size) {
        let records = source.fetch_by_keys(chunk).await?;
        for record in records {
            let key = source.key_of(&record);
            match grouped.get_mut(&key) {
                Some(bucket) => bucket.push(record),
                None => trace!(loader = %source.loader_id(), key = ?key, "ignoring record for unrequested key"),
            }
        }
    }
    Ok(grouped)
}
