use crate::shard::Shard;
use crossbeam_channel::{Receiver, Sender};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::slice;
use std::thread::{self, JoinHandle};

/// Capacity of the channel between fan-out workers and a `BufferedIter`.
pub const BUFFER_CAPACITY: usize = 1000;

/// Lazy snapshot iterator over all key-value pairs.
///
/// Shards are copied one at a time, in shard order, each under its own read
/// lock and only once the previous copy has been drained. Every shard's slice
/// is internally consistent, but two shards may be copied at different
/// instants. No lock is held between calls to `next`, and dropping the
/// iterator early leaves nothing behind.
pub struct Iter<'a, K, V> {
    shards: slice::Iter<'a, Shard<K, V>>,
    current: Option<hashbrown::hash_map::IntoIter<K, V>>,
}

impl<'a, K, V> Iter<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub(crate) fn new(shards: &'a [Shard<K, V>]) -> Self {
        Self {
            shards: shards.iter(),
            current: None,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.as_mut().and_then(Iterator::next) {
                return Some(entry);
            }
            let shard = self.shards.next()?;
            self.current = Some(shard.snapshot().into_iter());
        }
    }
}

/// Lazy snapshot iterator over keys only.
///
/// Same per-shard copying as [`Iter`], without cloning values.
pub struct Keys<'a, K, V> {
    shards: slice::Iter<'a, Shard<K, V>>,
    current: std::vec::IntoIter<K>,
}

impl<'a, K, V> Keys<'a, K, V>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(shards: &'a [Shard<K, V>]) -> Self {
        Self {
            shards: shards.iter(),
            current: Vec::new().into_iter(),
        }
    }
}

impl<'a, K, V> Iterator for Keys<'a, K, V>
where
    K: Hash + Eq + Clone,
{
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.current.next() {
                return Some(key);
            }
            let shard = self.shards.next()?;
            self.current = shard.snapshot_keys().into_iter();
        }
    }
}

/// Upper bound on fan-out workers: the machine's available parallelism.
pub fn worker_limit() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

type Batch<K, V> = Vec<hashbrown::HashMap<K, V>>;

/// Iterator fed by background workers.
///
/// All shards are copied up front, then dealt round-robin to at most
/// [`worker_limit`] workers, which emit them concurrently through a bounded
/// channel, so entries from different shards interleave in no particular
/// order. A batch whose worker cannot be spawned is emitted on the consuming
/// thread once the channel is drained. Dropping the iterator disconnects the
/// channel: workers blocked on a full buffer wake up, stop, and are joined
/// before `drop` returns.
pub struct BufferedIter<K, V> {
    rx: Receiver<(K, V)>,
    workers: Vec<JoinHandle<()>>,
    inline: Vec<hashbrown::hash_map::IntoIter<K, V>>,
}

impl<K, V> BufferedIter<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub(crate) fn new(shards: &[Shard<K, V>]) -> Self {
        Self::with_worker_limit(shards, worker_limit())
    }

    /// A limit of zero emits everything on the consuming thread.
    pub(crate) fn with_worker_limit(shards: &[Shard<K, V>], limit: usize) -> Self {
        let snapshots: Vec<_> = shards
            .iter()
            .map(Shard::snapshot)
            .filter(|snapshot| !snapshot.is_empty())
            .collect();
        let (tx, rx) = crossbeam_channel::bounded(BUFFER_CAPACITY);

        let worker_count = limit.min(snapshots.len());
        let mut inline = Vec::new();
        if worker_count == 0 {
            inline.extend(snapshots.into_iter().map(|snapshot| snapshot.into_iter()));
            return Self {
                rx,
                workers: Vec::new(),
                inline,
            };
        }

        let mut batches: Vec<Batch<K, V>> = (0..worker_count).map(|_| Vec::new()).collect();
        for (i, snapshot) in snapshots.into_iter().enumerate() {
            batches[i % worker_count].push(snapshot);
        }

        let mut workers = Vec::with_capacity(worker_count);
        for (id, batch) in batches.into_iter().enumerate() {
            let worker_tx = tx.clone();
            // Keep a handle on the batch so a failed spawn can fall back to inline.
            let (batch_tx, batch_rx) = crossbeam_channel::bounded::<Batch<K, V>>(1);
            let spawned = thread::Builder::new()
                .name(format!("cmap-fanout-{}", id))
                .spawn(move || {
                    if let Ok(batch) = batch_rx.recv() {
                        emit(batch, worker_tx);
                    }
                });
            match spawned {
                Ok(handle) => {
                    let _ = batch_tx.send(batch);
                    workers.push(handle);
                }
                Err(err) => {
                    tracing::debug!(%err, "fan-out worker spawn failed, emitting inline");
                    inline.extend(batch.into_iter().map(|snapshot| snapshot.into_iter()));
                }
            }
        }

        tracing::trace!(
            workers = workers.len(),
            inline = inline.len(),
            "spawned buffered iteration workers"
        );

        Self {
            rx,
            workers,
            inline,
        }
    }

    /// Number of background workers started for this iterator.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn emit<K, V>(batch: Batch<K, V>, tx: Sender<(K, V)>) {
    for entry in batch.into_iter().flatten() {
        if tx.send(entry).is_err() {
            tracing::trace!("buffered iterator dropped, stopping worker");
            return;
        }
    }
}

impl<K, V> Iterator for BufferedIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        if let Ok(entry) = self.rx.recv() {
            return Some(entry);
        }
        loop {
            let current = self.inline.last_mut()?;
            if let Some(entry) = current.next() {
                return Some(entry);
            }
            self.inline.pop();
        }
    }
}

impl<K, V> Drop for BufferedIter<K, V> {
    fn drop(&mut self) {
        // Replace the receiver so every pending send fails.
        drop(std::mem::replace(&mut self.rx, crossbeam_channel::never()));
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
