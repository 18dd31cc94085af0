//! Single-flight execution keyed by an arbitrary key.
//!
//! The first caller for a key spawns the work on its own task; every caller
//! that arrives before it finishes awaits the same shared output. The work is
//! detached from its callers, so a waiter dropping out never cancels it.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// The flight's task panicked or was aborted at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("in-flight task aborted")]
pub struct FlightAborted;

type FlightFuture<V> = Shared<BoxFuture<'static, Result<V, FlightAborted>>>;

struct Flight<V: Clone> {
    id: u64,
    output: FlightFuture<V>,
    abort: AbortHandle,
}

/// Deduplicates concurrent work per key.
pub struct SingleFlight<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    flights: Arc<DashMap<K, Flight<V>>>,
    next_id: Arc<AtomicU64>,
}

impl<K, V> Clone for SingleFlight<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `work` for `key` unless a flight for it is already active, in
    /// which case join that flight instead. `work` is only invoked by the
    /// leader.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let output = match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight work for {:?}", key);
                entry.get().output.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let flights = Arc::clone(&self.flights);
                let fut = work();

                let handle = tokio::spawn(async move {
                    let value = fut.await;
                    flights.remove_if(&key, |_, flight| flight.id == id);
                    value
                });
                let abort = handle.abort_handle();

                let output = async move { handle.await.map_err(|_| FlightAborted) }
                    .boxed()
                    .shared();

                entry.insert(Flight {
                    id,
                    output: output.clone(),
                    abort,
                });
                output
            }
        };

        output.await
    }

    /// Whether a flight for `key` is currently active.
    pub fn is_active(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }

    /// Number of active flights.
    pub fn active(&self) -> usize {
        self.flights.len()
    }

    /// Wait for all active flights up to `grace`, then abort the rest.
    pub async fn drain(&self, grace: Duration) {
        let pending: Vec<_> = self
            .flights
            .iter()
            .map(|flight| flight.output.clone())
            .collect();

        if pending.is_empty() {
            return;
        }

        debug!("Waiting for {} in-flight tasks", pending.len());
        if tokio::time::timeout(grace, futures::future::join_all(pending))
            .await
            .is_err()
        {
            let mut aborted = 0;
            self.flights.retain(|_, flight| {
                flight.abort.abort();
                aborted += 1;
                false
            });
            warn!("Shutdown grace elapsed, aborted {} in-flight tasks", aborted);
        }
    }
}
