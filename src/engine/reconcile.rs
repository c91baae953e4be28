use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Notify, RwLock, watch};
use tracing::debug;

use crate::model::*;
use crate::observability;
use crate::window::Window;

use super::resolver::Resolver;
use super::store::{Outcome, Store};

/// Applies change events to the store.
///
/// Deletes apply as soon as they are received. Inserts and updates spawn a
/// point-read whose result is applied whenever it completes, against the
/// window current at that moment. Channel teardown does not cancel these.
pub struct Reconciler {
    store: RwLock<Store>,
    resolver: Resolver,
    /// Receipt order of change events.
    sequence: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
    revision: watch::Sender<u64>,
}

impl Reconciler {
    pub fn new(window: Window, resolver: Resolver) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            store: RwLock::new(Store::new(window)),
            resolver,
            sequence: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            revision,
        })
    }

    pub fn store(&self) -> &RwLock<Store> {
        &self.store
    }

    /// Fires with the store revision after every effective mutation.
    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub async fn dispatch(self: &Arc<Self>, event: ChangeEvent) {
        let ChangeEvent { kind, change, id, .. } = event;
        observability::record_event(kind, change);

        // seq is assigned and its read registered under the store lock
        let mut store = self.store.write().await;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("{kind} {id} {} (seq {seq})", change.as_str());

        match change {
            ChangeType::Delete => {
                let outcome = store.apply_delete(kind, id, seq);
                self.finish(&store, kind, id, outcome);
            }
            ChangeType::Insert | ChangeType::Update => {
                store.begin_read(seq);
                drop(store);
                self.pending.fetch_add(1, Ordering::SeqCst);
                metrics::gauge!(observability::POINT_READS_IN_FLIGHT).increment(1.0);
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let row = this.resolver.resolve(kind, id).await;
                    {
                        let mut store = this.store.write().await;
                        let outcome = store.apply_resolved(kind, id, seq, row);
                        this.finish(&store, kind, id, outcome);
                    }
                    metrics::gauge!(observability::POINT_READS_IN_FLIGHT).decrement(1.0);
                    if this.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        this.idle.notify_waiters();
                    }
                });
            }
        }
    }

    /// Re-seed under a new window. Reads still in flight for rows the
    /// snapshot seeded are rejected when they land.
    pub async fn reset(&self, window: Window, snapshot: Snapshot) {
        let mut store = self.store.write().await;
        let seq = self.sequence.load(Ordering::SeqCst) + 1;
        store.reset(window, snapshot, seq);
        debug!(
            "store reset to {}..{}: {} days, {} bookings",
            store.window().start_str,
            store.window().end_str,
            store.days().len(),
            store.bookings().len()
        );
        self.revision.send_replace(store.revision());
    }

    /// Wait until every dispatched point-read has been applied or dropped.
    pub async fn settle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn finish(&self, store: &Store, kind: EntityKind, id: EntityId, outcome: Outcome) {
        debug!("{kind} {id}: {}", outcome.as_str());
        if outcome.changed() {
            self.revision.send_replace(store.revision());
        } else {
            metrics::counter!(
                observability::EVENTS_DROPPED_TOTAL,
                "kind" => kind.as_str(),
                "reason" => outcome.as_str()
            )
            .increment(1);
        }
    }
}
