use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::engine::{FeedError, NullsLast, ReadError, Record};
use crate::feed::{Channel, ChangeFeed, ChannelMessage, ChannelStatus, PointRead, SnapshotSource};
use crate::model::*;
use crate::window::Window;

/// In-process backing store with a broadcast hub per entity kind.
///
/// Rows are kept raw (no relations); reads join relations on the way out,
/// and writes publish change events to current listeners.
pub struct MemoryBackend {
    rows: DashMap<(EntityKind, EntityId), Row>,
    channels: DashMap<EntityKind, broadcast::Sender<ChangeEvent>>,
    capacity: usize,
    refused: DashMap<EntityKind, String>,
    offline: AtomicBool,
    failing_reads: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl MemoryBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: DashMap::new(),
            channels: DashMap::new(),
            capacity,
            refused: DashMap::new(),
            offline: AtomicBool::new(false),
            failing_reads: AtomicBool::new(false),
        }
    }

    /// Load rows without publishing events.
    pub fn seed(&self, snapshot: Snapshot) {
        for row in snapshot.into_rows() {
            self.rows.insert((row.kind(), row.id()), strip_relations(row));
        }
    }

    /// Insert or update a row and notify listeners.
    pub fn upsert(&self, row: Row) {
        let row = strip_relations(row);
        let (kind, id) = (row.kind(), row.id());
        let new = serde_json::to_value(&row).ok().map(payload);
        let old = self.rows.insert((kind, id), row);
        let change = if old.is_some() { ChangeType::Update } else { ChangeType::Insert };
        self.send(ChangeEvent {
            kind,
            change,
            id,
            old: old.and_then(|r| serde_json::to_value(&r).ok()).map(payload),
            new,
        });
    }

    /// Delete a row and notify listeners. Returns whether it existed.
    pub fn delete(&self, kind: EntityKind, id: EntityId) -> bool {
        let Some((_, old)) = self.rows.remove(&(kind, id)) else {
            return false;
        };
        self.send(ChangeEvent {
            kind,
            change: ChangeType::Delete,
            id,
            old: serde_json::to_value(&old).ok().map(payload),
            new: None,
        });
        true
    }

    /// Publish an arbitrary event, e.g. one whose row is already gone.
    pub fn send(&self, event: ChangeEvent) {
        if let Some(sender) = self.channels.get(&event.kind) {
            let _ = sender.send(event);
        }
    }

    /// Number of live listeners on a kind's hub.
    pub fn listener_count(&self, kind: EntityKind) -> usize {
        self.channels
            .get(&kind)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Reject future subscriptions for `kind`.
    pub fn refuse_subscriptions(&self, kind: EntityKind, reason: &str) {
        self.refused.insert(kind, reason.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    fn raw(&self, kind: EntityKind, id: EntityId) -> Option<Row> {
        self.rows.get(&(kind, id)).map(|r| r.value().clone())
    }

    fn join(&self, row: Row, relations: &[&str]) -> Row {
        let wants = |name: &str| relations.iter().any(|r| *r == name);
        match row {
            Row::ProgramEntry(e) => Row::ProgramEntry(self.join_entry(e, &wants)),
            Row::Reservation(e) => Row::Reservation(self.join_entry(e, &wants)),
            Row::Day(mut d) if wants("entries") => {
                let mut entries: Vec<PointEntry> = self
                    .rows
                    .iter()
                    .filter_map(|r| match r.value() {
                        Row::ProgramEntry(e) | Row::Reservation(e) if e.day_id == d.id => Some(e.clone()),
                        _ => None,
                    })
                    .collect();
                entries.sort_by_key(|e| (NullsLast(e.start_time), e.id));
                let nested = |name: &str| EntityKind::ProgramEntry.relations().iter().any(|r| *r == name);
                d.entries = entries.into_iter().map(|e| self.join_entry(e, &nested)).collect();
                Row::Day(d)
            }
            Row::RangeBooking(mut b) if wants("date_configs") => {
                let mut configs: Vec<DateConfig> = self
                    .rows
                    .iter()
                    .filter_map(|r| match r.value() {
                        Row::DateConfig(c) if c.booking_id == b.id => Some(c.clone()),
                        _ => None,
                    })
                    .collect();
                configs.sort_by_key(|c| (c.date, c.sort_key(), c.id));
                b.date_configs = configs;
                Row::RangeBooking(b)
            }
            Row::DateConfig(mut c) if wants("booking") => {
                c.booking = match self.raw(EntityKind::RangeBooking, c.booking_id) {
                    Some(Row::RangeBooking(b)) => Some(BookingRef::from(&b)),
                    _ => None,
                };
                Row::DateConfig(c)
            }
            other => other,
        }
    }

    fn join_entry(&self, mut entry: PointEntry, wants: &dyn Fn(&str) -> bool) -> PointEntry {
        if wants("day") {
            entry.day_date = match self.raw(EntityKind::Day, entry.day_id) {
                Some(Row::Day(d)) => Some(d.date),
                _ => None,
            };
        }
        if !wants("venue") {
            entry.venue_type = None;
        }
        if !wants("contact") {
            entry.contact = None;
        }
        entry
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, kind: EntityKind, scope: &Window) -> Result<Channel, FeedError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FeedError::Unavailable);
        }
        if let Some(reason) = self.refused.get(&kind) {
            return Err(FeedError::Rejected(reason.value().clone()));
        }

        let mut events = self
            .channels
            .entry(kind)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        let (tx, messages) = mpsc::channel(self.capacity);
        debug!("{kind} listener attached for {}..{}", scope.start_str, scope.end_str);

        tokio::spawn(async move {
            if tx.send(ChannelMessage::Status(ChannelStatus::Subscribed)).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if tx.send(ChannelMessage::Change(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("{kind} listener lagged by {n} events");
                            let status = ChannelStatus::ChannelError(format!("lagged by {n} events"));
                            if tx.send(ChannelMessage::Status(status)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => {
                            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Closed)).await;
                            break;
                        }
                    },
                }
            }
            debug!("{kind} listener released");
        });

        Ok(Channel { kind, messages })
    }
}

#[async_trait]
impl PointRead for MemoryBackend {
    async fn get(
        &self,
        kind: EntityKind,
        id: EntityId,
        relations: &[&str],
    ) -> Result<Option<Row>, ReadError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(ReadError::Transport("connection reset".into()));
        }
        Ok(self.raw(kind, id).map(|row| self.join(row, relations)))
    }
}

#[async_trait]
impl SnapshotSource for MemoryBackend {
    async fn load(&self, window: &Window) -> Result<Snapshot, ReadError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(ReadError::Transport("connection reset".into()));
        }
        let raw: Vec<Row> = self.rows.iter().map(|r| r.value().clone()).collect();
        let mut snapshot = Snapshot::default();
        for row in raw {
            // entries are listed on their own, not under their day
            let relations: &[&str] = match row.kind() {
                EntityKind::Day => &[],
                kind => kind.relations(),
            };
            let row = self.join(row, relations);
            if in_window(&row, window) {
                snapshot.push(row);
            }
        }
        Ok(snapshot)
    }
}

fn in_window(row: &Row, window: &Window) -> bool {
    let extent = match row {
        Row::Day(d) => d.extent(),
        Row::ProgramEntry(e) | Row::Reservation(e) => e.extent(),
        Row::RangeBooking(b) => b.extent(),
        Row::DateConfig(c) => c.extent(),
    };
    extent.is_some_and(|e| window.admits(&e))
}

/// Relations are resolved on read, never stored.
fn strip_relations(row: Row) -> Row {
    match row {
        Row::ProgramEntry(mut e) => {
            e.day_date = None;
            Row::ProgramEntry(e)
        }
        Row::Reservation(mut e) => {
            e.day_date = None;
            Row::Reservation(e)
        }
        Row::RangeBooking(mut b) => {
            b.date_configs.clear();
            Row::RangeBooking(b)
        }
        Row::DateConfig(mut c) => {
            c.booking = None;
            Row::DateConfig(c)
        }
        Row::Day(mut d) => {
            d.entries.clear();
            Row::Day(d)
        }
    }
}

/// The `row` half of a tagged row value, as a feed payload carries it.
fn payload(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) => map.remove("row").unwrap_or(serde_json::Value::Null),
        other => other,
    }
}
