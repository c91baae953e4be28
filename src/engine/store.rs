use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};

use crate::model::*;
use crate::window::{Extent, Window};

/// Orders present values ascending, with `None` after all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullsLast<T>(pub Option<T>);

impl<T: Ord> Ord for NullsLast<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl<T: Ord> PartialOrd for NullsLast<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A row that can live in a `Collection`.
pub trait Record: Clone {
    type Key: Ord + Clone;

    fn id(&self) -> EntityId;
    fn sort_key(&self) -> Self::Key;
    /// `None` when the row lacks what membership needs, e.g. an entry whose
    /// parent day was not joined.
    fn extent(&self) -> Option<Extent>;
}

impl Record for Day {
    type Key = NaiveDate;

    fn id(&self) -> EntityId {
        self.id
    }

    fn sort_key(&self) -> NaiveDate {
        self.date
    }

    fn extent(&self) -> Option<Extent> {
        Some(Extent::Point(self.date))
    }
}

impl Record for PointEntry {
    type Key = (NullsLast<NaiveDate>, NullsLast<NaiveTime>);

    fn id(&self) -> EntityId {
        self.id
    }

    fn sort_key(&self) -> Self::Key {
        (NullsLast(self.day_date), NullsLast(self.start_time))
    }

    fn extent(&self) -> Option<Extent> {
        self.day_date.map(Extent::Point)
    }
}

impl Record for RangeBooking {
    type Key = NaiveDate;

    fn id(&self) -> EntityId {
        self.id
    }

    fn sort_key(&self) -> NaiveDate {
        self.check_in
    }

    fn extent(&self) -> Option<Extent> {
        Some(Extent::Range {
            start: self.check_in,
            end: self.check_out,
        })
    }
}

impl Record for DateConfig {
    type Key = NullsLast<NaiveTime>;

    fn id(&self) -> EntityId {
        self.id
    }

    fn sort_key(&self) -> Self::Key {
        NullsLast(self.time)
    }

    fn extent(&self) -> Option<Extent> {
        Some(Extent::Point(self.date))
    }
}

/// Rows keyed by id, with a maintained index ordered by `(sort_key, id)`.
#[derive(Debug, Clone)]
pub struct Collection<T: Record> {
    rows: HashMap<EntityId, T>,
    order: BTreeSet<(T::Key, EntityId)>,
}

impl<T: Record> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            order: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.rows.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.rows.contains_key(&id)
    }

    /// Insert or replace by id, repositioning the row in sort order.
    pub fn upsert(&mut self, row: T) -> Option<T> {
        let id = row.id();
        let key = row.sort_key();
        let prev = self.rows.insert(id, row);
        if let Some(old) = &prev {
            self.order.remove(&(old.sort_key(), id));
        }
        self.order.insert((key, id));
        prev
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let row = self.rows.remove(&id)?;
        self.order.remove(&(row.sort_key(), id));
        Some(row)
    }

    /// Rows in sort order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|(_, id)| self.rows.get(id))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.order.iter().map(|(_, id)| *id).collect()
    }

    /// Keep rows matching `keep`; returns the rows removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> Vec<T> {
        let doomed: Vec<EntityId> = self
            .iter()
            .filter(|row| !keep(row))
            .map(Record::id)
            .collect();
        doomed.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.order.clear();
    }
}

/// Result of applying one change to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Row is in the window and was inserted or replaced.
    Upserted,
    /// Row left the window and its local copy was dropped.
    Evicted,
    /// Deleted upstream and dropped locally.
    Removed,
    /// Row is not held here, but a relation shown on held rows changed.
    Relinked,
    /// Nothing local to change.
    Ignored,
    /// Point-read found no row.
    NotFound,
    /// A newer change for the same entity was already applied.
    Stale,
}

impl Outcome {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Outcome::Upserted | Outcome::Evicted | Outcome::Removed | Outcome::Relinked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Upserted => "upserted",
            Outcome::Evicted => "evicted",
            Outcome::Removed => "removed",
            Outcome::Relinked => "relinked",
            Outcome::Ignored => "ignored",
            Outcome::NotFound => "not_found",
            Outcome::Stale => "stale",
        }
    }
}

/// Below this many remembered sequences the store does not bother pruning.
const PRUNE_FLOOR: usize = 1024;

/// Relations joined onto held rows, kept apart from the rows themselves so
/// a change on either side shows wherever it is referenced.
#[derive(Debug, Clone, Default)]
pub struct Relations {
    /// Every known config, including ones outside the window.
    configs: HashMap<EntityId, DateConfig>,
    bookings: HashMap<EntityId, BookingRef>,
}

impl Relations {
    pub fn booking(&self, id: EntityId) -> Option<&BookingRef> {
        self.bookings.get(&id)
    }

    pub fn config(&self, id: EntityId) -> Option<&DateConfig> {
        self.configs.get(&id)
    }

    /// Known configs grouped by booking, each ordered by date then time.
    pub fn configs_by_booking(&self) -> HashMap<EntityId, Vec<DateConfig>> {
        let mut grouped: HashMap<EntityId, Vec<DateConfig>> = HashMap::new();
        for config in self.configs.values() {
            grouped.entry(config.booking_id).or_default().push(config.clone());
        }
        for configs in grouped.values_mut() {
            configs.sort_by_key(|c| (c.date, NullsLast(c.time), c.id));
        }
        grouped
    }

    fn clear(&mut self) {
        self.configs.clear();
        self.bookings.clear();
    }
}

/// Normalized local view of everything inside the active window.
///
/// Every change carries the sequence number it was received with. While
/// older point-reads are still in flight, the store remembers the newest
/// sequence applied per entity and rejects results older than it. This
/// keeps a slow point-read from resurrecting a row that a later delete
/// already removed.
///
/// Entries are held only while their day is held. The others are parked
/// and promoted when the day arrives.
#[derive(Debug, Clone)]
pub struct Store {
    window: Window,
    days: Collection<Day>,
    program_entries: Collection<PointEntry>,
    reservations: Collection<PointEntry>,
    bookings: Collection<RangeBooking>,
    date_configs: Collection<DateConfig>,
    parked: HashMap<(EntityKind, EntityId), PointEntry>,
    relations: Relations,
    applied: HashMap<(EntityKind, EntityId), u64>,
    /// Sequences of point-reads dispatched and not yet applied.
    pending: BTreeSet<u64>,
    prune_at: usize,
    revision: u64,
}

impl Store {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            days: Collection::new(),
            program_entries: Collection::new(),
            reservations: Collection::new(),
            bookings: Collection::new(),
            date_configs: Collection::new(),
            parked: HashMap::new(),
            relations: Relations::default(),
            applied: HashMap::new(),
            pending: BTreeSet::new(),
            prune_at: PRUNE_FLOOR,
            revision: 0,
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Bumped on every effective mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn days(&self) -> &Collection<Day> {
        &self.days
    }

    pub fn program_entries(&self) -> &Collection<PointEntry> {
        &self.program_entries
    }

    pub fn reservations(&self) -> &Collection<PointEntry> {
        &self.reservations
    }

    pub fn bookings(&self) -> &Collection<RangeBooking> {
        &self.bookings
    }

    pub fn date_configs(&self) -> &Collection<DateConfig> {
        &self.date_configs
    }

    pub fn relations(&self) -> &Relations {
        &self.relations
    }

    pub fn contains(&self, kind: EntityKind, id: EntityId) -> bool {
        match kind {
            EntityKind::Day => self.days.contains(id),
            EntityKind::ProgramEntry => self.program_entries.contains(id),
            EntityKind::Reservation => self.reservations.contains(id),
            EntityKind::RangeBooking => self.bookings.contains(id),
            EntityKind::DateConfig => self.date_configs.contains(id),
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Day => self.days.len(),
            EntityKind::ProgramEntry => self.program_entries.len(),
            EntityKind::Reservation => self.reservations.len(),
            EntityKind::RangeBooking => self.bookings.len(),
            EntityKind::DateConfig => self.date_configs.len(),
        }
    }

    /// True if the entry is known but its day is not held.
    pub fn is_parked(&self, kind: EntityKind, id: EntityId) -> bool {
        self.parked.contains_key(&(kind, id))
    }

    /// Entities whose last applied sequence is still remembered.
    pub fn tracked(&self) -> usize {
        self.applied.len()
    }

    /// Register a point-read dispatched for change `seq`.
    pub fn begin_read(&mut self, seq: u64) {
        self.pending.insert(seq);
    }

    /// Replace everything with `snapshot` under a new window. `seq` is the
    /// sequence the next change will receive. Reads still in flight for a
    /// seeded row predate the snapshot and are rejected; any other late
    /// read is reconciled against the new window when it lands.
    pub fn reset(&mut self, window: Window, snapshot: Snapshot, seq: u64) {
        self.window = window;
        self.days.clear();
        self.program_entries.clear();
        self.reservations.clear();
        self.bookings.clear();
        self.date_configs.clear();
        self.parked.clear();
        self.relations.clear();

        for row in snapshot.into_rows() {
            let key = (row.kind(), row.id());
            self.place(row, seq);
            self.mark(key, seq);
        }
        self.revision += 1;
    }

    /// Apply the result of a point-read issued for change `seq`.
    pub fn apply_resolved(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        seq: u64,
        row: Option<Row>,
    ) -> Outcome {
        let key = (kind, id);
        let outcome = if self.is_stale(key, seq) {
            Outcome::Stale
        } else if let Some(row) = row {
            let outcome = self.place(row, seq);
            self.mark(key, seq);
            outcome
        } else {
            Outcome::NotFound
        };
        if outcome.changed() {
            self.revision += 1;
        }
        self.end_read(seq);
        outcome
    }

    /// Apply a delete notification. Absent ids are a no-op.
    pub fn apply_delete(&mut self, kind: EntityKind, id: EntityId, seq: u64) -> Outcome {
        let key = (kind, id);
        if self.is_stale(key, seq) {
            return Outcome::Stale;
        }
        self.mark(key, seq);
        let (removed, related) = match kind {
            EntityKind::Day => {
                let removed = self.days.remove(id).is_some();
                self.release_day(id, false);
                (removed, false)
            }
            EntityKind::ProgramEntry | EntityKind::Reservation => {
                self.parked.remove(&key);
                (self.entries_mut(kind).remove(id).is_some(), false)
            }
            EntityKind::RangeBooking => {
                let related = self.relations.bookings.remove(&id).is_some()
                    && self.date_configs.iter().any(|c| c.booking_id == id);
                (self.bookings.remove(id).is_some(), related)
            }
            EntityKind::DateConfig => {
                let related = self
                    .relations
                    .configs
                    .remove(&id)
                    .is_some_and(|c| self.bookings.contains(c.booking_id));
                (self.date_configs.remove(id).is_some(), related)
            }
        };
        let outcome = if removed {
            Outcome::Removed
        } else if related {
            Outcome::Relinked
        } else {
            Outcome::Ignored
        };
        if outcome.changed() {
            self.revision += 1;
        }
        outcome
    }

    fn is_stale(&self, key: (EntityKind, EntityId), seq: u64) -> bool {
        self.applied.get(&key).is_some_and(|&last| last > seq)
    }

    /// Remember `seq` for `key`, but only while some read could still land
    /// behind it.
    fn mark(&mut self, key: (EntityKind, EntityId), seq: u64) {
        if self.pending.is_empty() {
            return;
        }
        let last = self.applied.entry(key).or_insert(seq);
        *last = (*last).max(seq);
    }

    /// Retire read `seq`. A remembered sequence only matters to reads older
    /// than it, so anything at or below the oldest pending read is dropped.
    fn end_read(&mut self, seq: u64) {
        self.pending.remove(&seq);
        match self.pending.first() {
            None => {
                self.applied.clear();
                self.prune_at = PRUNE_FLOOR;
            }
            Some(&oldest) if self.applied.len() >= self.prune_at => {
                self.applied.retain(|_, last| *last > oldest);
                self.prune_at = (self.applied.len() * 2).max(PRUNE_FLOOR);
            }
            Some(_) => {}
        }
    }

    /// Upsert or evict depending on window membership, and record the
    /// row's relations.
    fn place(&mut self, row: Row, seq: u64) -> Outcome {
        match row {
            Row::Day(mut day) => {
                let entries = std::mem::take(&mut day.entries);
                let (id, date) = (day.id, day.date);
                let outcome = admit(&self.window, &mut self.days, day);
                match outcome {
                    Outcome::Upserted => {
                        self.attach_day(id, date);
                        for entry in entries {
                            self.adopt(entry, seq);
                        }
                    }
                    Outcome::Evicted => self.release_day(id, true),
                    _ => {}
                }
                outcome
            }
            Row::ProgramEntry(e) => self.place_entry(EntityKind::ProgramEntry, e),
            Row::Reservation(e) => self.place_entry(EntityKind::Reservation, e),
            Row::RangeBooking(mut booking) => {
                let listed = std::mem::take(&mut booking.date_configs);
                let related = self.link_booking(&booking, listed, seq);
                relinked(admit(&self.window, &mut self.bookings, booking), related)
            }
            Row::DateConfig(mut config) => {
                let parent = config.booking.take();
                let related = self.link_config(&config, parent, seq);
                relinked(admit(&self.window, &mut self.date_configs, config), related)
            }
        }
    }

    fn entries_mut(&mut self, kind: EntityKind) -> &mut Collection<PointEntry> {
        match kind {
            EntityKind::Reservation => &mut self.reservations,
            _ => &mut self.program_entries,
        }
    }

    /// An entry is in the window exactly when its day is held.
    fn place_entry(&mut self, kind: EntityKind, mut entry: PointEntry) -> Outcome {
        let id = entry.id;
        match self.days.get(entry.day_id).map(|d| d.date) {
            Some(date) => {
                entry.day_date = Some(date);
                self.parked.remove(&(kind, id));
                self.entries_mut(kind).upsert(entry);
                Outcome::Upserted
            }
            None => {
                self.parked.insert((kind, id), entry);
                if self.entries_mut(kind).remove(id).is_some() {
                    Outcome::Evicted
                } else {
                    Outcome::Ignored
                }
            }
        }
    }

    /// Entry listed on a day read for change `seq`.
    fn adopt(&mut self, entry: PointEntry, seq: u64) {
        let kind = entry.kind();
        let key = (kind, entry.id);
        if !self.is_stale(key, seq) {
            self.place_entry(kind, entry);
            self.mark(key, seq);
        }
    }

    /// Re-date a held day's entries and promote the ones parked for it.
    fn attach_day(&mut self, day_id: EntityId, date: NaiveDate) {
        redate(&mut self.program_entries, day_id, date);
        redate(&mut self.reservations, day_id, date);
        let waiting: Vec<(EntityKind, EntityId)> = self
            .parked
            .iter()
            .filter(|(_, e)| e.day_id == day_id)
            .map(|(key, _)| *key)
            .collect();
        for key in waiting {
            if let Some(mut entry) = self.parked.remove(&key) {
                entry.day_date = Some(date);
                self.entries_mut(key.0).upsert(entry);
            }
        }
    }

    /// Entries leave with their day. An evicted day's entries are parked in
    /// case it returns; a deleted day's are dropped.
    fn release_day(&mut self, day_id: EntityId, park: bool) {
        let mut released = 0;
        for kind in [EntityKind::ProgramEntry, EntityKind::Reservation] {
            let removed = self.entries_mut(kind).retain(|e| e.day_id != day_id);
            released += removed.len();
            if park {
                for entry in removed {
                    self.parked.insert((kind, entry.id), entry);
                }
            }
        }
        if !park {
            self.parked.retain(|_, e| e.day_id != day_id);
        }
        if released > 0 {
            tracing::debug!("day {day_id} gone from window: released {released} entries");
        }
    }

    /// Record a resolved booking's summary and config list. Returns whether
    /// a held row's joined view changed.
    fn link_booking(&mut self, booking: &RangeBooking, listed: Vec<DateConfig>, seq: u64) -> bool {
        let mut related = false;
        let summary = BookingRef::from(booking);
        if self.relations.bookings.get(&booking.id) != Some(&summary) {
            related |= self.date_configs.iter().any(|c| c.booking_id == booking.id);
            self.relations.bookings.insert(booking.id, summary);
        }

        // configs missing from the list moved to another booking or are gone
        let ids: HashSet<EntityId> = listed.iter().map(|c| c.id).collect();
        let unlisted: Vec<EntityId> = self
            .relations
            .configs
            .values()
            .filter(|c| c.booking_id == booking.id && !ids.contains(&c.id))
            .map(|c| c.id)
            .collect();
        for id in unlisted {
            if !self.is_stale((EntityKind::DateConfig, id), seq) {
                self.relations.configs.remove(&id);
            }
        }

        for mut config in listed {
            let key = (EntityKind::DateConfig, config.id);
            if self.is_stale(key, seq) {
                continue;
            }
            config.booking = None;
            self.relations.configs.insert(config.id, config.clone());
            related |= admit(&self.window, &mut self.date_configs, config).changed();
            self.mark(key, seq);
        }
        related
    }

    /// Record a resolved config and the booking summary it carries.
    fn link_config(&mut self, config: &DateConfig, parent: Option<BookingRef>, seq: u64) -> bool {
        let mut related = false;
        if let Some(parent) = parent
            && !self.is_stale((EntityKind::RangeBooking, parent.id), seq)
            && self.relations.bookings.get(&parent.id) != Some(&parent)
        {
            related |= self
                .date_configs
                .iter()
                .any(|c| c.booking_id == parent.id && c.id != config.id);
            self.relations.bookings.insert(parent.id, parent);
        }

        let previous = self.relations.configs.insert(config.id, config.clone());
        if previous.as_ref() != Some(config) {
            related |= self.bookings.contains(config.booking_id)
                || previous.is_some_and(|p| self.bookings.contains(p.booking_id));
        }
        related
    }
}

fn admit<T: Record>(window: &Window, coll: &mut Collection<T>, row: T) -> Outcome {
    if row.extent().is_some_and(|e| window.admits(&e)) {
        coll.upsert(row);
        Outcome::Upserted
    } else if coll.remove(row.id()).is_some() {
        Outcome::Evicted
    } else {
        Outcome::Ignored
    }
}

fn relinked(outcome: Outcome, related: bool) -> Outcome {
    if related && !outcome.changed() {
        Outcome::Relinked
    } else {
        outcome
    }
}

fn redate(coll: &mut Collection<PointEntry>, day_id: EntityId, date: NaiveDate) {
    let moved: Vec<PointEntry> = coll
        .iter()
        .filter(|e| e.day_id == day_id && e.day_date != Some(date))
        .cloned()
        .collect();
    for mut entry in moved {
        entry.day_date = Some(date);
        coll.upsert(entry);
    }
}
