use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Server-assigned row identity.
pub type EntityId = i64;

/// The entity collections mirrored locally. Declaration order is channel
/// registration order; the first kind owns the primary channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Day,
    ProgramEntry,
    Reservation,
    RangeBooking,
    DateConfig,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Day,
        EntityKind::ProgramEntry,
        EntityKind::Reservation,
        EntityKind::RangeBooking,
        EntityKind::DateConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Day => "day",
            EntityKind::ProgramEntry => "program_entry",
            EntityKind::Reservation => "reservation",
            EntityKind::RangeBooking => "range_booking",
            EntityKind::DateConfig => "date_config",
        }
    }

    /// Relations joined by the point-read for this kind.
    pub fn relations(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Day => &["entries"],
            EntityKind::ProgramEntry | EntityKind::Reservation => &["day", "venue", "contact"],
            EntityKind::RangeBooking => &["date_configs"],
            EntityKind::DateConfig => &["booking"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

/// A calendar day. At most one per date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Day {
    pub id: EntityId,
    pub date: NaiveDate,
    /// Denormalized weekday label ("Mon", "Tue", ...).
    #[serde(default)]
    pub weekday: String,
    /// Joined relation: the day's entries ordered by start time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<PointEntry>,
}

impl Day {
    pub fn new(id: EntityId, date: NaiveDate) -> Self {
        Self {
            id,
            date,
            weekday: date.format("%a").to_string(),
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Golf,
    Event,
    Reservation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A per-day scheduled entry (program entry or reservation).
///
/// `day_date`, `venue_type` and `contact` are relations filled in by the
/// point-read; change-feed payloads never carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointEntry {
    pub id: EntityId,
    pub day_id: EntityId,
    pub entry_type: EntryType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub day_date: Option<NaiveDate>,
    #[serde(default)]
    pub venue_type: Option<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
}

impl PointEntry {
    /// Reservations live in their own collection; every other type is a
    /// program entry.
    pub fn kind(&self) -> EntityKind {
        match self.entry_type {
            EntryType::Reservation => EntityKind::Reservation,
            EntryType::Golf | EntryType::Event => EntityKind::ProgramEntry,
        }
    }
}

/// Hotel-style booking over the half-open interval `[check_in, check_out)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBooking {
    pub id: EntityId,
    pub guest_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default = "default_rooms")]
    pub room_count: u32,
    /// Joined relation, ordered by date.
    #[serde(default)]
    pub date_configs: Vec<DateConfig>,
}

fn default_rooms() -> u32 {
    1
}

/// Summary of the booking a `DateConfig` belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRef {
    pub id: EntityId,
    pub guest_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl From<&RangeBooking> for BookingRef {
    fn from(b: &RangeBooking) -> Self {
        Self {
            id: b.id,
            guest_name: b.guest_name.clone(),
            check_in: b.check_in,
            check_out: b.check_out,
        }
    }
}

/// Per-day configuration (e.g. breakfast setup) attached to a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateConfig {
    pub id: EntityId,
    pub booking_id: EntityId,
    pub date: NaiveDate,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub headcount: u32,
    /// Price per head in minor currency units.
    #[serde(default)]
    pub unit_price: i64,
    #[serde(default)]
    pub booking: Option<BookingRef>,
}

impl DateConfig {
    pub fn total(&self) -> i64 {
        i64::from(self.headcount) * self.unit_price
    }
}

/// A fully resolved row of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "row", rename_all = "snake_case")]
pub enum Row {
    Day(Day),
    ProgramEntry(PointEntry),
    Reservation(PointEntry),
    RangeBooking(RangeBooking),
    DateConfig(DateConfig),
}

impl Row {
    pub fn kind(&self) -> EntityKind {
        match self {
            Row::Day(_) => EntityKind::Day,
            Row::ProgramEntry(_) => EntityKind::ProgramEntry,
            Row::Reservation(_) => EntityKind::Reservation,
            Row::RangeBooking(_) => EntityKind::RangeBooking,
            Row::DateConfig(_) => EntityKind::DateConfig,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Row::Day(d) => d.id,
            Row::ProgramEntry(e) | Row::Reservation(e) => e.id,
            Row::RangeBooking(b) => b.id,
            Row::DateConfig(c) => c.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "insert",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

/// One change-feed notification. Payloads are raw rows without relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub change: ChangeType,
    pub id: EntityId,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
    #[serde(default)]
    pub new: Option<serde_json::Value>,
}

/// Initial rows for one window activation. Also the fixture file format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub days: Vec<Day>,
    pub program_entries: Vec<PointEntry>,
    pub reservations: Vec<PointEntry>,
    pub bookings: Vec<RangeBooking>,
    pub date_configs: Vec<DateConfig>,
}

impl Snapshot {
    pub fn into_rows(self) -> impl Iterator<Item = Row> {
        let days = self.days.into_iter().map(Row::Day);
        let programs = self.program_entries.into_iter().map(Row::ProgramEntry);
        let reservations = self.reservations.into_iter().map(Row::Reservation);
        let bookings = self.bookings.into_iter().map(Row::RangeBooking);
        let configs = self.date_configs.into_iter().map(Row::DateConfig);
        days.chain(programs)
            .chain(reservations)
            .chain(bookings)
            .chain(configs)
    }

    pub fn push(&mut self, row: Row) {
        match row {
            Row::Day(d) => self.days.push(d),
            Row::ProgramEntry(e) => self.program_entries.push(e),
            Row::Reservation(e) => self.reservations.push(e),
            Row::RangeBooking(b) => self.bookings.push(b),
            Row::DateConfig(c) => self.date_configs.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn day_weekday_label() {
        let d = Day::new(1, date("2024-12-02"));
        assert_eq!(d.weekday, "Mon");
    }

    #[test]
    fn kind_parse_and_display() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.to_string().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("hotel".parse::<EntityKind>().is_err());
    }

    #[test]
    fn date_config_total() {
        let c = DateConfig {
            id: 1,
            booking_id: 2,
            date: date("2024-01-05"),
            time: None,
            headcount: 3,
            unit_price: 1500,
            booking: None,
        };
        assert_eq!(c.total(), 4500);
    }

    #[test]
    fn row_tagged_json() {
        let json = r#"{"kind":"day","row":{"id":4,"date":"2024-01-03"}}"#;
        let row: Row = serde_json::from_str(json).unwrap();
        assert_eq!(row.kind(), EntityKind::Day);
        assert_eq!(row.id(), 4);
    }

    #[test]
    fn snapshot_rows_keep_kinds() {
        let mut snap = Snapshot::default();
        snap.push(Row::Day(Day::new(1, date("2024-01-01"))));
        snap.push(Row::RangeBooking(RangeBooking {
            id: 9,
            guest_name: "Ito".into(),
            check_in: date("2024-01-02"),
            check_out: date("2024-01-04"),
            room_count: 1,
            date_configs: vec![],
        }));
        let kinds: Vec<_> = snap.into_rows().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![EntityKind::Day, EntityKind::RangeBooking]);
    }

    #[test]
    fn entry_kind_follows_type() {
        let mut e = PointEntry {
            id: 1,
            day_id: 1,
            entry_type: EntryType::Event,
            title: None,
            start_time: None,
            day_date: None,
            venue_type: None,
            contact: None,
        };
        assert_eq!(e.kind(), EntityKind::ProgramEntry);
        e.entry_type = EntryType::Reservation;
        assert_eq!(e.kind(), EntityKind::Reservation);
    }
}
