use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::model::*;
use crate::window::Window;

use super::connection::ConnectionState;
use super::store::{Collection, Record, Store};

/// A day with its entries, ordered by start time (untimed last).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayView {
    #[serde(flatten)]
    pub day: Day,
    pub program_entries: Vec<PointEntry>,
    pub reservations: Vec<PointEntry>,
}

/// Everything presentation needs for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarView {
    pub window: Window,
    pub days: Vec<DayView>,
    pub bookings: Vec<RangeBooking>,
    pub date_configs: Vec<DateConfig>,
    #[serde(flatten)]
    pub connection: ConnectionState,
}

/// One collection plus connection health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityView {
    pub collection: Vec<Row>,
    #[serde(flatten)]
    pub connection: ConnectionState,
}

impl CalendarView {
    pub fn entity_view(&self, kind: EntityKind) -> EntityView {
        let collection = match kind {
            EntityKind::Day => self.days.iter().map(|d| Row::Day(d.day.clone())).collect(),
            EntityKind::ProgramEntry => self
                .days
                .iter()
                .flat_map(|d| d.program_entries.iter().cloned().map(Row::ProgramEntry))
                .collect(),
            EntityKind::Reservation => self
                .days
                .iter()
                .flat_map(|d| d.reservations.iter().cloned().map(Row::Reservation))
                .collect(),
            EntityKind::RangeBooking => self.bookings.iter().cloned().map(Row::RangeBooking).collect(),
            EntityKind::DateConfig => self.date_configs.iter().cloned().map(Row::DateConfig).collect(),
        };
        EntityView {
            collection,
            connection: self.connection.clone(),
        }
    }
}

pub fn assemble(store: &Store, connection: &ConnectionState) -> CalendarView {
    let mut programs = by_day(store.program_entries());
    let mut reservations = by_day(store.reservations());
    let days = store
        .days()
        .iter()
        .map(|day| DayView {
            day: day.clone(),
            program_entries: programs.remove(&day.id).unwrap_or_default(),
            reservations: reservations.remove(&day.id).unwrap_or_default(),
        })
        .collect();

    // nested relations come from the store's latest copies
    let relations = store.relations();
    let mut nested = relations.configs_by_booking();
    let bookings = store
        .bookings()
        .iter()
        .map(|b| RangeBooking {
            date_configs: nested.remove(&b.id).unwrap_or_default(),
            ..b.clone()
        })
        .collect();
    let date_configs = store
        .date_configs()
        .iter()
        .map(|c| DateConfig {
            booking: relations.booking(c.booking_id).cloned(),
            ..c.clone()
        })
        .collect();

    CalendarView {
        window: store.window().clone(),
        days,
        bookings,
        date_configs,
        connection: connection.clone(),
    }
}

fn by_day(entries: &Collection<PointEntry>) -> HashMap<EntityId, Vec<PointEntry>> {
    let mut grouped: HashMap<EntityId, Vec<PointEntry>> = HashMap::new();
    for entry in entries.iter() {
        grouped.entry(entry.day_id).or_default().push(entry.clone());
    }
    grouped
}

/// Memoized `assemble`, recomputed only when the store revision or the
/// connection state changed.
#[derive(Default)]
pub struct ViewCache {
    memo: Mutex<Option<Memo>>,
}

struct Memo {
    revision: u64,
    connection: ConnectionState,
    view: Arc<CalendarView>,
}

impl ViewCache {
    pub fn get(&self, store: &Store, connection: &ConnectionState) -> Arc<CalendarView> {
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(m) = memo.as_ref()
            && m.revision == store.revision()
            && m.connection == *connection
        {
            return Arc::clone(&m.view);
        }
        let view = Arc::new(assemble(store, connection));
        *memo = Some(Memo {
            revision: store.revision(),
            connection: connection.clone(),
            view: Arc::clone(&view),
        });
        view
    }
}

/// Ids in view order, handy for assertions and logging.
pub fn ids<T: Record>(rows: &[T]) -> Vec<EntityId> {
    rows.iter().map(Record::id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn entry(id: EntityId, day_id: EntityId, day: &str, at: Option<&str>) -> PointEntry {
        PointEntry {
            id,
            day_id,
            entry_type: EntryType::Event,
            title: Some(format!("entry {id}")),
            start_time: at.map(|t| t.parse().unwrap()),
            day_date: Some(date(day)),
            venue_type: Some("hall".into()),
            contact: None,
        }
    }

    fn seeded() -> Store {
        let window = Window::new(date("2024-01-01"), date("2024-01-31"));
        let mut store = Store::new(window.clone());
        let snapshot = Snapshot {
            days: vec![Day::new(2, date("2024-01-12")), Day::new(1, date("2024-01-10"))],
            program_entries: vec![
                entry(20, 1, "2024-01-10", None),
                entry(21, 1, "2024-01-10", Some("08:00:00")),
            ],
            reservations: vec![entry(30, 2, "2024-01-12", Some("18:30:00"))],
            bookings: vec![],
            date_configs: vec![],
        };
        store.reset(window, snapshot, 1);
        store
    }

    #[test]
    fn entries_grouped_under_days() {
        let view = assemble(&seeded(), &ConnectionState::default());
        let days: Vec<EntityId> = view.days.iter().map(|d| d.day.id).collect();
        assert_eq!(days, vec![1, 2]);
        assert_eq!(ids(&view.days[0].program_entries), vec![21, 20]);
        assert!(view.days[0].reservations.is_empty());
        assert_eq!(ids(&view.days[1].reservations), vec![30]);
    }

    #[test]
    fn entity_view_flattens_entries() {
        let view = assemble(&seeded(), &ConnectionState::default());
        let ev = view.entity_view(EntityKind::ProgramEntry);
        let got: Vec<EntityId> = ev.collection.iter().map(Row::id).collect();
        assert_eq!(got, vec![21, 20]);
        assert!(!ev.connection.is_connected);
    }

    #[test]
    fn cache_reuses_until_revision_changes() {
        let mut store = seeded();
        let cache = ViewCache::default();
        let conn = ConnectionState::default();
        let a = cache.get(&store, &conn);
        let b = cache.get(&store, &conn);
        assert!(Arc::ptr_eq(&a, &b));

        store.apply_delete(EntityKind::Day, 2, 5);
        let c = cache.get(&store, &conn);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.days.len(), 1);

        let connected = ConnectionState {
            is_connected: true,
            connection_error: None,
        };
        let d = cache.get(&store, &connected);
        assert!(!Arc::ptr_eq(&c, &d));
        assert!(d.connection.is_connected);
    }

    #[test]
    fn view_serializes_flat_connection() {
        let view = assemble(&seeded(), &ConnectionState::default());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["is_connected"], serde_json::Value::Bool(false));
        assert_eq!(json["days"][0]["date"], "2024-01-10");
        assert_eq!(json["window"]["start_str"], "2024-01-01");
    }

    #[test]
    fn nested_relations_follow_latest_rows() {
        let mut store = seeded();
        let config = |id: EntityId, day: &str, headcount: u32| DateConfig {
            id,
            booking_id: 10,
            date: date(day),
            time: None,
            headcount,
            unit_price: 1500,
            booking: None,
        };
        let booking = RangeBooking {
            id: 10,
            guest_name: "Lee".into(),
            check_in: date("2024-01-10"),
            check_out: date("2024-01-13"),
            room_count: 1,
            date_configs: vec![config(20, "2024-01-11", 2), config(21, "2024-01-10", 2)],
        };
        store.apply_resolved(EntityKind::RangeBooking, 10, 2, Some(Row::RangeBooking(booking.clone())));
        store.apply_resolved(EntityKind::DateConfig, 20, 3, Some(Row::DateConfig(config(20, "2024-01-11", 9))));
        store.apply_resolved(
            EntityKind::RangeBooking,
            10,
            4,
            Some(Row::RangeBooking(RangeBooking {
                guest_name: "Lee Park".into(),
                date_configs: vec![config(20, "2024-01-11", 9), config(21, "2024-01-10", 2)],
                ..booking
            })),
        );

        let view = assemble(&store, &ConnectionState::default());
        let nested: Vec<(EntityId, u32)> = view.bookings[0].date_configs.iter().map(|c| (c.id, c.headcount)).collect();
        assert_eq!(nested, vec![(21, 2), (20, 9)]);
        assert!(view
            .date_configs
            .iter()
            .all(|c| c.booking.as_ref().map(|b| b.guest_name.as_str()) == Some("Lee Park")));
    }
}
