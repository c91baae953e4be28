use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::feed::ChannelStatus;
use crate::model::EntityKind;
use crate::observability;

use super::SyncError;

/// Aggregate health of all channels, as shown to presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub connection_error: Option<String>,
}

/// Folds per-channel lifecycle callbacks into one `ConnectionState`.
///
/// Only the primary channel drives `is_connected`; other channels' errors
/// set `connection_error` without disconnecting. With `strict` set, any
/// failed or closed channel disconnects. The error clears once every failed
/// channel has subscribed again.
pub struct ConnectionTracker {
    primary: EntityKind,
    strict: bool,
    health: Mutex<Health>,
    state: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Health {
    primary_up: bool,
    failed: BTreeSet<EntityKind>,
    last_error: Option<String>,
}

impl ConnectionTracker {
    pub fn new(primary: EntityKind, strict: bool) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            primary,
            strict,
            health: Mutex::new(Health::default()),
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn record(&self, kind: EntityKind, status: &ChannelStatus) {
        let primary = kind == self.primary;
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        match status {
            ChannelStatus::Subscribed => {
                health.failed.remove(&kind);
                if primary {
                    info!("{kind} channel subscribed");
                    health.primary_up = true;
                }
            }
            ChannelStatus::ChannelError(message) => {
                health.fail(kind, message.clone());
            }
            ChannelStatus::TimedOut => {
                health.fail(kind, "timed out".into());
            }
            ChannelStatus::Closed => {
                if primary {
                    info!("{kind} channel closed");
                    health.primary_up = false;
                } else if self.strict {
                    health.failed.insert(kind);
                }
            }
        }

        let next = ConnectionState {
            is_connected: health.primary_up && (!self.strict || health.failed.is_empty()),
            connection_error: if health.failed.is_empty() {
                None
            } else {
                health.last_error.clone()
            },
        };
        drop(health);
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

impl Health {
    fn fail(&mut self, kind: EntityKind, message: String) {
        let err = SyncError::Subscription { kind, message };
        warn!("{err}");
        metrics::counter!(observability::CHANNEL_ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
        self.failed.insert(kind);
        self.last_error = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_subscribe_connects() {
        let t = ConnectionTracker::new(EntityKind::Day, false);
        assert!(!t.state().is_connected);
        t.record(EntityKind::RangeBooking, &ChannelStatus::Subscribed);
        assert!(!t.state().is_connected);
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        assert_eq!(
            t.state(),
            ConnectionState {
                is_connected: true,
                connection_error: None
            }
        );
    }

    #[test]
    fn secondary_error_keeps_connected() {
        let t = ConnectionTracker::new(EntityKind::Day, false);
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        t.record(EntityKind::DateConfig, &ChannelStatus::ChannelError("boom".into()));
        let s = t.state();
        assert!(s.is_connected);
        assert_eq!(s.connection_error.as_deref(), Some("date_config channel error: boom"));
    }

    #[test]
    fn secondary_close_keeps_connected() {
        let t = ConnectionTracker::new(EntityKind::Day, false);
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        t.record(EntityKind::Reservation, &ChannelStatus::Closed);
        assert!(t.state().is_connected);
    }

    #[test]
    fn primary_close_disconnects() {
        let t = ConnectionTracker::new(EntityKind::Day, false);
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        t.record(EntityKind::Day, &ChannelStatus::Closed);
        assert!(!t.state().is_connected);
    }

    #[test]
    fn strict_mode_disconnects_on_any_error() {
        let t = ConnectionTracker::new(EntityKind::Day, true);
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        t.record(EntityKind::RangeBooking, &ChannelStatus::TimedOut);
        let s = t.state();
        assert!(!s.is_connected);
        assert_eq!(s.connection_error.as_deref(), Some("range_booking channel error: timed out"));
    }

    #[test]
    fn error_clears_once_all_failed_channels_recover() {
        let t = ConnectionTracker::new(EntityKind::Day, false);
        t.record(EntityKind::Reservation, &ChannelStatus::ChannelError("lost".into()));
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        assert!(t.state().connection_error.is_some());
        t.record(EntityKind::Reservation, &ChannelStatus::Subscribed);
        assert_eq!(t.state().connection_error, None);
    }

    #[test]
    fn strict_mode_disconnects_on_secondary_close() {
        let t = ConnectionTracker::new(EntityKind::Day, true);
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        t.record(EntityKind::Reservation, &ChannelStatus::Closed);
        assert!(!t.state().is_connected);
        t.record(EntityKind::Reservation, &ChannelStatus::Subscribed);
        assert!(t.state().is_connected);
    }

    #[test]
    fn resubscribe_clears_error() {
        let t = ConnectionTracker::new(EntityKind::Day, false);
        t.record(EntityKind::Day, &ChannelStatus::ChannelError("lost".into()));
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        assert_eq!(t.state().connection_error, None);
    }

    #[tokio::test]
    async fn watchers_see_changes_only() {
        let t = ConnectionTracker::new(EntityKind::Day, false);
        let mut rx = t.subscribe();
        t.record(EntityKind::RangeBooking, &ChannelStatus::Subscribed);
        assert!(!rx.has_changed().unwrap());
        t.record(EntityKind::Day, &ChannelStatus::Subscribed);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_connected);
    }
}
