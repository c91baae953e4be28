use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::feed::{Channel, ChangeFeed, ChannelMessage, ChannelStatus};
use crate::model::EntityKind;
use crate::observability;
use crate::window::{Window, WindowKey};

use super::connection::ConnectionTracker;
use super::reconcile::Reconciler;

/// Lifecycle of one channel as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Subscribing,
    Subscribed,
    Error,
    Closed,
}

impl From<&ChannelStatus> for ChannelState {
    fn from(status: &ChannelStatus) -> Self {
        match status {
            ChannelStatus::Subscribed => ChannelState::Subscribed,
            ChannelStatus::ChannelError(_) | ChannelStatus::TimedOut => ChannelState::Error,
            ChannelStatus::Closed => ChannelState::Closed,
        }
    }
}

struct OpenChannel {
    kind: EntityKind,
    task: JoinHandle<()>,
}

/// Owns one live channel per entity kind, scoped to the current window.
pub struct SubscriptionManager {
    feed: Arc<dyn ChangeFeed>,
    reconciler: Arc<Reconciler>,
    tracker: Arc<ConnectionTracker>,
    states: Arc<DashMap<EntityKind, ChannelState>>,
    open: Vec<OpenChannel>,
    key: Option<WindowKey>,
}

impl SubscriptionManager {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        reconciler: Arc<Reconciler>,
        tracker: Arc<ConnectionTracker>,
    ) -> Self {
        let states = DashMap::new();
        for kind in EntityKind::ALL {
            states.insert(kind, ChannelState::Idle);
        }
        Self {
            feed,
            reconciler,
            tracker,
            states: Arc::new(states),
            open: Vec::new(),
            key: None,
        }
    }

    /// True if channels are open for exactly this window.
    pub fn is_current(&self, window: &Window) -> bool {
        self.key.as_ref() == Some(&window.key())
    }

    pub fn state(&self, kind: EntityKind) -> ChannelState {
        self.states
            .get(&kind)
            .map(|s| *s.value())
            .unwrap_or(ChannelState::Idle)
    }

    /// Open one channel per kind, in registration order.
    pub async fn open_all(&mut self, window: &Window) {
        debug_assert!(self.open.is_empty(), "open_all with live channels");
        for kind in EntityKind::ALL {
            self.open(kind, window).await;
        }
        self.key = Some(window.key());
        info!(
            "subscribed {} channels for {}..{}",
            self.open.len(),
            window.start_str,
            window.end_str
        );
    }

    /// Close every open channel and wait for its pump to stop, so no
    /// listener outlives the window it was opened for.
    pub async fn close_all(&mut self) {
        if self.open.is_empty() && self.key.is_none() {
            return;
        }
        let open: Vec<OpenChannel> = self.open.drain(..).collect();
        for channel in &open {
            channel.task.abort();
        }
        let kinds: Vec<EntityKind> = open.iter().map(|c| c.kind).collect();
        let results = join_all(open.into_iter().map(|c| c.task)).await;
        for (kind, result) in kinds.into_iter().zip(results) {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                warn!("{kind} channel pump failed: {e}");
            }
            metrics::gauge!(observability::CHANNELS_ACTIVE).decrement(1.0);
            self.states.insert(kind, ChannelState::Closed);
            self.tracker.record(kind, &ChannelStatus::Closed);
        }
        self.key = None;
        debug!("all channels closed");
    }

    async fn open(&mut self, kind: EntityKind, window: &Window) {
        self.states.insert(kind, ChannelState::Subscribing);
        match self.feed.subscribe(kind, window).await {
            Ok(channel) => {
                metrics::gauge!(observability::CHANNELS_ACTIVE).increment(1.0);
                let task = tokio::spawn(pump(
                    channel,
                    Arc::clone(&self.reconciler),
                    Arc::clone(&self.tracker),
                    Arc::clone(&self.states),
                ));
                self.open.push(OpenChannel { kind, task });
            }
            Err(e) => {
                self.states.insert(kind, ChannelState::Error);
                self.tracker
                    .record(kind, &ChannelStatus::ChannelError(e.to_string()));
            }
        }
    }
}

/// Forward one channel's messages until it ends or is aborted.
async fn pump(
    mut channel: Channel,
    reconciler: Arc<Reconciler>,
    tracker: Arc<ConnectionTracker>,
    states: Arc<DashMap<EntityKind, ChannelState>>,
) {
    let kind = channel.kind;
    while let Some(msg) = channel.messages.recv().await {
        match msg {
            ChannelMessage::Status(status) => {
                states.insert(kind, ChannelState::from(&status));
                tracker.record(kind, &status);
                if status == ChannelStatus::Closed {
                    break;
                }
            }
            ChannelMessage::Change(event) if event.kind == kind => {
                reconciler.dispatch(event).await;
            }
            ChannelMessage::Change(event) => {
                warn!("{kind} channel delivered a {} event; dropping", event.kind);
            }
        }
    }
    debug!("{kind} channel ended");
}
