use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{FeedError, ReadError};
use crate::model::{ChangeEvent, EntityId, EntityKind, Row, Snapshot};
use crate::window::Window;

/// Lifecycle callbacks a channel reports alongside its change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// A live subscription for one entity kind. Dropping the receiver releases
/// the listener on the feed side.
pub struct Channel {
    pub kind: EntityKind,
    pub messages: mpsc::Receiver<ChannelMessage>,
}

/// Remote change feed. Delivery is at-most-once per change, with no ordering
/// across kinds and best-effort ordering within one channel.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, kind: EntityKind, scope: &Window) -> Result<Channel, FeedError>;
}

/// Authoritative single-row read with joined relations.
#[async_trait]
pub trait PointRead: Send + Sync {
    async fn get(
        &self,
        kind: EntityKind,
        id: EntityId,
        relations: &[&str],
    ) -> Result<Option<Row>, ReadError>;
}

/// Loader for the rows that seed a window before change events take over.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load(&self, window: &Window) -> Result<Snapshot, ReadError>;
}
