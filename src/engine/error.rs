use crate::model::{EntityId, EntityKind};

/// Non-fatal conditions raised inside the sync loop. None of these stop the
/// engine; they are logged, surfaced via the connection state, or absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A channel failed to establish or errored after establishing.
    Subscription { kind: EntityKind, message: String },
    /// A point-read after an event failed. The event is dropped.
    Resolution {
        kind: EntityKind,
        id: EntityId,
        message: String,
    },
    /// Period selector could not be parsed. The default window is used.
    WindowCompute(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Subscription { kind, message } => {
                write!(f, "{kind} channel error: {message}")
            }
            SyncError::Resolution { kind, id, message } => {
                write!(f, "point-read of {kind} {id} failed: {message}")
            }
            SyncError::WindowCompute(msg) => write!(f, "window error: {msg}"),
        }
    }
}

impl std::error::Error for SyncError {}

/// Failure of a point-read or snapshot load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    Transport(String),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for ReadError {}

/// Failure to open a change-feed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    Rejected(String),
    Unavailable,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Rejected(msg) => write!(f, "subscription rejected: {msg}"),
            FeedError::Unavailable => write!(f, "change feed unavailable"),
        }
    }
}

impl std::error::Error for FeedError {}

#[derive(Debug)]
pub enum EngineError {
    /// The snapshot for a new window could not be loaded; the previous
    /// window stays active.
    Snapshot(ReadError),
    ShutDown,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Snapshot(e) => write!(f, "snapshot load failed: {e}"),
            EngineError::ShutDown => write!(f, "engine shut down"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ReadError> for EngineError {
    fn from(e: ReadError) -> Self {
        EngineError::Snapshot(e)
    }
}
