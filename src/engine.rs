mod connection;
mod error;
mod reconcile;
mod resolver;
mod store;
mod subscription;
mod view;

pub use connection::{ConnectionState, ConnectionTracker};
pub use error::{EngineError, FeedError, ReadError, SyncError};
pub use reconcile::Reconciler;
pub use resolver::Resolver;
pub use store::{Collection, NullsLast, Outcome, Record, Store};
pub use subscription::{ChannelState, SubscriptionManager};
pub use view::{CalendarView, DayView, EntityView, ViewCache, assemble, ids};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use tokio::sync::{Mutex, watch};
use tracing::info;

use crate::config::Config;
use crate::feed::{ChangeFeed, PointRead, SnapshotSource};
use crate::model::EntityKind;
use crate::observability;
use crate::window::{self, Window};

/// Source of "today" in the reference timezone.
pub type TodayProvider = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Windowed view of the calendar kept current from the change feed.
///
/// `set_period` picks the window; everything else follows from it: the
/// snapshot seeds the store, channels open for the window, and events flow
/// through the reconciler until the window changes again.
pub struct Engine {
    snapshots: Arc<dyn SnapshotSource>,
    reconciler: Arc<Reconciler>,
    tracker: Arc<ConnectionTracker>,
    subscriptions: Mutex<SubscriptionManager>,
    views: ViewCache,
    today: TodayProvider,
    shut_down: AtomicBool,
}

impl Engine {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        reader: Arc<dyn PointRead>,
        snapshots: Arc<dyn SnapshotSource>,
        config: &Config,
    ) -> Self {
        let tz = config.timezone;
        let today: TodayProvider = Arc::new(move || window::today_in(tz));
        let reconciler = Reconciler::new(Window::for_period(None, today()), Resolver::new(reader));
        let tracker = Arc::new(ConnectionTracker::new(EntityKind::ALL[0], config.strict_health));
        let subscriptions =
            SubscriptionManager::new(feed, Arc::clone(&reconciler), Arc::clone(&tracker));
        Self {
            snapshots,
            reconciler,
            tracker,
            subscriptions: Mutex::new(subscriptions),
            views: ViewCache::default(),
            today,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_today_provider(mut self, today: TodayProvider) -> Self {
        self.today = today;
        self
    }

    /// Move to the window for `selector`. Returns `false` when the window
    /// bounds are unchanged and nothing was rebuilt. On snapshot failure the
    /// previous window stays live.
    pub async fn set_period(&self, selector: Option<&str>) -> Result<bool, EngineError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        let window = Window::for_period(selector, (self.today)());
        let mut subs = self.subscriptions.lock().await;
        if subs.is_current(&window) {
            return Ok(false);
        }

        let snapshot = self.snapshots.load(&window).await?;
        subs.close_all().await;
        self.reconciler.reset(window.clone(), snapshot).await;
        subs.open_all(&window).await;
        metrics::counter!(observability::RESUBSCRIBES_TOTAL).increment(1);
        info!("window now {}..{}", window.start_str, window.end_str);
        Ok(true)
    }

    pub async fn window(&self) -> Window {
        self.reconciler.store().read().await.window().clone()
    }

    /// Current assembled view; cheap when nothing changed since last call.
    pub async fn view(&self) -> Arc<CalendarView> {
        let store = self.reconciler.store().read().await;
        self.views.get(&store, &self.tracker.state())
    }

    pub fn connection(&self) -> ConnectionState {
        self.tracker.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.tracker.subscribe()
    }

    /// Store revision, bumped whenever the view would change.
    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.reconciler.subscribe_revision()
    }

    pub async fn channel_state(&self, kind: EntityKind) -> ChannelState {
        self.subscriptions.lock().await.state(kind)
    }

    /// Wait for in-flight point-reads to land.
    pub async fn settle(&self) {
        self.reconciler.settle().await;
    }

    /// Close all channels. Further `set_period` calls fail.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscriptions.lock().await.close_all().await;
        info!("engine shut down");
    }
}
