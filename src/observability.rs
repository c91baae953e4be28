use std::net::SocketAddr;

use crate::model::{ChangeType, EntityKind};

// ── Event flow ──────────────────────────────────────────────────

/// Counter: change events received. Labels: kind, change.
pub const EVENTS_TOTAL: &str = "windowsync_events_total";

/// Counter: changes that did not alter the view. Labels: kind, reason.
pub const EVENTS_DROPPED_TOTAL: &str = "windowsync_events_dropped_total";

/// Histogram: point-read latency in seconds. Labels: kind.
pub const POINT_READ_DURATION_SECONDS: &str = "windowsync_point_read_duration_seconds";

/// Gauge: point-reads dispatched but not yet applied.
pub const POINT_READS_IN_FLIGHT: &str = "windowsync_point_reads_in_flight";

// ── Channels ────────────────────────────────────────────────────

/// Gauge: open change-feed channels.
pub const CHANNELS_ACTIVE: &str = "windowsync_channels_active";

/// Counter: window changes that tore down and reopened channels.
pub const RESUBSCRIBES_TOTAL: &str = "windowsync_resubscribes_total";

/// Counter: channel errors. Labels: kind.
pub const CHANNEL_ERRORS_TOTAL: &str = "windowsync_channel_errors_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

/// Count one received change.
pub fn record_event(kind: EntityKind, change: ChangeType) {
    metrics::counter!(EVENTS_TOTAL, "kind" => kind.as_str(), "change" => change.as_str())
        .increment(1);
}
