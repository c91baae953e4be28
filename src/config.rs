use std::path::PathBuf;

use chrono_tz::Tz;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Runtime settings, read from `WINDOWSYNC_*` environment variables.
/// Unparsable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Zone whose calendar date is "today".
    pub timezone: Tz,
    /// Initial `YYYY-MM` selector; `None` means the current month.
    pub period: Option<String>,
    /// Any channel error or close disconnects, not just the primary's.
    pub strict_health: bool,
    pub channel_capacity: usize,
    pub metrics_port: Option<u16>,
    /// JSON snapshot loaded into the in-memory backend at startup.
    pub fixture: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            period: None,
            strict_health: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            metrics_port: None,
            fixture: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let timezone = match lookup("WINDOWSYNC_TZ") {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|e| {
                tracing::warn!("WINDOWSYNC_TZ: {e}; using {}", defaults.timezone);
                defaults.timezone
            }),
            None => defaults.timezone,
        };
        let strict_health = lookup("WINDOWSYNC_STRICT_HEALTH")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.strict_health);
        let channel_capacity = lookup("WINDOWSYNC_CHANNEL_CAPACITY")
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.channel_capacity);

        Self {
            timezone,
            period: lookup("WINDOWSYNC_PERIOD").filter(|s| !s.is_empty()),
            strict_health,
            channel_capacity,
            metrics_port: lookup("WINDOWSYNC_METRICS_PORT").and_then(|s| s.parse().ok()),
            fixture: lookup("WINDOWSYNC_FIXTURE").map(PathBuf::from),
        }
    }
}
