//! Poll pacing.

use std::time::Duration;

/// Poll interval table keyed by remaining seconds, plus the monitor's other
/// timing knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// `(remaining <= secs, interval)`, sorted by `secs` ascending.
    tiers: Vec<(u64, Duration)>,
    /// Interval when no tier matches.
    default_interval: Duration,
    /// Inside this many seconds the monitor reports a countdown on every poll.
    countdown_zone: u64,
    /// Minimum spacing of heartbeats outside the countdown zone.
    heartbeat_every: Duration,
    /// Wait after a failed poll.
    error_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![(10, Duration::from_millis(100))],
            default_interval: Duration::from_millis(500),
            countdown_zone: 10,
            heartbeat_every: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl PollPolicy {
    /// Two-speed policy: `fast` within `zone` seconds of the target, `slow`
    /// otherwise. The countdown zone matches the fast zone.
    pub fn two_speed(zone: u64, fast: Duration, slow: Duration) -> Self {
        Self {
            tiers: vec![(zone, fast)],
            default_interval: slow,
            countdown_zone: zone,
            ..Self::default()
        }
    }

    /// Add a tier; tiers stay sorted by threshold.
    pub fn with_tier(mut self, within_secs: u64, interval: Duration) -> Self {
        self.tiers.retain(|(secs, _)| *secs != within_secs);
        self.tiers.push((within_secs, interval));
        self.tiers.sort_by_key(|(secs, _)| *secs);
        self
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat_every = every;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_countdown_zone(mut self, secs: u64) -> Self {
        self.countdown_zone = secs;
        self
    }

    /// Sleep before the next poll when `remaining` seconds are left.
    pub fn interval_for(&self, remaining: u64) -> Duration {
        self.tiers
            .iter()
            .find(|(secs, _)| remaining <= *secs)
            .map(|(_, interval)| *interval)
            .unwrap_or(self.default_interval)
    }

    pub fn in_countdown(&self, remaining: u64) -> bool {
        remaining <= self.countdown_zone
    }

    pub fn heartbeat_every(&self) -> Duration {
        self.heartbeat_every
    }

    pub fn error_backoff(&self) -> Duration {
        self.error_backoff
    }
}
