//! Clock monitor service.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::policy::PollPolicy;
use super::window::{TargetWindow, WindowPosition};
use crate::connection::BlockSample;
use crate::error::UpstreamError;
use crate::events::{EventSink, RunEvent};
use crate::upstream::{FailoverOutcome, UpstreamSelector};

/// Monitor state machine.
///
/// `Polling` is the only non-terminal state. From `PastDeadline` the
/// coordinator either proceeds to dispatch or moves to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Polling,
    Triggered,
    PastDeadline,
    Aborted,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorState::Polling)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Polling => write!(f, "POLLING"),
            MonitorState::Triggered => write!(f, "TRIGGERED"),
            MonitorState::PastDeadline => write!(f, "PAST_DEADLINE"),
            MonitorState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// How a [`ClockMonitor::watch`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// A sample landed inside the window.
    Triggered(BlockSample),
    /// The first sample after the window was already past it.
    PastDeadline { sample: BlockSample, late_by: u64 },
    /// Cancelled before either happened.
    Aborted,
}

impl MonitorOutcome {
    pub fn state(&self) -> MonitorState {
        match self {
            MonitorOutcome::Triggered(_) => MonitorState::Triggered,
            MonitorOutcome::PastDeadline { .. } => MonitorState::PastDeadline,
            MonitorOutcome::Aborted => MonitorState::Aborted,
        }
    }
}

/// Polls the block clock until the target window is reached or passed.
pub struct ClockMonitor {
    window: TargetWindow,
    policy: PollPolicy,
    upstream: Arc<UpstreamSelector>,
    sink: Arc<dyn EventSink>,
}

impl ClockMonitor {
    pub fn new(
        window: TargetWindow,
        policy: PollPolicy,
        upstream: Arc<UpstreamSelector>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            window,
            policy,
            upstream,
            sink,
        }
    }

    pub fn window(&self) -> TargetWindow {
        self.window
    }

    /// Poll until a terminal state.
    ///
    /// Emits exactly one `Polling -> <terminal>` transition. A poll failure
    /// requests failover and backs off; it never ends the watch.
    pub async fn watch(&self, cancel: &CancellationToken) -> MonitorOutcome {
        info!(
            target_ts = self.window.target(),
            tolerance = self.window.tolerance(),
            upstream = %self.upstream.current().label(),
            "Monitoring block timestamps"
        );

        let mut last_heartbeat: Option<Instant> = None;
        let mut countdown_started = false;

        loop {
            if cancel.is_cancelled() {
                return self.finish(MonitorOutcome::Aborted);
            }

            let upstream = self.upstream.current();
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish(MonitorOutcome::Aborted),
                polled = upstream.latest_block() => polled,
            };

            let sample = match polled {
                Ok(sample) => sample,
                Err(err) => {
                    self.handle_poll_error(upstream.label(), &err);
                    if !self.pause(self.policy.error_backoff(), cancel).await {
                        return self.finish(MonitorOutcome::Aborted);
                    }
                    continue;
                }
            };

            match self.window.classify(sample.timestamp) {
                WindowPosition::InWindow { offset } => {
                    info!(
                        block = sample.number,
                        timestamp = sample.timestamp,
                        offset,
                        "Target window reached"
                    );
                    self.sink.emit(RunEvent::Triggered {
                        block: sample.number,
                        timestamp: sample.timestamp,
                        offset,
                    });
                    return self.finish(MonitorOutcome::Triggered(sample));
                }
                WindowPosition::Passed { late_by } => {
                    warn!(
                        block = sample.number,
                        timestamp = sample.timestamp,
                        late_by,
                        "Target timestamp already passed"
                    );
                    self.sink.emit(RunEvent::DeadlineMissed {
                        block: sample.number,
                        timestamp: sample.timestamp,
                        late_by,
                    });
                    return self.finish(MonitorOutcome::PastDeadline { sample, late_by });
                }
                WindowPosition::Ahead { remaining } => {
                    if self.policy.in_countdown(remaining) {
                        if !countdown_started {
                            countdown_started = true;
                            info!(remaining, "Countdown started");
                            self.sink.emit(RunEvent::CountdownStarted { remaining });
                        }
                        self.sink.emit(RunEvent::Countdown { remaining });
                    } else if last_heartbeat
                        .is_none_or(|at| at.elapsed() >= self.policy.heartbeat_every())
                    {
                        last_heartbeat = Some(Instant::now());
                        info!(
                            block = sample.number,
                            timestamp = sample.timestamp,
                            remaining,
                            "Waiting for target"
                        );
                        self.sink.emit(RunEvent::Heartbeat {
                            block: sample.number,
                            timestamp: sample.timestamp,
                            remaining,
                        });
                    }

                    if !self.pause(self.policy.interval_for(remaining), cancel).await {
                        return self.finish(MonitorOutcome::Aborted);
                    }
                }
            }
        }
    }

    fn handle_poll_error(&self, label: &str, err: &UpstreamError) {
        error!(upstream = %label, error = %err, "Timestamp query failed");
        self.sink.emit(RunEvent::PollFailed {
            upstream: label.to_string(),
            error: err.to_string(),
        });

        match self.upstream.failover() {
            Ok(FailoverOutcome::Switched) => {
                let to = self.upstream.current().label().to_string();
                self.sink.emit(RunEvent::FailedOver {
                    from: label.to_string(),
                    to,
                });
            }
            Ok(FailoverOutcome::AlreadyOnSecondary) => {
                debug!("Already on secondary upstream, backing off");
            }
            Err(_) => {
                debug!("No secondary upstream, retrying primary after backoff");
            }
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }

    fn finish(&self, outcome: MonitorOutcome) -> MonitorOutcome {
        let to = outcome.state();
        if to == MonitorState::Aborted {
            info!("Monitoring cancelled");
        }
        self.sink.emit(RunEvent::StateChanged {
            from: MonitorState::Polling,
            to,
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::testing::ScriptedConnection;

    fn monitor(
        primary: Arc<ScriptedConnection>,
        secondary: Option<Arc<ScriptedConnection>>,
        log: &EventLog,
    ) -> ClockMonitor {
        let secondary = secondary.map(|s| s as Arc<dyn crate::Connection>);
        ClockMonitor::new(
            TargetWindow::new(1000, 3).unwrap(),
            PollPolicy::default(),
            Arc::new(UpstreamSelector::new(primary, secondary)),
            Arc::new(log.clone()),
        )
    }

    fn transitions(log: &EventLog) -> Vec<(MonitorState, MonitorState)> {
        log.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::StateChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_on_first_sample_in_window() {
        let primary =
            Arc::new(ScriptedConnection::new("primary").with_timestamps(&[990, 995, 998, 1001]));
        let log = EventLog::new();
        let outcome = monitor(primary.clone(), None, &log)
            .watch(&CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            MonitorOutcome::Triggered(BlockSample {
                number: 2,
                timestamp: 998
            })
        );
        assert_eq!(primary.polls(), 3);
        assert_eq!(
            transitions(&log),
            vec![(MonitorState::Polling, MonitorState::Triggered)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_window_is_past_deadline() {
        let primary = Arc::new(ScriptedConnection::new("primary").with_timestamps(&[990, 1010]));
        let log = EventLog::new();
        let outcome = monitor(primary, None, &log)
            .watch(&CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            MonitorOutcome::PastDeadline { late_by: 10, .. }
        ));
        assert_eq!(
            transitions(&log),
            vec![(MonitorState::Polling, MonitorState::PastDeadline)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_fails_over_once() {
        let primary = Arc::new(ScriptedConnection::new("primary").with_poll_error());
        let backup = Arc::new(ScriptedConnection::new("backup").with_timestamps(&[999]));
        let log = EventLog::new();
        let start = Instant::now();

        let outcome = monitor(primary.clone(), Some(backup.clone()), &log)
            .watch(&CancellationToken::new())
            .await;

        assert!(matches!(outcome, MonitorOutcome::Triggered(_)));
        assert_eq!(primary.polls(), 1);
        assert_eq!(backup.polls(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        let failovers = log
            .events()
            .into_iter()
            .filter(|e| matches!(e, RunEvent::FailedOver { .. }))
            .count();
        assert_eq!(failovers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_without_secondary_keeps_polling() {
        let primary = Arc::new(
            ScriptedConnection::new("primary")
                .with_poll_error()
                .with_timestamps(&[1000]),
        );
        let log = EventLog::new();
        let outcome = monitor(primary.clone(), None, &log)
            .watch(&CancellationToken::new())
            .await;

        assert!(matches!(outcome, MonitorOutcome::Triggered(_)));
        assert_eq!(primary.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_and_pacing() {
        // 30s out polls every 500ms, inside 10s every 100ms.
        let primary =
            Arc::new(ScriptedConnection::new("primary").with_timestamps(&[970, 995, 997]));
        let log = EventLog::new();
        let start = Instant::now();
        monitor(primary, None, &log)
            .watch(&CancellationToken::new())
            .await;

        assert_eq!(start.elapsed(), Duration::from_millis(600));
        let events = log.events();
        assert!(matches!(events[0], RunEvent::Heartbeat { remaining: 30, .. }));
        assert_eq!(events[1], RunEvent::CountdownStarted { remaining: 5 });
        assert_eq!(events[2], RunEvent::Countdown { remaining: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_rate_limited() {
        let timestamps: Vec<u64> = (0..40).map(|_| 900).collect();
        let primary = Arc::new(ScriptedConnection::new("primary").with_timestamps(&timestamps));
        let log = EventLog::new();
        let cancel = CancellationToken::new();

        let watcher = monitor(primary, None, &log);
        let token = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(19_900)).await;
            token.cancel();
        });
        let outcome = watcher.watch(&cancel).await;

        assert_eq!(outcome, MonitorOutcome::Aborted);
        let heartbeats = log
            .events()
            .into_iter()
            .filter(|e| matches!(e, RunEvent::Heartbeat { .. }))
            .count();
        // At t = 0s and t = 10s.
        assert_eq!(heartbeats, 2);
        assert_eq!(
            transitions(&log),
            vec![(MonitorState::Polling, MonitorState::Aborted)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let primary = Arc::new(ScriptedConnection::new("primary").with_timestamps(&[1000]));
        let log = EventLog::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = monitor(primary.clone(), None, &log).watch(&cancel).await;
        assert_eq!(outcome, MonitorOutcome::Aborted);
        assert_eq!(primary.polls(), 0);
    }
}
