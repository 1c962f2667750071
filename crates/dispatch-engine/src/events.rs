//! Progress and outcome events.
//!
//! The engine emits [`RunEvent`]s synchronously from the control flow that
//! produces them, so every sink observes them in generation order. Rendering
//! is left to the sink.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::actor::ActorId;
use crate::connection::{OperationHandle, VaultState};
use crate::monitor::MonitorState;
use crate::report::RunReport;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Balance and allowance were read for an actor.
    ActorInspected {
        position: usize,
        actor: ActorId,
        balance: Option<u128>,
        allowance: Option<u128>,
        /// Balance covers the operation amount.
        sufficient: bool,
        error: Option<String>,
    },
    /// An approval finished, successfully or not.
    ActorAuthorized {
        position: usize,
        actor: ActorId,
        succeeded: bool,
        handle: Option<OperationHandle>,
        error: Option<String>,
    },
    /// Vault parameters were read.
    VaultInspected {
        state: VaultState,
        warnings: Vec<String>,
    },
    /// Vault parameters could not be read.
    VaultUnavailable { error: String },
    /// Monitor state machine transition.
    StateChanged {
        from: MonitorState,
        to: MonitorState,
    },
    /// Periodic sign of life while the target is far away.
    Heartbeat {
        block: u64,
        timestamp: u64,
        remaining: u64,
    },
    /// The target entered the countdown zone.
    CountdownStarted { remaining: u64 },
    /// Remaining seconds, reported on every poll inside the countdown zone.
    Countdown { remaining: u64 },
    /// A timestamp query failed.
    PollFailed { upstream: String, error: String },
    /// Traffic moved to the secondary upstream.
    FailedOver { from: String, to: String },
    /// A sample landed inside the window.
    Triggered {
        block: u64,
        timestamp: u64,
        /// `timestamp - target`, negative when early.
        offset: i64,
    },
    /// The target passed without a sample inside the window.
    DeadlineMissed {
        block: u64,
        timestamp: u64,
        late_by: u64,
    },
    /// The operator decided what to do after a missed deadline.
    DeadlineOverride { proceed: bool },
    /// One attempt of an actor's operation failed.
    AttemptFailed {
        position: usize,
        actor: ActorId,
        operation: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    /// An actor's dispatched operation reached its terminal state.
    ActorSettled {
        position: usize,
        actor: ActorId,
        succeeded: bool,
        handle: Option<OperationHandle>,
        detail: String,
    },
    /// Final run summary.
    Summary(RunReport),
}

impl RunEvent {
    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            RunEvent::ActorInspected {
                position,
                balance,
                sufficient,
                error,
                ..
            } => match error {
                Some(error) => format!("wallet {}: inspection failed: {}", position + 1, error),
                None => format!(
                    "wallet {}: balance {} ({})",
                    position + 1,
                    balance.unwrap_or_default(),
                    if *sufficient { "ok" } else { "insufficient" }
                ),
            },
            RunEvent::ActorAuthorized {
                position,
                succeeded,
                error,
                ..
            } => {
                if *succeeded {
                    format!("wallet {}: approval confirmed", position + 1)
                } else {
                    format!(
                        "wallet {}: approval failed: {}",
                        position + 1,
                        error.as_deref().unwrap_or("unknown error")
                    )
                }
            }
            RunEvent::VaultInspected { state, warnings } => {
                format!("vault mode {} ({} warnings)", state.mode, warnings.len())
            }
            RunEvent::VaultUnavailable { error } => format!("vault state unavailable: {}", error),
            RunEvent::StateChanged { from, to } => format!("{} -> {}", from, to),
            RunEvent::Heartbeat {
                block, remaining, ..
            } => format!("waiting at block {}, {}s to target", block, remaining),
            RunEvent::CountdownStarted { remaining } => {
                format!("countdown started, {}s to target", remaining)
            }
            RunEvent::Countdown { remaining } => format!("{}s remaining", remaining),
            RunEvent::PollFailed { upstream, error } => {
                format!("timestamp query on {} failed: {}", upstream, error)
            }
            RunEvent::FailedOver { from, to } => format!("failed over from {} to {}", from, to),
            RunEvent::Triggered { block, offset, .. } => {
                format!("target reached at block {} (offset {:+}s)", block, offset)
            }
            RunEvent::DeadlineMissed { late_by, .. } => {
                format!("target passed {}s ago", late_by)
            }
            RunEvent::DeadlineOverride { proceed } => {
                if *proceed {
                    "proceeding despite missed deadline".to_string()
                } else {
                    "aborting after missed deadline".to_string()
                }
            }
            RunEvent::AttemptFailed {
                position,
                operation,
                attempt,
                max_attempts,
                error,
                ..
            } => format!(
                "wallet {}: {} attempt {}/{} failed: {}",
                position + 1,
                operation,
                attempt,
                max_attempts,
                error
            ),
            RunEvent::ActorSettled {
                position,
                succeeded,
                detail,
                ..
            } => format!(
                "wallet {}: {} ({})",
                position + 1,
                if *succeeded { "succeeded" } else { "failed" },
                detail
            ),
            RunEvent::Summary(report) => format!(
                "{} succeeded, {} failed of {}",
                report.succeeded, report.failed, report.total
            ),
        }
    }
}

/// Destination for run events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RunEvent) {}
}

/// Keeps every event in memory, in order.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: RunEvent) {
        self.events.lock().push(event);
    }
}
