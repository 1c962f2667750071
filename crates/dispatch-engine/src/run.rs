//! Run coordinator: monitor, then dispatch on trigger.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actor::RunState;
use crate::connection::BlockSample;
use crate::dispatch::{DispatchSummary, Dispatcher, deposit_operation};
use crate::events::{EventSink, RunEvent};
use crate::monitor::{ClockMonitor, MonitorOutcome, MonitorState};
use crate::report::RunReport;

/// Asked once when the first sample is already past the window.
#[async_trait]
pub trait DeadlineDecider: Send + Sync {
    /// Return true to dispatch anyway.
    async fn proceed_after_deadline(&self, sample: BlockSample, late_by: u64) -> bool;
}

/// What to do when the window was missed.
#[derive(Clone)]
pub enum DeadlinePolicy {
    Abort,
    Proceed,
    Ask(Arc<dyn DeadlineDecider>),
}

impl fmt::Debug for DeadlinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlinePolicy::Abort => write!(f, "Abort"),
            DeadlinePolicy::Proceed => write!(f, "Proceed"),
            DeadlinePolicy::Ask(_) => write!(f, "Ask"),
        }
    }
}

/// Why a run ended without dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    DeadlineMissed { late_by: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Dispatched {
        trigger: BlockSample,
        /// Dispatched after the window, by operator decision.
        late: bool,
        summary: DispatchSummary,
    },
    Aborted(AbortReason),
}

/// Wires the monitor to the dispatcher for one run.
pub struct Coordinator {
    monitor: ClockMonitor,
    dispatcher: Dispatcher,
    sink: Arc<dyn EventSink>,
    amount: u128,
}

impl Coordinator {
    pub fn new(
        monitor: ClockMonitor,
        dispatcher: Dispatcher,
        sink: Arc<dyn EventSink>,
        amount: u128,
    ) -> Self {
        Self {
            monitor,
            dispatcher,
            sink,
            amount,
        }
    }

    /// Watch the clock and deposit for every actor once the window is hit.
    ///
    /// Dispatch happens at most once per call. The run is finished and a
    /// summary emitted whatever the outcome.
    pub async fn run(
        &self,
        state: &mut RunState,
        deadline: &DeadlinePolicy,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let outcome = match self.monitor.watch(cancel).await {
            MonitorOutcome::Triggered(trigger) => {
                self.dispatch(state, trigger, false).await
            }
            MonitorOutcome::PastDeadline { sample, late_by } => {
                if self.decide(deadline, sample, late_by).await {
                    self.dispatch(state, sample, true).await
                } else {
                    self.sink.emit(RunEvent::StateChanged {
                        from: MonitorState::PastDeadline,
                        to: MonitorState::Aborted,
                    });
                    RunOutcome::Aborted(AbortReason::DeadlineMissed { late_by })
                }
            }
            MonitorOutcome::Aborted => RunOutcome::Aborted(AbortReason::Cancelled),
        };

        state.finish();
        self.sink
            .emit(RunEvent::Summary(RunReport::from_state(state, self.amount)));
        outcome
    }

    async fn decide(&self, deadline: &DeadlinePolicy, sample: BlockSample, late_by: u64) -> bool {
        let proceed = match deadline {
            DeadlinePolicy::Abort => false,
            DeadlinePolicy::Proceed => true,
            DeadlinePolicy::Ask(decider) => decider.proceed_after_deadline(sample, late_by).await,
        };
        if proceed {
            warn!(late_by, "Proceeding after missed deadline");
        } else {
            info!(late_by, "Not dispatching after missed deadline");
        }
        self.sink.emit(RunEvent::DeadlineOverride { proceed });
        proceed
    }

    async fn dispatch(&self, state: &mut RunState, trigger: BlockSample, late: bool) -> RunOutcome {
        info!(
            block = trigger.number,
            timestamp = trigger.timestamp,
            actors = state.registry.len(),
            "Dispatching deposits"
        );
        let summary = self
            .dispatcher
            .dispatch(&mut state.registry, "deposit", deposit_operation(self.amount))
            .await;
        RunOutcome::Dispatched {
            trigger,
            late,
            summary,
        }
    }
}
