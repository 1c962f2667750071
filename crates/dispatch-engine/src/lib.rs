//! Timestamp-triggered concurrent dispatch.
//!
//! Watches an external block clock through a [`Connection`], and when a
//! sample lands inside the target window, fires one operation per actor
//! concurrently with bounded retries and primary/secondary failover.

pub mod actor;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod monitor;
pub mod prepare;
pub mod report;
pub mod retry;
pub mod run;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use actor::{
    Actor, ActorId, ActorRegistry, ActorStatus, CredentialHandle, RunState, StatusCell,
};
pub use connection::{
    ActorSource, BlockSample, Connection, OperationHandle, OperationReceipt, Query, ReadValue,
    Settlement, VaultMode, VaultState, WriteOp,
};
pub use dispatch::{
    DispatchSummary, Dispatcher, OperationFuture, approve_operation, deposit_operation, execute,
};
pub use error::{EngineError, Result, UpstreamError};
pub use events::{EventLog, EventSink, NullSink, RunEvent};
pub use monitor::{
    ClockMonitor, MonitorOutcome, MonitorState, PollPolicy, TargetWindow, WindowPosition,
};
pub use prepare::{Inspection, Preparer, VaultCheck};
pub use report::{ActorReport, ExitStatus, Outcome, RunReport};
pub use retry::RetryPolicy;
pub use run::{AbortReason, Coordinator, DeadlineDecider, DeadlinePolicy, RunOutcome};
pub use upstream::{FailoverOutcome, UpstreamSelector};
