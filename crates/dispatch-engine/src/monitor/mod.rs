//! Clock Monitor: watches the external block clock until the target window.
//!
//! The monitor is responsible for:
//! - Polling the active upstream for the latest block timestamp
//! - Classifying each sample against the target window
//! - Pacing polls by the remaining time (interval table)
//! - Heartbeat and countdown events while waiting
//! - Failover and backoff when a poll fails

mod policy;
mod service;
mod window;

pub use policy::PollPolicy;
pub use service::{ClockMonitor, MonitorOutcome, MonitorState};
pub use window::{TargetWindow, WindowPosition};
