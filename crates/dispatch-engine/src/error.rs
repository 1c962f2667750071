//! Engine error types.

use thiserror::Error;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by an upstream [`Connection`](crate::Connection).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Network failure, timeout, or an unreachable endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side refused the request (reverted call, rejected transaction).
    #[error("rejected by upstream: {0}")]
    Rejected(String),

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The connection holds no credential for this actor.
    #[error("no credential for actor {0}")]
    UnknownActor(String),

    /// The operation was accepted but its outcome was not seen in time.
    #[error("{handle} did not settle: {detail}")]
    SettlementTimeout { handle: String, detail: String },
}

/// Errors produced by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("upstream unavailable: {0}")]
    TransientUpstream(String),

    #[error("operation rejected: {0}")]
    RejectedOperation(String),

    #[error("{operation} failed: all {attempts} attempts exhausted (last error: {last})")]
    ExhaustedRetry {
        operation: String,
        attempts: u32,
        last: Box<EngineError>,
    },

    /// Submitted, outcome unknown. Never resubmitted: the first submission
    /// may still land.
    #[error("{handle} was submitted but did not settle ({detail})")]
    Unsettled { handle: String, detail: String },

    #[error("failover requested but no secondary upstream is configured")]
    NoSecondaryConfigured,

    #[error("target timestamp passed {late_by}s ago without a sample inside the window")]
    DeadlineMissed { late_by: u64 },

    #[error("no actors configured")]
    NoActors,

    #[error("no actor is ready: every actor lacks balance or authorization")]
    NoReadyActors,

    #[error("invalid target window: {0}")]
    InvalidWindow(String),

    #[error("actor {0} already settled")]
    AlreadySettled(String),

    #[error("run aborted by operator")]
    Aborted,
}

impl EngineError {
    /// Whether the error came from the transport rather than the remote logic.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::TransientUpstream(_) => true,
            EngineError::ExhaustedRetry { last, .. } => last.is_transient(),
            _ => false,
        }
    }

    /// Whether another attempt may be made. False once an operation may
    /// already have taken effect.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineError::Unsettled { .. })
    }

    /// Handle of a submitted operation whose outcome is unknown.
    pub fn unsettled_handle(&self) -> Option<&str> {
        match self {
            EngineError::Unsettled { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Errors that may terminate the process before monitoring starts.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            EngineError::NoActors | EngineError::NoReadyActors | EngineError::InvalidWindow(_)
        )
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::RejectedOperation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientUpstream(msg.into())
    }
}

impl From<UpstreamError> for EngineError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Transport(msg) | UpstreamError::Decode(msg) => {
                EngineError::TransientUpstream(msg)
            }
            UpstreamError::Rejected(msg) => EngineError::RejectedOperation(msg),
            UpstreamError::UnknownActor(id) => {
                EngineError::RejectedOperation(format!("no credential for actor {id}"))
            }
            UpstreamError::SettlementTimeout { handle, detail } => {
                EngineError::Unsettled { handle, detail }
            }
        }
    }
}
