//! Run summary.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::actor::{ActorId, RunState};
use crate::connection::OperationHandle;

/// Terminal result of one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    /// Never dispatched, e.g. the run was aborted.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorReport {
    pub position: usize,
    pub id: ActorId,
    pub outcome: Outcome,
    pub handle: Option<OperationHandle>,
    /// Settlement detail on success, last error on failure.
    pub detail: Option<String>,
}

/// Process-level classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    AllSucceeded,
    Partial,
    NoneSucceeded,
}

/// Summary of a run, built from the final [`RunState`].
///
/// Building it never mutates the state, so calling
/// [`RunReport::from_state`] twice on a finished run yields equal reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time between start and completion, once finished.
    pub elapsed_ms: Option<u64>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    /// Amount each actor was asked to move, in base units.
    pub amount_per_actor: u128,
    /// `amount_per_actor * succeeded`.
    pub total_moved: u128,
    pub actors: Vec<ActorReport>,
}

impl RunReport {
    pub fn from_state(state: &RunState, amount_per_actor: u128) -> Self {
        let actors: Vec<ActorReport> = state
            .registry
            .iter()
            .map(|(actor, status)| {
                let outcome = match status.operation_succeeded {
                    Some(true) => Outcome::Succeeded,
                    Some(false) => Outcome::Failed,
                    None => Outcome::Pending,
                };
                let detail = match outcome {
                    Outcome::Succeeded => status.result_detail.clone(),
                    _ => status.last_error.clone(),
                };
                ActorReport {
                    position: actor.position,
                    id: actor.id.clone(),
                    outcome,
                    handle: status.result_handle.clone(),
                    detail,
                }
            })
            .collect();

        let count = |wanted: Outcome| actors.iter().filter(|a| a.outcome == wanted).count();
        let succeeded = count(Outcome::Succeeded);
        let failed = count(Outcome::Failed);
        let pending = count(Outcome::Pending);

        Self {
            started_at: state.started_at,
            completed_at: state.completed_at(),
            elapsed_ms: state.elapsed().map(|d| d.as_millis() as u64),
            total: actors.len(),
            succeeded,
            failed,
            pending,
            amount_per_actor,
            total_moved: amount_per_actor.saturating_mul(succeeded as u128),
            actors,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.total > 0 && self.succeeded == self.total {
            ExitStatus::AllSucceeded
        } else if self.succeeded > 0 {
            ExitStatus::Partial
        } else {
            ExitStatus::NoneSucceeded
        }
    }

    pub fn successes(&self) -> impl Iterator<Item = &ActorReport> {
        self.actors
            .iter()
            .filter(|a| a.outcome == Outcome::Succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActorReport> {
        self.actors.iter().filter(|a| a.outcome == Outcome::Failed)
    }
}
