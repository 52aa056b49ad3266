use mender_core::error::{EntryError, ReplayError};
use mender_core::lifecycle::LifecycleState;
use mender_core::risk::ClassifierError;
use mender_ledger::SinkError;
use std::time::Duration;

/// A stage that could not produce its output. Routes the incident to manual
/// triage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    #[error("diagnostic engine unavailable: {0}")]
    DiagnosticUnavailable(String),
    #[error("diagnostic engine timed out after {}s", .0.as_secs())]
    DiagnosticTimeout(Duration),
    #[error("malformed diagnostic report: {0}")]
    MalformedReport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Reviewer submission refused by the decision gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("unacknowledged high-risk actions: {}", ids.join(", "))]
    UnacknowledgedHighRisk { ids: Vec<String> },
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("incident {0} not found")]
    NotFound(String),
    #[error("incident {0} already exists")]
    AlreadyExists(String),
    #[error("invalid transition for {id}: {operation} not accepted in {state}")]
    InvalidTransition {
        id: String,
        state: LifecycleState,
        operation: &'static str,
    },
    #[error("incident {id} is closed ({state}); {operation} not accepted")]
    IncidentClosed {
        id: String,
        state: LifecycleState,
        operation: &'static str,
    },
    #[error(transparent)]
    Policy(#[from] GateError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("audit entry refused: {0}")]
    Entry(#[from] EntryError),
    #[error("audit replay failed: {0}")]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

impl ControllerError {
    /// Refusal of `operation` on an incident in `state`.
    pub fn refused(id: &str, state: LifecycleState, operation: &'static str) -> Self {
        if state.is_closed() {
            ControllerError::IncidentClosed {
                id: id.to_string(),
                state,
                operation,
            }
        } else {
            ControllerError::InvalidTransition {
                id: id.to_string(),
                state,
                operation,
            }
        }
    }
}
