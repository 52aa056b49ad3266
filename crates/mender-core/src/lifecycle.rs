use serde::{Deserialize, Serialize};
use std::fmt;

// ── States and events ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Intake,
    ContextGathered,
    Analyzed,
    PendingReview,
    ApprovedPendingExec,
    Rejected,
    Executing,
    Resolved,
    ExecFailed,
    RolledBack,
    NeedsManualTriage,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Intake => "INTAKE",
            LifecycleState::ContextGathered => "CONTEXT_GATHERED",
            LifecycleState::Analyzed => "ANALYZED",
            LifecycleState::PendingReview => "PENDING_REVIEW",
            LifecycleState::ApprovedPendingExec => "APPROVED_PENDING_EXEC",
            LifecycleState::Rejected => "REJECTED",
            LifecycleState::Executing => "EXECUTING",
            LifecycleState::Resolved => "RESOLVED",
            LifecycleState::ExecFailed => "EXEC_FAILED",
            LifecycleState::RolledBack => "ROLLED_BACK",
            LifecycleState::NeedsManualTriage => "NEEDS_MANUAL_TRIAGE",
        }
    }

    /// No further lifecycle events are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Rejected
                | LifecycleState::Resolved
                | LifecycleState::RolledBack
                | LifecycleState::NeedsManualTriage
        )
    }

    /// Closed to everything except the events listed for it in the table.
    /// `ExecFailed` only accepts a rollback.
    pub fn is_closed(&self) -> bool {
        self.is_terminal() || *self == LifecycleState::ExecFailed
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    ContextGathered,
    AnalysisCompleted,
    AnalysisFailed,
    ReviewOpened,
    /// Approve or modify.
    DecisionApproved,
    DecisionRejected,
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
    RollbackSucceeded,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleEvent::ContextGathered => "context_gathered",
            LifecycleEvent::AnalysisCompleted => "analysis_completed",
            LifecycleEvent::AnalysisFailed => "analysis_failed",
            LifecycleEvent::ReviewOpened => "review_opened",
            LifecycleEvent::DecisionApproved => "decision_approved",
            LifecycleEvent::DecisionRejected => "decision_rejected",
            LifecycleEvent::ExecutionStarted => "execution_started",
            LifecycleEvent::ExecutionSucceeded => "execution_succeeded",
            LifecycleEvent::ExecutionFailed => "execution_failed",
            LifecycleEvent::RollbackSucceeded => "rollback_succeeded",
        };
        f.write_str(s)
    }
}

/// What the controller does next after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Analyze,
    OpenReview,
    Escalate,
    AwaitDecision,
    Execute,
    RecordFeedback,
    OfferRollback,
    Archive,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid transition: {event} not accepted in {state}")]
    InvalidTransition {
        state: LifecycleState,
        event: LifecycleEvent,
    },
    #[error("incident is closed ({state}); {event} not accepted")]
    IncidentClosed {
        state: LifecycleState,
        event: LifecycleEvent,
    },
}

// ── Transition table ──

const TRANSITIONS: &[(LifecycleState, LifecycleEvent, LifecycleState, Effect)] = &[
    (
        LifecycleState::Intake,
        LifecycleEvent::ContextGathered,
        LifecycleState::ContextGathered,
        Effect::Analyze,
    ),
    (
        LifecycleState::ContextGathered,
        LifecycleEvent::AnalysisCompleted,
        LifecycleState::Analyzed,
        Effect::OpenReview,
    ),
    (
        LifecycleState::ContextGathered,
        LifecycleEvent::AnalysisFailed,
        LifecycleState::NeedsManualTriage,
        Effect::Escalate,
    ),
    (
        LifecycleState::Analyzed,
        LifecycleEvent::ReviewOpened,
        LifecycleState::PendingReview,
        Effect::AwaitDecision,
    ),
    (
        LifecycleState::PendingReview,
        LifecycleEvent::DecisionApproved,
        LifecycleState::ApprovedPendingExec,
        Effect::Execute,
    ),
    (
        LifecycleState::PendingReview,
        LifecycleEvent::DecisionRejected,
        LifecycleState::Rejected,
        Effect::Archive,
    ),
    (
        LifecycleState::ApprovedPendingExec,
        LifecycleEvent::ExecutionStarted,
        LifecycleState::Executing,
        Effect::None,
    ),
    (
        LifecycleState::Executing,
        LifecycleEvent::ExecutionSucceeded,
        LifecycleState::Resolved,
        Effect::RecordFeedback,
    ),
    (
        LifecycleState::Executing,
        LifecycleEvent::ExecutionFailed,
        LifecycleState::ExecFailed,
        Effect::OfferRollback,
    ),
    (
        LifecycleState::ExecFailed,
        LifecycleEvent::RollbackSucceeded,
        LifecycleState::RolledBack,
        Effect::Archive,
    ),
];

/// Look up `(state, event)` in the transition table. Pure: the caller owns
/// the state and decides whether to commit the returned successor.
pub fn next(
    state: LifecycleState,
    event: LifecycleEvent,
) -> Result<(LifecycleState, Effect), TransitionError> {
    if let Some((_, _, to, effect)) = TRANSITIONS
        .iter()
        .find(|(from, ev, _, _)| *from == state && *ev == event)
    {
        return Ok((*to, *effect));
    }
    if state.is_closed() {
        Err(TransitionError::IncidentClosed { state, event })
    } else {
        Err(TransitionError::InvalidTransition { state, event })
    }
}

/// Events accepted in `state`, in table order.
pub fn accepted_events(state: LifecycleState) -> Vec<LifecycleEvent> {
    TRANSITIONS
        .iter()
        .filter(|(from, _, _, _)| *from == state)
        .map(|(_, ev, _, _)| *ev)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [LifecycleState; 11] = [
        LifecycleState::Intake,
        LifecycleState::ContextGathered,
        LifecycleState::Analyzed,
        LifecycleState::PendingReview,
        LifecycleState::ApprovedPendingExec,
        LifecycleState::Rejected,
        LifecycleState::Executing,
        LifecycleState::Resolved,
        LifecycleState::ExecFailed,
        LifecycleState::RolledBack,
        LifecycleState::NeedsManualTriage,
    ];

    const ALL_EVENTS: [LifecycleEvent; 10] = [
        LifecycleEvent::ContextGathered,
        LifecycleEvent::AnalysisCompleted,
        LifecycleEvent::AnalysisFailed,
        LifecycleEvent::ReviewOpened,
        LifecycleEvent::DecisionApproved,
        LifecycleEvent::DecisionRejected,
        LifecycleEvent::ExecutionStarted,
        LifecycleEvent::ExecutionSucceeded,
        LifecycleEvent::ExecutionFailed,
        LifecycleEvent::RollbackSucceeded,
    ];

    #[test]
    fn happy_path_walks_to_resolved() {
        let mut s = LifecycleState::Intake;
        for ev in [
            LifecycleEvent::ContextGathered,
            LifecycleEvent::AnalysisCompleted,
            LifecycleEvent::ReviewOpened,
            LifecycleEvent::DecisionApproved,
            LifecycleEvent::ExecutionStarted,
            LifecycleEvent::ExecutionSucceeded,
        ] {
            s = next(s, ev).unwrap().0;
        }
        assert_eq!(s, LifecycleState::Resolved);
    }

    #[test]
    fn effects_follow_table() {
        assert_eq!(
            next(LifecycleState::ContextGathered, LifecycleEvent::AnalysisFailed).unwrap(),
            (LifecycleState::NeedsManualTriage, Effect::Escalate)
        );
        assert_eq!(
            next(LifecycleState::Executing, LifecycleEvent::ExecutionFailed).unwrap(),
            (LifecycleState::ExecFailed, Effect::OfferRollback)
        );
        assert_eq!(
            next(LifecycleState::PendingReview, LifecycleEvent::DecisionRejected).unwrap(),
            (LifecycleState::Rejected, Effect::Archive)
        );
    }

    #[test]
    fn skipping_review_is_invalid() {
        let err = next(LifecycleState::Analyzed, LifecycleEvent::ExecutionStarted).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                state: LifecycleState::Analyzed,
                event: LifecycleEvent::ExecutionStarted,
            }
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        for state in ALL_STATES.iter().filter(|s| s.is_terminal()) {
            for ev in ALL_EVENTS {
                assert!(matches!(
                    next(*state, ev),
                    Err(TransitionError::IncidentClosed { .. })
                ));
            }
        }
    }

    #[test]
    fn exec_failed_only_accepts_rollback() {
        assert_eq!(
            accepted_events(LifecycleState::ExecFailed),
            vec![LifecycleEvent::RollbackSucceeded]
        );
        assert!(matches!(
            next(LifecycleState::ExecFailed, LifecycleEvent::ExecutionStarted),
            Err(TransitionError::IncidentClosed { .. })
        ));
    }

    #[test]
    fn every_pair_is_either_in_table_or_an_error() {
        for state in ALL_STATES {
            let accepted = accepted_events(state);
            for ev in ALL_EVENTS {
                assert_eq!(next(state, ev).is_ok(), accepted.contains(&ev));
            }
        }
    }

    #[test]
    fn state_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::ApprovedPendingExec).unwrap(),
            r#""APPROVED_PENDING_EXEC""#
        );
        assert_eq!(LifecycleState::ExecFailed.to_string(), "EXEC_FAILED");
    }
}
