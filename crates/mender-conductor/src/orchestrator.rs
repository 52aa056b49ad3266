use crate::collab::{CommandExecutor, FeedbackOutcome, KnowledgeFeedback, ResolutionFeedback};
use crate::error::{ControllerError, ExecutorError};
use crate::journal::Journal;
use crate::notify::{Notifier, Urgency};
use crate::preflight::PreflightEngine;
use crate::redact::{last_line, sanitize_output};
use mender_core::audit::EntryKind;
use mender_core::digest::action_set_digest;
use mender_core::lifecycle::Effect;
use mender_core::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs an approved action set: pre-flight, optional simulation, then each
/// action in plan order, one at a time. Every step is journaled before the
/// next one starts.
pub struct Orchestrator {
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) preflight: PreflightEngine,
    pub(crate) feedback: Arc<dyn KnowledgeFeedback>,
    pub(crate) action_timeout: Duration,
    pub(crate) rollback_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        preflight: PreflightEngine,
        feedback: Arc<dyn KnowledgeFeedback>,
        action_timeout: Duration,
        rollback_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            preflight,
            feedback,
            action_timeout,
            rollback_timeout,
        }
    }

    /// Simulate `actions` without touching the target.
    pub async fn simulate(
        &self,
        incident: &Incident,
        actions: &[ProposedAction],
    ) -> Result<DryRun, ExecutorError> {
        let mut simulations = Vec::with_capacity(actions.len());
        for action in actions {
            simulations.push(self.executor.dry_run(incident, action).await?);
        }
        Ok(DryRun {
            action_set_digest: action_set_digest(actions),
            simulations,
        })
    }

    /// Execute the recorded decision. Execution failures end in outcome
    /// `Failed` and are returned as `Ok`; only audit failures are errors.
    pub async fn execute(
        &self,
        journal: &mut Journal<'_>,
        notifier: &dyn Notifier,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ControllerError> {
        let record = journal.record();
        let incident = record.incident.clone();
        let Some(decision) = record.decision.clone() else {
            return Err(ControllerError::refused(&incident.id, record.state, "execute"));
        };
        let actions = decision.final_actions.clone();
        let total = actions.len();

        journal
            .commit(EntryKind::ExecutionStarted {
                decision_id: decision.decision_id.clone(),
            })
            .await?;
        notifier
            .send(&incident, Urgency::Info, format!("executing {total} action(s)"))
            .await;

        // Pre-flight
        let run = self.preflight.run_all(&incident, &actions).await;
        journal
            .commit(EntryKind::PreflightCompleted {
                checks: run.results,
            })
            .await?;
        if let Some(failure) = run.failure {
            return self.fail(journal, notifier, &incident, failure).await;
        }

        // Simulation, unless the reviewer confirmed a dry run of this exact set.
        if decision.confirmed_dry_run.as_deref() != Some(action_set_digest(&actions).as_str()) {
            match self.simulate(&incident, &actions).await {
                Ok(dry_run) => {
                    for sim in &dry_run.simulations {
                        notifier
                            .send(
                                &incident,
                                Urgency::Progress,
                                format!("dry-run {}: {}", sim.action_id, sim.preview),
                            )
                            .await;
                    }
                    journal.commit(EntryKind::DryRunRecorded { dry_run }).await?;
                }
                Err(e) => {
                    // Advisory: the reviewer approved the actions, not the preview.
                    tracing::warn!(incident = %incident.id, error = %e, "simulation unavailable");
                    journal
                        .commit(EntryKind::DryRunFailed {
                            reason: e.to_string(),
                        })
                        .await?;
                    notifier
                        .send(&incident, Urgency::Info, format!("simulation skipped ({e})"))
                        .await;
                }
            }
        }

        for (index, action) in actions.iter().enumerate() {
            if cancel.is_cancelled() {
                let failure = ExecutionFailure::Halted {
                    next_action_id: action.id.clone(),
                };
                return self.fail(journal, notifier, &incident, failure).await;
            }

            journal
                .commit(EntryKind::ActionStarted {
                    action_id: action.id.clone(),
                    index,
                })
                .await?;
            notifier
                .send(
                    &incident,
                    Urgency::Progress,
                    format!("▶ [{}/{total}] {} ({})", index + 1, action.label, action.risk_tier),
                )
                .await;
            tracing::info!(incident = %incident.id, action = %action.id, "action started");

            let result = self
                .executor
                .run(&incident, action, self.action_timeout)
                .await;
            let (status, exit_code, output, failure) = match result {
                Ok(out) if out.success() => (
                    ActionStatus::Done,
                    Some(out.exit_code),
                    Some(sanitize_output(&out.output)),
                    None,
                ),
                Ok(out) => {
                    let output = sanitize_output(&out.output);
                    let failure = ExecutionFailure::ActionExecutionFailed {
                        action_id: action.id.clone(),
                        exit_code: Some(out.exit_code),
                        detail: last_line(&output),
                    };
                    (ActionStatus::Failed, Some(out.exit_code), Some(output), Some(failure))
                }
                Err(ExecutorError::Unavailable(detail)) => (
                    ActionStatus::Failed,
                    None,
                    None,
                    Some(ExecutionFailure::ExecutorUnavailable { detail }),
                ),
                Err(e @ ExecutorError::Timeout(_)) => (
                    ActionStatus::Failed,
                    None,
                    None,
                    Some(ExecutionFailure::ActionExecutionFailed {
                        action_id: action.id.clone(),
                        exit_code: None,
                        detail: e.to_string(),
                    }),
                ),
            };

            journal
                .commit(EntryKind::ActionFinished {
                    action_id: action.id.clone(),
                    status,
                    exit_code,
                    output,
                })
                .await?;
            tracing::info!(incident = %incident.id, action = %action.id, ?status, "action finished");

            if let Some(failure) = failure {
                return self.fail(journal, notifier, &incident, failure).await;
            }
            notifier
                .send(
                    &incident,
                    Urgency::Progress,
                    format!("✓ [{}/{total}] {}", index + 1, action.id),
                )
                .await;
        }

        let effect = journal
            .commit(EntryKind::ExecutionFinished {
                outcome: ExecutionOutcome::Succeeded,
                failure: None,
            })
            .await?;
        notifier
            .send(&incident, Urgency::Info, format!("resolved ({total} action(s) done)"))
            .await;

        if effect == Effect::RecordFeedback {
            let feedback = resolution(journal, &incident, FeedbackOutcome::Resolved, &actions, None);
            record_feedback(self.feedback.as_ref(), journal, &feedback).await?;
        }
        Ok(ExecutionOutcome::Succeeded)
    }

    async fn fail(
        &self,
        journal: &mut Journal<'_>,
        notifier: &dyn Notifier,
        incident: &Incident,
        failure: ExecutionFailure,
    ) -> Result<ExecutionOutcome, ControllerError> {
        tracing::warn!(incident = %incident.id, %failure, "execution failed");
        let message = format!("execution failed: {failure}");
        let effect = journal
            .commit(EntryKind::ExecutionFinished {
                outcome: ExecutionOutcome::Failed,
                failure: Some(failure),
            })
            .await?;
        notifier.send(incident, Urgency::Info, message).await;
        offer_rollback(journal, notifier, effect).await;
        Ok(ExecutionOutcome::Failed)
    }

    /// Settle an execution that was cut off without a recorded outcome (a
    /// crash, or an audit outage). The action in flight, if any, is marked
    /// failed. Nothing is re-run.
    pub async fn settle_interrupted(
        &self,
        journal: &mut Journal<'_>,
        notifier: &dyn Notifier,
    ) -> Result<ExecutionOutcome, ControllerError> {
        let record = journal.record();
        let incident = record.incident.clone();
        let Some(exec) = record.execution.as_ref() else {
            return Err(ControllerError::refused(&incident.id, record.state, "recover"));
        };
        let running = exec
            .actions
            .iter()
            .find(|a| a.status == ActionStatus::Running)
            .map(|a| a.action.id.clone());
        let next = exec
            .actions
            .iter()
            .find(|a| a.status == ActionStatus::Pending)
            .map(|a| a.action.id.clone());

        let failure = match (running, next) {
            (Some(action_id), _) => {
                journal
                    .commit(EntryKind::ActionFinished {
                        action_id: action_id.clone(),
                        status: ActionStatus::Failed,
                        exit_code: None,
                        output: None,
                    })
                    .await?;
                ExecutionFailure::ActionExecutionFailed {
                    action_id,
                    exit_code: None,
                    detail: INTERRUPTED.to_string(),
                }
            }
            (None, Some(action_id)) => ExecutionFailure::ActionExecutionFailed {
                action_id,
                exit_code: None,
                detail: format!("{INTERRUPTED} before start"),
            },
            (None, None) => ExecutionFailure::ExecutorUnavailable {
                detail: format!("{INTERRUPTED} before the outcome was recorded"),
            },
        };
        tracing::warn!(incident = %incident.id, %failure, "settling interrupted execution");
        self.fail(journal, notifier, &incident, failure).await
    }

    /// Run the rollback command. Returns whether it succeeded.
    pub async fn rollback(
        &self,
        journal: &mut Journal<'_>,
        notifier: &dyn Notifier,
        actor: &str,
        rationale: &str,
    ) -> Result<bool, ControllerError> {
        let record = journal.record();
        let incident = record.incident.clone();
        let Some(command) = record
            .execution
            .as_ref()
            .and_then(|e| e.available_rollback())
            .map(str::to_string)
        else {
            return Err(ControllerError::refused(&incident.id, record.state, "rollback"));
        };

        journal
            .commit(EntryKind::RollbackStarted {
                actor: actor.to_string(),
                rationale: rationale.to_string(),
            })
            .await?;
        notifier
            .send(&incident, Urgency::Info, format!("rolling back: {command}"))
            .await;

        let action = ProposedAction {
            id: "rollback".to_string(),
            label: "Rollback".to_string(),
            command,
            risk_tier: RiskTier::HighRisk,
            raised_from: None,
        };
        let (succeeded, exit_code, detail) =
            match self.executor.run(&incident, &action, self.rollback_timeout).await {
                Ok(out) => (
                    out.success(),
                    Some(out.exit_code),
                    Some(sanitize_output(&out.output)).filter(|s| !s.is_empty()),
                ),
                Err(e) => (false, None, Some(e.to_string())),
            };

        let effect = journal
            .commit(EntryKind::RollbackFinished {
                succeeded,
                exit_code,
                detail,
            })
            .await?;
        if effect == Effect::Archive {
            tracing::info!(incident = %incident.id, %actor, "rolled back");
            notifier
                .send(&incident, Urgency::Info, "rolled back; incident closed".into())
                .await;
        } else {
            tracing::warn!(incident = %incident.id, %actor, "rollback failed");
            notifier
                .send(
                    &incident,
                    Urgency::Attention,
                    "rollback failed; incident stays EXEC_FAILED".into(),
                )
                .await;
        }
        Ok(succeeded)
    }
}

const INTERRUPTED: &str = "interrupted";

async fn offer_rollback(journal: &Journal<'_>, notifier: &dyn Notifier, effect: Effect) {
    if effect != Effect::OfferRollback {
        return;
    }
    let record = journal.record();
    if let Some(cmd) = record
        .execution
        .as_ref()
        .and_then(|e| e.available_rollback())
    {
        notifier
            .send(
                &record.incident,
                Urgency::Attention,
                format!("rollback available (not executed): {cmd}"),
            )
            .await;
    }
}

/// Feedback for the knowledge base, built from what the record holds.
pub(crate) fn resolution(
    journal: &Journal<'_>,
    incident: &Incident,
    outcome: FeedbackOutcome,
    actions: &[ProposedAction],
    rationale: Option<String>,
) -> ResolutionFeedback {
    let root_cause = journal
        .record()
        .report
        .as_ref()
        .map(|r| r.root_cause.clone())
        .unwrap_or_default();
    ResolutionFeedback {
        incident_id: incident.id.clone(),
        outcome,
        title: incident.title.clone(),
        tags: incident.tags.clone(),
        root_cause,
        commands: actions.iter().map(|a| a.command.clone()).collect(),
        rationale,
        recorded_at: mender_core::now_rfc3339(),
    }
}

/// Hand `feedback` to the knowledge base and audit how that went. A failing
/// knowledge base is recorded, never fatal.
pub(crate) async fn record_feedback(
    target: &dyn KnowledgeFeedback,
    journal: &mut Journal<'_>,
    feedback: &ResolutionFeedback,
) -> Result<(), ControllerError> {
    let (ok, detail) = match target.record(feedback).await {
        Ok(()) => (true, None),
        Err(e) => {
            tracing::warn!(incident = %feedback.incident_id, error = %e, "knowledge feedback failed");
            (false, Some(format!("{e:#}")))
        }
    };
    journal
        .commit(EntryKind::FeedbackRecorded { ok, detail })
        .await?;
    Ok(())
}
