//! The incident record: a fold over the incident's audit chain.
//!
//! The record is only ever changed by applying a sealed entry, so a record
//! rebuilt from the log is identical to the one held in memory.

use crate::audit::{verify_chain, AuditEntry, EntryKind};
use crate::error::{EntryError, ReplayError};
use crate::lifecycle::{self, Effect, LifecycleState};
use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackNote {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentRecord {
    pub incident: Incident,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<DiagnosticReport>,
    /// Why the incident was escalated to manual triage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_dry_run: Option<DryRun>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_violations: Vec<PolicyViolation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackNote>,
    pub opened_at: String,
    pub updated_at: String,
    pub head_hash: String,
    pub next_seq: u64,
}

fn require(kind: &EntryKind, state: LifecycleState, allowed: &[LifecycleState]) -> Result<(), EntryError> {
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(EntryError::NotAccepted {
            kind: kind.name(),
            state,
        })
    }
}

fn inconsistent(kind: &EntryKind, detail: impl Into<String>) -> EntryError {
    EntryError::Inconsistent {
        kind: kind.name(),
        detail: detail.into(),
    }
}

impl IncidentRecord {
    /// Start a record from the chain's first entry.
    pub fn open(entry: &AuditEntry) -> Result<Self, EntryError> {
        let EntryKind::IncidentOpened { incident } = &entry.kind else {
            return Err(EntryError::NotAccepted {
                kind: entry.kind.name(),
                state: LifecycleState::Intake,
            });
        };
        if entry.seq != 0 {
            return Err(EntryError::OutOfOrder {
                expected: 0,
                found: entry.seq,
            });
        }
        if entry.parent_hash.is_some() {
            return Err(EntryError::Unlinked { seq: entry.seq });
        }
        if incident.id != entry.incident_id {
            return Err(EntryError::WrongIncident {
                expected: entry.incident_id.clone(),
                found: incident.id.clone(),
            });
        }
        Ok(Self {
            incident: incident.clone(),
            state: LifecycleState::Intake,
            context: None,
            report: None,
            triage_reason: None,
            review_dry_run: None,
            policy_violations: Vec::new(),
            decision: None,
            execution: None,
            feedback: None,
            opened_at: entry.ts.clone(),
            updated_at: entry.ts.clone(),
            head_hash: entry.hash.clone(),
            next_seq: 1,
        })
    }

    pub fn id(&self) -> &str {
        &self.incident.id
    }

    /// Seal `kind` as the next entry of this incident's chain. Does not apply it.
    pub fn next_entry(&self, kind: EntryKind) -> AuditEntry {
        AuditEntry::new(&self.incident.id, self.next_seq, Some(&self.head_hash), kind)
    }

    /// Whether `kind` may be appended now. Returns the lifecycle transition
    /// it would make, if any.
    pub fn validate(
        &self,
        kind: &EntryKind,
    ) -> Result<Option<(LifecycleState, Effect)>, EntryError> {
        let transition = match kind.lifecycle_event() {
            Some(event) => Some(lifecycle::next(self.state, event)?),
            None => None,
        };
        let exec = self.execution.as_ref();
        match kind {
            EntryKind::IncidentOpened { .. } => {
                return Err(EntryError::NotAccepted {
                    kind: kind.name(),
                    state: self.state,
                })
            }
            EntryKind::ContextGathered { .. }
            | EntryKind::AnalysisFailed { .. }
            | EntryKind::ReviewOpened => {}
            EntryKind::AnalysisCompleted { report } => {
                if report.confidence > 100 {
                    return Err(inconsistent(kind, "confidence above 100"));
                }
                let mut ids: Vec<&str> = report.actions.iter().map(|a| a.id.as_str()).collect();
                ids.sort_unstable();
                if ids.windows(2).any(|w| w[0] == w[1]) {
                    return Err(inconsistent(kind, "duplicate action ids"));
                }
            }
            EntryKind::DryRunRecorded { .. } => {
                require(
                    kind,
                    self.state,
                    &[LifecycleState::PendingReview, LifecycleState::Executing],
                )?;
                if let Some(exec) = exec {
                    if !exec.can_record_dry_run() {
                        return Err(inconsistent(kind, "dry run after execution began"));
                    }
                }
            }
            EntryKind::DryRunFailed { .. } => {
                require(kind, self.state, &[LifecycleState::Executing])?;
                let exec = exec.ok_or_else(|| inconsistent(kind, "no execution"))?;
                if !exec.can_record_dry_run() {
                    return Err(inconsistent(kind, "dry run after execution began"));
                }
            }
            EntryKind::PolicyViolation { .. } => {
                require(kind, self.state, &[LifecycleState::PendingReview])?;
            }
            EntryKind::DecisionRecorded { decision } => {
                let empty = decision.final_actions.is_empty();
                match decision.kind {
                    DecisionKind::Reject if !empty => {
                        return Err(inconsistent(kind, "reject carries actions"))
                    }
                    DecisionKind::Approve | DecisionKind::Modify if empty => {
                        return Err(inconsistent(kind, "approval without actions"))
                    }
                    _ => {}
                }
            }
            EntryKind::ExecutionStarted { decision_id } => {
                let decision = self
                    .decision
                    .as_ref()
                    .ok_or_else(|| inconsistent(kind, "no decision"))?;
                if &decision.decision_id != decision_id {
                    return Err(inconsistent(kind, "decision id mismatch"));
                }
                if self.report.is_none() {
                    return Err(inconsistent(kind, "no diagnostic report"));
                }
            }
            EntryKind::PreflightCompleted { .. } => {
                require(kind, self.state, &[LifecycleState::Executing])?;
                let exec = exec.ok_or_else(|| inconsistent(kind, "no execution"))?;
                if !exec.preflight.is_empty() {
                    return Err(inconsistent(kind, "pre-flight already recorded"));
                }
            }
            EntryKind::ActionStarted { action_id, index } => {
                require(kind, self.state, &[LifecycleState::Executing])?;
                let exec = exec.ok_or_else(|| inconsistent(kind, "no execution"))?;
                if exec.count(ActionStatus::Running) > 0 {
                    return Err(inconsistent(kind, "another action is running"));
                }
                let next = exec
                    .actions
                    .iter()
                    .position(|a| a.status == ActionStatus::Pending);
                if next != Some(*index)
                    || exec.actions.get(*index).map(|a| a.action.id.as_str()) != Some(action_id)
                {
                    return Err(inconsistent(kind, format!("{action_id} is not next in plan order")));
                }
            }
            EntryKind::ActionFinished {
                action_id, status, ..
            } => {
                require(kind, self.state, &[LifecycleState::Executing])?;
                let exec = exec.ok_or_else(|| inconsistent(kind, "no execution"))?;
                if !matches!(status, ActionStatus::Done | ActionStatus::Failed) {
                    return Err(inconsistent(kind, "finish status must be done or failed"));
                }
                match exec.action(action_id) {
                    Some(run) if run.status == ActionStatus::Running => {}
                    _ => return Err(inconsistent(kind, format!("{action_id} is not running"))),
                }
            }
            EntryKind::ExecutionFinished { outcome, failure } => {
                let exec = exec.ok_or_else(|| inconsistent(kind, "no execution"))?;
                if exec.count(ActionStatus::Running) > 0 {
                    return Err(inconsistent(kind, "an action is still running"));
                }
                match outcome {
                    ExecutionOutcome::Succeeded => {
                        if failure.is_some() || exec.count(ActionStatus::Done) != exec.actions.len() {
                            return Err(inconsistent(kind, "success with unfinished actions"));
                        }
                    }
                    ExecutionOutcome::Failed => {
                        if failure.is_none() {
                            return Err(inconsistent(kind, "failure without cause"));
                        }
                    }
                    ExecutionOutcome::RolledBack => {
                        return Err(EntryError::NotAccepted {
                            kind: kind.name(),
                            state: self.state,
                        })
                    }
                }
            }
            EntryKind::FeedbackRecorded { .. } => {
                require(kind, self.state, &[LifecycleState::Resolved, LifecycleState::Rejected])?;
                if self.feedback.is_some() {
                    return Err(inconsistent(kind, "feedback already recorded"));
                }
            }
            EntryKind::RollbackStarted { .. } => {
                require(kind, self.state, &[LifecycleState::ExecFailed])?;
                if self.rollback_in_flight() {
                    return Err(inconsistent(kind, "rollback already in flight"));
                }
            }
            EntryKind::RollbackFinished { .. } => {
                require(kind, self.state, &[LifecycleState::ExecFailed])?;
                if !self.rollback_in_flight() {
                    return Err(inconsistent(kind, "no rollback in flight"));
                }
            }
        }
        Ok(transition)
    }

    /// Apply a sealed entry. The entry must extend this record's chain.
    pub fn apply(&mut self, entry: &AuditEntry) -> Result<Effect, EntryError> {
        if entry.incident_id != self.incident.id {
            return Err(EntryError::WrongIncident {
                expected: self.incident.id.clone(),
                found: entry.incident_id.clone(),
            });
        }
        if entry.seq != self.next_seq {
            return Err(EntryError::OutOfOrder {
                expected: self.next_seq,
                found: entry.seq,
            });
        }
        if entry.parent_hash.as_deref() != Some(self.head_hash.as_str()) {
            return Err(EntryError::Unlinked { seq: entry.seq });
        }
        let transition = self.validate(&entry.kind)?;
        self.fold(entry);
        if let Some((next, _)) = transition {
            self.state = next;
        }
        self.head_hash = entry.hash.clone();
        self.next_seq += 1;
        self.updated_at = entry.ts.clone();
        Ok(transition.map(|(_, effect)| effect).unwrap_or(Effect::None))
    }

    fn fold(&mut self, entry: &AuditEntry) {
        let ts = &entry.ts;
        match &entry.kind {
            EntryKind::IncidentOpened { .. } | EntryKind::ReviewOpened => {}
            EntryKind::ContextGathered { bundle } => self.context = Some(bundle.clone()),
            EntryKind::AnalysisCompleted { report } => self.report = Some(report.clone()),
            EntryKind::AnalysisFailed { reason } => self.triage_reason = Some(reason.clone()),
            EntryKind::DryRunRecorded { dry_run } => {
                if self.state == LifecycleState::PendingReview {
                    self.review_dry_run = Some(dry_run.clone());
                } else if let Some(exec) = self.execution.as_mut() {
                    exec.dry_run = Some(dry_run.clone());
                }
            }
            EntryKind::DryRunFailed { reason } => {
                if let Some(exec) = self.execution.as_mut() {
                    exec.dry_run_failure = Some(reason.clone());
                }
            }
            EntryKind::PolicyViolation { violation } => {
                self.policy_violations.push(violation.clone())
            }
            EntryKind::DecisionRecorded { decision } => self.decision = Some(decision.clone()),
            EntryKind::ExecutionStarted { decision_id } => {
                let actions = self
                    .decision
                    .as_ref()
                    .map(|d| d.final_actions.clone())
                    .unwrap_or_default();
                self.execution = Some(ExecutionRecord {
                    decision_id: decision_id.clone(),
                    actions: actions
                        .into_iter()
                        .map(|action| ActionRun {
                            action,
                            status: ActionStatus::Pending,
                            exit_code: None,
                            output: None,
                            started_at: None,
                            completed_at: None,
                        })
                        .collect(),
                    outcome: None,
                    failure: None,
                    preflight: Vec::new(),
                    dry_run: None,
                    dry_run_failure: None,
                    rollback_command: self
                        .report
                        .as_ref()
                        .map(|r| r.rollback_command.clone())
                        .unwrap_or_default(),
                    rollbacks: Vec::new(),
                    started_at: ts.clone(),
                    completed_at: None,
                    audit_refs: Vec::new(),
                });
            }
            EntryKind::PreflightCompleted { checks } => {
                if let Some(exec) = self.execution.as_mut() {
                    exec.preflight = checks.clone();
                }
            }
            EntryKind::ActionStarted { index, .. } => {
                if let Some(run) = self.execution.as_mut().and_then(|e| e.actions.get_mut(*index)) {
                    run.status = ActionStatus::Running;
                    run.started_at = Some(ts.clone());
                }
            }
            EntryKind::ActionFinished {
                action_id,
                status,
                exit_code,
                output,
            } => {
                if let Some(run) = self
                    .execution
                    .as_mut()
                    .and_then(|e| e.actions.iter_mut().find(|a| &a.action.id == action_id))
                {
                    run.status = *status;
                    run.exit_code = *exit_code;
                    run.output = output.clone();
                    run.completed_at = Some(ts.clone());
                }
            }
            EntryKind::ExecutionFinished { outcome, failure } => {
                if let Some(exec) = self.execution.as_mut() {
                    exec.outcome = Some(*outcome);
                    exec.failure = failure.clone();
                    exec.completed_at = Some(ts.clone());
                }
            }
            EntryKind::FeedbackRecorded { ok, detail } => {
                self.feedback = Some(FeedbackNote {
                    ok: *ok,
                    detail: detail.clone(),
                })
            }
            EntryKind::RollbackStarted { actor, rationale } => {
                if let Some(exec) = self.execution.as_mut() {
                    exec.rollbacks.push(RollbackAttempt {
                        actor: actor.clone(),
                        rationale: rationale.clone(),
                        started_at: ts.clone(),
                        completed_at: None,
                        succeeded: None,
                        exit_code: None,
                        detail: None,
                    });
                }
            }
            EntryKind::RollbackFinished {
                succeeded,
                exit_code,
                detail,
            } => {
                if let Some(exec) = self.execution.as_mut() {
                    if let Some(attempt) = exec.rollbacks.last_mut() {
                        attempt.completed_at = Some(ts.clone());
                        attempt.succeeded = Some(*succeeded);
                        attempt.exit_code = *exit_code;
                        attempt.detail = detail.clone();
                    }
                    if *succeeded {
                        exec.outcome = Some(ExecutionOutcome::RolledBack);
                    }
                }
            }
        }
        if let Some(exec) = self.execution.as_mut() {
            exec.audit_refs.push(entry.entry_id.clone());
        }
    }

    fn rollback_in_flight(&self) -> bool {
        self.execution
            .as_ref()
            .and_then(|e| e.rollbacks.last())
            .is_some_and(|r| r.completed_at.is_none())
    }
}

/// Rebuild an incident record from its audit chain alone.
pub fn replay(entries: &[AuditEntry]) -> Result<IncidentRecord, ReplayError> {
    verify_chain(entries)?;
    let first = entries.first().ok_or(ReplayError::Empty)?;
    let mut record = IncidentRecord::open(first).map_err(|e| match e {
        EntryError::NotAccepted { kind, .. } => ReplayError::NotOpened(kind),
        other => ReplayError::Rejected { seq: 0, source: other },
    })?;
    for entry in &entries[1..] {
        record
            .apply(entry)
            .map_err(|source| ReplayError::Rejected {
                seq: entry.seq,
                source,
            })?;
    }
    Ok(record)
}
