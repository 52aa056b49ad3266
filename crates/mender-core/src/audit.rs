//! Hash-chained audit entries. One chain per incident.

use crate::digest::value_digest;
use crate::error::ReplayError;
use crate::lifecycle::LifecycleEvent;
use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Digest {
    pub alg: String,
    pub canon: String,
    pub value: String,
}

/// What happened. Entries that move the lifecycle map to a `LifecycleEvent`;
/// the rest annotate the current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    IncidentOpened {
        incident: Incident,
    },
    ContextGathered {
        bundle: ContextBundle,
    },
    AnalysisCompleted {
        report: DiagnosticReport,
    },
    AnalysisFailed {
        reason: String,
    },
    ReviewOpened,
    DryRunRecorded {
        dry_run: DryRun,
    },
    /// The execution-time simulation could not run; execution went on without it.
    DryRunFailed {
        reason: String,
    },
    PolicyViolation {
        violation: PolicyViolation,
    },
    DecisionRecorded {
        decision: Decision,
    },
    ExecutionStarted {
        decision_id: String,
    },
    PreflightCompleted {
        checks: Vec<CheckResult>,
    },
    ActionStarted {
        action_id: String,
        index: usize,
    },
    ActionFinished {
        action_id: String,
        status: ActionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    ExecutionFinished {
        outcome: ExecutionOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<ExecutionFailure>,
    },
    FeedbackRecorded {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    RollbackStarted {
        actor: String,
        rationale: String,
    },
    RollbackFinished {
        succeeded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::IncidentOpened { .. } => "incident_opened",
            EntryKind::ContextGathered { .. } => "context_gathered",
            EntryKind::AnalysisCompleted { .. } => "analysis_completed",
            EntryKind::AnalysisFailed { .. } => "analysis_failed",
            EntryKind::ReviewOpened => "review_opened",
            EntryKind::DryRunRecorded { .. } => "dry_run_recorded",
            EntryKind::DryRunFailed { .. } => "dry_run_failed",
            EntryKind::PolicyViolation { .. } => "policy_violation",
            EntryKind::DecisionRecorded { .. } => "decision_recorded",
            EntryKind::ExecutionStarted { .. } => "execution_started",
            EntryKind::PreflightCompleted { .. } => "preflight_completed",
            EntryKind::ActionStarted { .. } => "action_started",
            EntryKind::ActionFinished { .. } => "action_finished",
            EntryKind::ExecutionFinished { .. } => "execution_finished",
            EntryKind::FeedbackRecorded { .. } => "feedback_recorded",
            EntryKind::RollbackStarted { .. } => "rollback_started",
            EntryKind::RollbackFinished { .. } => "rollback_finished",
        }
    }

    /// The lifecycle event this entry drives, if any.
    pub fn lifecycle_event(&self) -> Option<LifecycleEvent> {
        match self {
            EntryKind::ContextGathered { .. } => Some(LifecycleEvent::ContextGathered),
            EntryKind::AnalysisCompleted { .. } => Some(LifecycleEvent::AnalysisCompleted),
            EntryKind::AnalysisFailed { .. } => Some(LifecycleEvent::AnalysisFailed),
            EntryKind::ReviewOpened => Some(LifecycleEvent::ReviewOpened),
            EntryKind::DecisionRecorded { decision } => Some(match decision.kind {
                DecisionKind::Reject => LifecycleEvent::DecisionRejected,
                DecisionKind::Approve | DecisionKind::Modify => LifecycleEvent::DecisionApproved,
            }),
            EntryKind::ExecutionStarted { .. } => Some(LifecycleEvent::ExecutionStarted),
            EntryKind::ExecutionFinished { outcome, .. } => match outcome {
                ExecutionOutcome::Succeeded => Some(LifecycleEvent::ExecutionSucceeded),
                ExecutionOutcome::Failed => Some(LifecycleEvent::ExecutionFailed),
                ExecutionOutcome::RolledBack => None,
            },
            EntryKind::RollbackFinished {
                succeeded: true, ..
            } => Some(LifecycleEvent::RollbackSucceeded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub entry_id: String,
    pub incident_id: String,
    /// Position in the incident's chain, starting at 0.
    pub seq: u64,
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    #[serde(default)]
    pub hash: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub digests: Vec<Digest>,
}

fn new_entry_id() -> String {
    format!("aud_{}", ulid::Ulid::new().to_string().to_lowercase())
}

/// Hash of an entry: everything except `hash`, `digests` and
/// `schema_version`, in canonical JSON, SHA-256.
pub fn compute_entry_hash(entry: &AuditEntry) -> String {
    let mut val = serde_json::to_value(entry).expect("entry serialization should not fail");
    if let Some(obj) = val.as_object_mut() {
        obj.remove("hash");
        obj.remove("digests");
        obj.remove("schema_version");
    }
    value_digest(&val)
}

fn finalize(entry: &mut AuditEntry) {
    let hash_value = compute_entry_hash(entry);
    entry.hash = hash_value.clone();
    entry.digests = vec![Digest {
        alg: "sha256".to_string(),
        canon: CANON_MENDER_V1.to_string(),
        value: hash_value,
    }];
}

impl AuditEntry {
    /// Create and seal the entry at position `seq` after `parent_hash`.
    pub fn new(incident_id: &str, seq: u64, parent_hash: Option<&str>, kind: EntryKind) -> Self {
        let mut entry = AuditEntry {
            entry_id: new_entry_id(),
            incident_id: incident_id.to_string(),
            seq,
            ts: crate::now_rfc3339(),
            parent_hash: parent_hash.map(|s| s.to_string()),
            hash: String::new(),
            kind,
            schema_version: SCHEMA_VERSION,
            digests: Vec::new(),
        };
        finalize(&mut entry);
        entry
    }

    pub fn is_sealed(&self) -> bool {
        !self.hash.is_empty() && self.hash == compute_entry_hash(self)
    }
}

/// Check one incident's chain: single incident, contiguous `seq` from 0,
/// each `parent_hash` pointing at its predecessor, every hash intact.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ReplayError> {
    let first = entries.first().ok_or(ReplayError::Empty)?;
    let mut prev_hash: Option<&str> = None;
    for (i, entry) in entries.iter().enumerate() {
        if entry.incident_id != first.incident_id {
            return Err(ReplayError::MixedIncidents {
                expected: first.incident_id.clone(),
                found: entry.incident_id.clone(),
            });
        }
        if entry.seq != i as u64 {
            return Err(ReplayError::SequenceGap {
                expected: i as u64,
                found: entry.seq,
            });
        }
        if entry.parent_hash.as_deref() != prev_hash {
            return Err(ReplayError::BrokenChain { seq: entry.seq });
        }
        if !entry.is_sealed() {
            return Err(ReplayError::HashMismatch { seq: entry.seq });
        }
        prev_hash = Some(entry.hash.as_str());
    }
    Ok(())
}
