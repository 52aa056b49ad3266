use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Current schema version for new audit entries.
pub const SCHEMA_VERSION: u32 = 1;

/// Canonicalization scheme name for digest computation.
pub const CANON_MENDER_V1: &str = "mender-canon-v1";

// ── Incident ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    P1,
    P2,
    P3,
    P4,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
            Severity::P4 => "P4",
        };
        f.write_str(s)
    }
}

/// An operational incident as received at intake. Immutable once opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub environment: String,
    pub application: String,
    pub host: String,
    #[serde(default)]
    pub description: String,
    /// Raw log excerpt attached by the reporter.
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Incident {
    /// True when the environment or any tag matches one of `markers`
    /// (case-insensitive).
    pub fn is_production(&self, markers: &[String]) -> bool {
        markers.iter().any(|m| {
            self.environment.eq_ignore_ascii_case(m)
                || self.tags.iter().any(|t| t.eq_ignore_ascii_case(m))
        })
    }
}

// ── Risk ──

/// Potential for harm of a proposed action. Ordered: `Safe < NeedsApproval < HighRisk`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Safe,
    #[serde(alias = "needs-approval")]
    NeedsApproval,
    #[serde(alias = "high-risk")]
    HighRisk,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Safe => "safe",
            RiskTier::NeedsApproval => "needs_approval",
            RiskTier::HighRisk => "high_risk",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One corrective step of an action plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposedAction {
    pub id: String,
    pub label: String,
    pub command: String,
    #[serde(default)]
    pub risk_tier: RiskTier,
    /// Upstream label, present only when the classifier raised the tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raised_from: Option<RiskTier>,
}

// ── Context ──

/// Knowledge-base article as returned by a knowledge search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeArticle {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Knowledge-base article matched against an incident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeRef {
    pub id: String,
    pub title: String,
    pub tag_overlap: Vec<String>,
}

/// A previously resolved incident similar to the current one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PastIncident {
    pub id: String,
    /// 0..=100
    pub similarity: u8,
    pub resolution: String,
    pub date: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    KnowledgeBase,
    History,
}

/// A degraded context lookup, surfaced to the reviewer and the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextWarning {
    pub source: ContextSource,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextBundle {
    /// Ordered by overlap size (descending), then id.
    pub knowledge: Vec<KnowledgeRef>,
    /// Ordered by similarity (descending), then id.
    pub similar: Vec<PastIncident>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ContextWarning>,
}

// ── Diagnosis ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub summary: String,
    pub root_cause: String,
    /// 0..=100
    pub confidence: u8,
    #[serde(default)]
    pub components: Vec<String>,
    pub actions: Vec<ProposedAction>,
    pub rollback_command: String,
}

impl DiagnosticReport {
    pub fn action(&self, id: &str) -> Option<&ProposedAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Ids of actions at `HighRisk`, in plan order.
    pub fn high_risk_ids(&self) -> Vec<String> {
        high_risk_ids(&self.actions)
    }
}

/// Ids of `HighRisk` actions, in order.
pub fn high_risk_ids(actions: &[ProposedAction]) -> Vec<String> {
    actions
        .iter()
        .filter(|a| a.risk_tier == RiskTier::HighRisk)
        .map(|a| a.id.clone())
        .collect()
}

/// Non-mutating simulation of one action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationReport {
    pub action_id: String,
    pub preview: String,
    /// Whether the action would change target state if run.
    #[serde(default)]
    pub mutating: bool,
}

/// A dry run over a whole action set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DryRun {
    /// `action_set_digest` of the simulated actions.
    pub action_set_digest: String,
    pub simulations: Vec<SimulationReport>,
}

// ── Decision ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Modify,
    Reject,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionKind::Approve => "approve",
            DecisionKind::Modify => "modify",
            DecisionKind::Reject => "reject",
        };
        f.write_str(s)
    }
}

/// Diff of a reviewer edit against the proposed action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionEdit {
    pub action_id: String,
    pub original_command: String,
    pub edited_command: String,
    pub original_tier: RiskTier,
    pub reclassified_tier: RiskTier,
}

/// A reviewer's disposition of a recommendation. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub decision_id: String,
    pub kind: DecisionKind,
    /// Empty for `Reject`.
    pub final_actions: Vec<ProposedAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<ActionEdit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acknowledged: Vec<String>,
    pub rationale: String,
    pub actor: String,
    pub decided_at: String,
    /// Digest of a review-time dry run covering exactly `final_actions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_dry_run: Option<String>,
}

/// A refused submission. Audited, never changes lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyViolation {
    pub actor: String,
    pub kind: DecisionKind,
    pub action_ids: Vec<String>,
    pub reason: String,
}

// ── Execution ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PreflightCheck {
    AccessVerification,
    TargetReachability,
    DependencyCheck,
}

impl PreflightCheck {
    /// All checks in the order they run.
    pub const ALL: [PreflightCheck; 3] = [
        PreflightCheck::AccessVerification,
        PreflightCheck::TargetReachability,
        PreflightCheck::DependencyCheck,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PreflightCheck::AccessVerification => "access_verification",
            PreflightCheck::TargetReachability => "target_reachability",
            PreflightCheck::DependencyCheck => "dependency_check",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Waiting,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub check: PreflightCheck,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRun {
    pub action: ProposedAction,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
    RolledBack,
}

/// Why an execution ended in `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionFailure {
    PreflightFailed {
        check: PreflightCheck,
        detail: String,
    },
    ActionExecutionFailed {
        action_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        detail: String,
    },
    ExecutorUnavailable {
        detail: String,
    },
    /// Operator stopped the sequence between two actions.
    Halted {
        next_action_id: String,
    },
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionFailure::PreflightFailed { check, detail } => {
                write!(f, "pre-flight {} failed: {detail}", check.name())
            }
            ExecutionFailure::ActionExecutionFailed {
                action_id,
                exit_code,
                detail,
            } => match exit_code {
                Some(code) => write!(f, "action {action_id} failed (exit {code}): {detail}"),
                None => write!(f, "action {action_id} failed: {detail}"),
            },
            ExecutionFailure::ExecutorUnavailable { detail } => {
                write!(f, "executor unavailable: {detail}")
            }
            ExecutionFailure::Halted { next_action_id } => {
                write!(f, "halted by operator before {next_action_id}")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackAttempt {
    pub actor: String,
    pub rationale: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub decision_id: String,
    pub actions: Vec<ActionRun>,
    /// `None` while the execution is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    #[serde(default)]
    pub preflight: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRun>,
    /// Why the execution-time simulation was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_failure: Option<String>,
    pub rollback_command: String,
    #[serde(default)]
    pub rollbacks: Vec<RollbackAttempt>,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Ids of the audit entries that shaped this record.
    #[serde(default)]
    pub audit_refs: Vec<String>,
}

impl ExecutionRecord {
    pub fn count(&self, status: ActionStatus) -> usize {
        self.actions.iter().filter(|a| a.status == status).count()
    }

    /// Rollback command, exposed only after a failed execution.
    pub fn available_rollback(&self) -> Option<&str> {
        match self.outcome {
            Some(ExecutionOutcome::Failed) => Some(self.rollback_command.as_str()),
            _ => None,
        }
    }

    pub fn action(&self, id: &str) -> Option<&ActionRun> {
        self.actions.iter().find(|a| a.action.id == id)
    }

    /// A simulation outcome may be recorded once, before any action runs.
    pub fn can_record_dry_run(&self) -> bool {
        self.dry_run.is_none()
            && self.dry_run_failure.is_none()
            && self.count(ActionStatus::Pending) == self.actions.len()
    }
}
