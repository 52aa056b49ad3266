use crate::error::GateError;
use mender_core::digest::action_set_digest;
use mender_core::risk::RiskClassifier;
use mender_core::types::*;
use std::collections::{BTreeSet, HashSet};

/// A reviewer's replacement command for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEdit {
    pub action_id: String,
    pub command: String,
}

/// Reviewer input to the decision gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub kind: DecisionKind,
    pub edits: Vec<CommandEdit>,
    /// Ids of high-risk actions the reviewer explicitly acknowledges.
    pub acknowledged: BTreeSet<String>,
    pub rationale: String,
    pub actor: String,
    /// Claim that the review-time dry run covered the final action set.
    pub confirm_dry_run: bool,
}

impl Submission {
    pub fn new(kind: DecisionKind, actor: &str, rationale: &str) -> Self {
        Self {
            kind,
            edits: Vec::new(),
            acknowledged: BTreeSet::new(),
            rationale: rationale.to_string(),
            actor: actor.to_string(),
            confirm_dry_run: false,
        }
    }

    pub fn acknowledge(mut self, action_id: &str) -> Self {
        self.acknowledged.insert(action_id.to_string());
        self
    }

    pub fn edit(mut self, action_id: &str, command: &str) -> Self {
        self.edits.push(CommandEdit {
            action_id: action_id.to_string(),
            command: command.to_string(),
        });
        self
    }

    pub fn confirm_dry_run(mut self) -> Self {
        self.confirm_dry_run = true;
        self
    }

    /// Ids named by the submission, for audit of a refusal.
    pub fn action_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.acknowledged.clone();
        ids.extend(self.edits.iter().map(|e| e.action_id.clone()));
        ids.into_iter().collect()
    }
}

/// Turns reviewer input into an immutable decision, enforcing the risk policy.
pub struct DecisionGate {
    classifier: RiskClassifier,
}

impl DecisionGate {
    pub fn new(classifier: RiskClassifier) -> Self {
        Self { classifier }
    }

    pub fn submit(
        &self,
        incident: &Incident,
        report: &DiagnosticReport,
        review_dry_run: Option<&DryRun>,
        submission: Submission,
    ) -> Result<Decision, GateError> {
        if submission.kind == DecisionKind::Reject {
            return Ok(Decision {
                decision_id: new_decision_id(),
                kind: DecisionKind::Reject,
                final_actions: Vec::new(),
                edits: Vec::new(),
                acknowledged: Vec::new(),
                rationale: submission.rationale,
                actor: submission.actor,
                decided_at: mender_core::now_rfc3339(),
                confirmed_dry_run: None,
            });
        }

        if submission.actor.trim().is_empty() {
            return Err(GateError::InvalidSubmission("actor is required".into()));
        }
        if let Some(unknown) = submission
            .acknowledged
            .iter()
            .find(|id| report.action(id).is_none())
        {
            return Err(GateError::InvalidSubmission(format!(
                "acknowledged unknown action {unknown}"
            )));
        }

        let (final_actions, edits) = if submission.kind == DecisionKind::Approve {
            if !submission.edits.is_empty() {
                return Err(GateError::InvalidSubmission(
                    "approve carries no edits; use modify".into(),
                ));
            }
            // Report tiers may predate the current policy.
            let actions = report
                .actions
                .iter()
                .map(|a| self.classifier.reclassify(a.clone(), incident))
                .collect();
            (actions, Vec::new())
        } else {
            self.apply_edits(incident, report, &submission.edits)?
        };

        let missing: Vec<String> = high_risk_ids(&final_actions)
            .into_iter()
            .filter(|id| !submission.acknowledged.contains(id))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(incident = %incident.id, ids = ?missing, "unacknowledged high-risk actions");
            return Err(GateError::UnacknowledgedHighRisk { ids: missing });
        }

        let confirmed_dry_run = if submission.confirm_dry_run {
            let digest = action_set_digest(&final_actions);
            match review_dry_run {
                Some(dr) if dr.action_set_digest == digest => Some(digest),
                _ => {
                    tracing::warn!(
                        incident = %incident.id,
                        "dry run does not cover the final action set; execution will simulate"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Decision {
            decision_id: new_decision_id(),
            kind: submission.kind,
            final_actions,
            edits,
            acknowledged: submission.acknowledged.into_iter().collect(),
            rationale: submission.rationale,
            actor: submission.actor,
            decided_at: mender_core::now_rfc3339(),
            confirmed_dry_run,
        })
    }

    /// Apply reviewer edits. An edited action is re-classified from its new
    /// text and never drops below its original tier.
    fn apply_edits(
        &self,
        incident: &Incident,
        report: &DiagnosticReport,
        edits: &[CommandEdit],
    ) -> Result<(Vec<ProposedAction>, Vec<ActionEdit>), GateError> {
        if edits.is_empty() {
            return Err(GateError::InvalidSubmission(
                "modify requires at least one edit".into(),
            ));
        }
        let mut seen = HashSet::new();
        for e in edits {
            if report.action(&e.action_id).is_none() {
                return Err(GateError::InvalidSubmission(format!(
                    "edit targets unknown action {}",
                    e.action_id
                )));
            }
            if !seen.insert(e.action_id.as_str()) {
                return Err(GateError::InvalidSubmission(format!(
                    "action {} edited twice",
                    e.action_id
                )));
            }
            if e.command.trim().is_empty() {
                return Err(GateError::InvalidSubmission(format!(
                    "edit of {} has an empty command",
                    e.action_id
                )));
            }
        }

        let mut diffs = Vec::new();
        let actions = report
            .actions
            .iter()
            .map(|original| {
                let original = self.classifier.reclassify(original.clone(), incident);
                let Some(edit) = edits.iter().find(|e| e.action_id == original.id) else {
                    return original;
                };
                let edited = self.classifier.reclassify(
                    ProposedAction {
                        command: edit.command.clone(),
                        ..original.clone()
                    },
                    incident,
                );
                diffs.push(ActionEdit {
                    action_id: original.id.clone(),
                    original_command: original.command.clone(),
                    edited_command: edited.command.clone(),
                    original_tier: original.risk_tier,
                    reclassified_tier: edited.risk_tier,
                });
                if edited.risk_tier > original.risk_tier {
                    tracing::info!(
                        incident = %incident.id,
                        action = %edited.id,
                        tier = %edited.risk_tier,
                        "edited command raised risk tier"
                    );
                }
                edited
            })
            .collect();
        Ok((actions, diffs))
    }
}

fn new_decision_id() -> String {
    format!("dec_{}", ulid::Ulid::new().to_string().to_lowercase())
}
