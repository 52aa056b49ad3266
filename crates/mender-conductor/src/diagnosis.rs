use crate::collab::DiagnosticEngine;
use crate::error::StageFailure;
use mender_core::risk::RiskClassifier;
use mender_core::types::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Wraps the diagnostic engine: enforces the deadline, checks the report's
/// shape, and re-validates every upstream risk label.
pub struct DiagnosticAdapter {
    engine: Arc<dyn DiagnosticEngine>,
    classifier: RiskClassifier,
    deadline: Duration,
}

impl DiagnosticAdapter {
    pub fn new(engine: Arc<dyn DiagnosticEngine>, classifier: RiskClassifier, deadline: Duration) -> Self {
        Self {
            engine,
            classifier,
            deadline,
        }
    }

    pub async fn analyze(
        &self,
        incident: &Incident,
        context: &ContextBundle,
    ) -> Result<DiagnosticReport, StageFailure> {
        let report = tokio::time::timeout(
            self.deadline,
            self.engine.analyze(incident, context, self.deadline),
        )
        .await
        .map_err(|_| StageFailure::DiagnosticTimeout(self.deadline))??;

        check_shape(&report)?;

        let actions = report
            .actions
            .into_iter()
            .map(|action| {
                let upstream = action.risk_tier;
                let action = self.classifier.reclassify(action, incident);
                if action.risk_tier != upstream {
                    tracing::info!(
                        incident = %incident.id,
                        action = %action.id,
                        from = %upstream,
                        to = %action.risk_tier,
                        "risk tier raised"
                    );
                }
                action
            })
            .collect();

        Ok(DiagnosticReport { actions, ..report })
    }
}

fn check_shape(report: &DiagnosticReport) -> Result<(), StageFailure> {
    let malformed = |msg: &str| Err(StageFailure::MalformedReport(msg.to_string()));
    if report.confidence > 100 {
        return malformed("confidence above 100");
    }
    if report.actions.is_empty() {
        return malformed("empty action plan");
    }
    if report.rollback_command.trim().is_empty() {
        return malformed("missing rollback command");
    }
    let mut seen = HashSet::new();
    for a in &report.actions {
        if a.id.trim().is_empty() || a.command.trim().is_empty() {
            return malformed("action without id or command");
        }
        if !seen.insert(a.id.as_str()) {
            return Err(StageFailure::MalformedReport(format!("duplicate action id {}", a.id)));
        }
    }
    Ok(())
}
