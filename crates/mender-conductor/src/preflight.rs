use crate::collab::PreflightProbe;
use mender_core::types::*;
use std::sync::Arc;

/// Result of running all pre-flight checks.
#[derive(Debug)]
pub struct PreflightRun {
    pub all_passed: bool,
    pub results: Vec<CheckResult>,
    pub failure: Option<ExecutionFailure>,
}

/// Runs the pre-flight checks in order, stopping at the first failure.
pub struct PreflightEngine {
    probe: Arc<dyn PreflightProbe>,
}

impl PreflightEngine {
    pub fn new(probe: Arc<dyn PreflightProbe>) -> Self {
        Self { probe }
    }

    pub async fn run_all(&self, incident: &Incident, actions: &[ProposedAction]) -> PreflightRun {
        let checks = PreflightCheck::ALL;
        let mut results = Vec::new();

        for (i, check) in checks.iter().enumerate() {
            let output = self.probe.probe(*check, incident, actions).await;
            results.push(CheckResult {
                check: *check,
                status: if output.passed {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed
                },
                detail: output.detail.clone(),
                duration_ms: output.duration.as_millis() as u64,
            });

            if !output.passed {
                // Mark remaining as Waiting
                for rest in &checks[i + 1..] {
                    results.push(CheckResult {
                        check: *rest,
                        status: CheckStatus::Waiting,
                        detail: None,
                        duration_ms: 0,
                    });
                }
                tracing::warn!(incident = %incident.id, check = check.name(), "pre-flight failed");
                return PreflightRun {
                    all_passed: false,
                    results,
                    failure: Some(ExecutionFailure::PreflightFailed {
                        check: *check,
                        detail: output
                            .detail
                            .unwrap_or_else(|| format!("check {} failed", check.name())),
                    }),
                };
            }
        }

        PreflightRun {
            all_passed: true,
            results,
            failure: None,
        }
    }
}
