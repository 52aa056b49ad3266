//! Interfaces of the external collaborators the conductor drives.

use crate::error::{ExecutorError, StageFailure};
use mender_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Knowledge-base search. Best effort: may be slow or fail.
#[async_trait::async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn find(&self, tags: &BTreeSet<String>) -> anyhow::Result<Vec<KnowledgeArticle>>;
}

/// Historical incident search. Best effort.
#[async_trait::async_trait]
pub trait HistorySearch: Send + Sync {
    async fn find(&self, incident: &Incident) -> anyhow::Result<Vec<PastIncident>>;
}

/// Produces a diagnosis and an action plan for an incident.
#[async_trait::async_trait]
pub trait DiagnosticEngine: Send + Sync {
    async fn analyze(
        &self,
        incident: &Incident,
        context: &ContextBundle,
        deadline: Duration,
    ) -> Result<DiagnosticReport, StageFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands against the target system.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Non-mutating simulation. Must never change target state.
    async fn dry_run(
        &self,
        incident: &Incident,
        action: &ProposedAction,
    ) -> Result<SimulationReport, ExecutorError>;

    async fn run(
        &self,
        incident: &Incident,
        action: &ProposedAction,
        deadline: Duration,
    ) -> Result<CommandOutput, ExecutorError>;
}

/// Result of one pre-flight check.
#[derive(Debug, Clone)]
pub struct CheckOutput {
    pub passed: bool,
    pub detail: Option<String>,
    pub duration: Duration,
}

impl CheckOutput {
    pub fn passed(duration: Duration) -> Self {
        Self {
            passed: true,
            detail: None,
            duration,
        }
    }

    pub fn passed_with_detail(detail: String, duration: Duration) -> Self {
        Self {
            passed: true,
            detail: Some(detail),
            duration,
        }
    }

    pub fn failed(detail: String, duration: Duration) -> Self {
        Self {
            passed: false,
            detail: Some(detail),
            duration,
        }
    }
}

/// Answers the pre-flight checks for an execution.
#[async_trait::async_trait]
pub trait PreflightProbe: Send + Sync {
    async fn probe(
        &self,
        check: PreflightCheck,
        incident: &Incident,
        actions: &[ProposedAction],
    ) -> CheckOutput;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// The plan ran and resolved the incident.
    #[default]
    Resolved,
    /// A reviewer turned the recommendation down.
    Rejected,
}

/// What a reviewed recommendation teaches the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFeedback {
    pub incident_id: String,
    #[serde(default)]
    pub outcome: FeedbackOutcome,
    pub title: String,
    pub tags: BTreeSet<String>,
    pub root_cause: String,
    /// Commands that ran, or that were proposed and rejected.
    pub commands: Vec<String>,
    /// Reviewer rationale, for rejections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(alias = "resolved_at")]
    pub recorded_at: String,
}

/// Receives feedback after a resolution or a rejection.
#[async_trait::async_trait]
pub trait KnowledgeFeedback: Send + Sync {
    async fn record(&self, feedback: &ResolutionFeedback) -> anyhow::Result<()>;
}
