//! Incident lifecycle controller: the only writer of incident state.

use crate::collab::{
    CommandExecutor, DiagnosticEngine, FeedbackOutcome, HistorySearch, KnowledgeFeedback,
    KnowledgeSearch, PreflightProbe,
};
use crate::config::ConductorConfig;
use crate::context::ContextAggregator;
use crate::diagnosis::DiagnosticAdapter;
use crate::error::{ControllerError, GateError};
use crate::gate::{DecisionGate, Submission};
use crate::journal::{publish, Journal, Snapshots};
use crate::notify::{Notifier, Urgency};
use crate::orchestrator::{self, Orchestrator};
use crate::preflight::PreflightEngine;
use mender_core::audit::{AuditEntry, EntryKind};
use mender_core::lifecycle::{Effect, LifecycleState};
use mender_core::record::{replay, IncidentRecord};
use mender_core::risk::RiskClassifier;
use mender_core::types::*;
use mender_ledger::AuditSink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Everything the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub knowledge: Arc<dyn KnowledgeSearch>,
    pub history: Arc<dyn HistorySearch>,
    pub engine: Arc<dyn DiagnosticEngine>,
    pub executor: Arc<dyn CommandExecutor>,
    pub probe: Arc<dyn PreflightProbe>,
    pub feedback: Arc<dyn KnowledgeFeedback>,
    pub sink: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
}

type Slot = Arc<tokio::sync::Mutex<IncidentRecord>>;

pub struct IncidentController {
    sink: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    aggregator: ContextAggregator,
    adapter: DiagnosticAdapter,
    gate: DecisionGate,
    orchestrator: Orchestrator,
    /// One lock per incident: a single transition in flight per id.
    slots: Mutex<HashMap<String, Slot>>,
    snapshots: Snapshots,
}

impl IncidentController {
    pub fn new(collab: Collaborators, config: &ConductorConfig) -> Result<Self, ControllerError> {
        let classifier = RiskClassifier::new(&config.risk_policy())?;
        Ok(Self {
            aggregator: ContextAggregator::new(
                collab.knowledge,
                collab.history,
                config.lookup_timeout(),
            ),
            adapter: DiagnosticAdapter::new(
                collab.engine,
                classifier.clone(),
                config.diagnostic_timeout(),
            ),
            gate: DecisionGate::new(classifier),
            orchestrator: Orchestrator::new(
                collab.executor,
                PreflightEngine::new(collab.probe),
                collab.feedback,
                config.action_timeout(),
                config.rollback_timeout(),
            ),
            sink: collab.sink,
            notifier: collab.notifier,
            slots: Mutex::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        })
    }

    // ── Slots ──

    fn cached_slot(&self, id: &str) -> Option<Slot> {
        self.slots.lock().ok().and_then(|s| s.get(id).cloned())
    }

    fn install(&self, record: IncidentRecord) -> Slot {
        publish(&self.snapshots, &record);
        let id = record.incident.id.clone();
        let fresh: Slot = Arc::new(tokio::sync::Mutex::new(record));
        match self.slots.lock() {
            Ok(mut slots) => slots.entry(id).or_insert(fresh).clone(),
            Err(_) => fresh,
        }
    }

    /// The incident's slot, rebuilt from the audit log when not yet loaded.
    async fn slot(&self, id: &str) -> Result<Slot, ControllerError> {
        if let Some(slot) = self.cached_slot(id) {
            return Ok(slot);
        }
        let record = self.load(id).await?;
        Ok(self.install(record))
    }

    async fn load(&self, id: &str) -> Result<IncidentRecord, ControllerError> {
        let entries = self.sink.entries(id).await?;
        if entries.is_empty() {
            return Err(ControllerError::NotFound(id.to_string()));
        }
        Ok(replay(&entries)?)
    }

    // ── Operations ──

    /// Record a new incident in `INTAKE`.
    pub async fn open(&self, incident: Incident) -> Result<IncidentRecord, ControllerError> {
        if self.cached_slot(&incident.id).is_some()
            || !self.sink.entries(&incident.id).await?.is_empty()
        {
            return Err(ControllerError::AlreadyExists(incident.id));
        }
        let id = incident.id.clone();
        let entry = AuditEntry::new(&id, 0, None, EntryKind::IncidentOpened { incident });
        self.sink.append(&entry).await?;
        let record = IncidentRecord::open(&entry)?;
        tracing::info!(incident = %id, "incident opened");
        self.install(record.clone());
        self.notifier
            .send(&record.incident, Urgency::Info, "opened".into())
            .await;
        Ok(record)
    }

    /// Attach the context bundle. Lookups degrade, they do not fail.
    pub async fn gather_context(&self, id: &str) -> Result<IncidentRecord, ControllerError> {
        self.gather(id).await.map(|(record, _)| record)
    }

    async fn gather(&self, id: &str) -> Result<(IncidentRecord, Effect), ControllerError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        if record.state != LifecycleState::Intake {
            return Err(ControllerError::refused(id, record.state, "gather_context"));
        }
        let bundle = self.aggregator.gather(&record.incident).await;
        for w in &bundle.warnings {
            self.notifier
                .send(
                    &record.incident,
                    Urgency::Info,
                    format!("context degraded ({:?}): {}", w.source, w.detail),
                )
                .await;
        }
        let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
        let effect = journal.commit(EntryKind::ContextGathered { bundle }).await?;
        self.aggregator.evict(id);
        Ok((record.clone(), effect))
    }

    /// Run the diagnosis and open review, or escalate to manual triage.
    pub async fn analyze(&self, id: &str) -> Result<IncidentRecord, ControllerError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        if record.state != LifecycleState::ContextGathered {
            return Err(ControllerError::refused(id, record.state, "analyze"));
        }
        let context = record.context.clone().unwrap_or_default();
        let result = self.adapter.analyze(&record.incident, &context).await;
        let incident = record.incident.clone();
        let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
        let (mut effect, message) = match result {
            Ok(report) => {
                let message = format!(
                    "awaiting review ({} action(s), confidence {})",
                    report.actions.len(),
                    report.confidence
                );
                let effect = journal.commit(EntryKind::AnalysisCompleted { report }).await?;
                (effect, message)
            }
            Err(failure) => {
                tracing::warn!(incident = %id, %failure, "analysis failed; manual triage");
                let effect = journal
                    .commit(EntryKind::AnalysisFailed {
                        reason: failure.to_string(),
                    })
                    .await?;
                (effect, format!("needs manual triage: {failure}"))
            }
        };
        if effect == Effect::OpenReview {
            effect = journal.commit(EntryKind::ReviewOpened).await?;
        }
        if matches!(effect, Effect::AwaitDecision | Effect::Escalate) {
            self.notifier
                .send(&incident, Urgency::Attention, message)
                .await;
        }
        Ok(record.clone())
    }

    /// Open, gather context and analyze in one go.
    pub async fn intake(&self, incident: Incident) -> Result<IncidentRecord, ControllerError> {
        let id = incident.id.clone();
        self.open(incident).await?;
        match self.gather(&id).await? {
            (_, Effect::Analyze) => self.analyze(&id).await,
            (record, _) => Ok(record),
        }
    }

    /// Review-time dry run of the current plan.
    pub async fn simulate(&self, id: &str) -> Result<DryRun, ControllerError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        if record.state != LifecycleState::PendingReview {
            return Err(ControllerError::refused(id, record.state, "simulate"));
        }
        let actions = record
            .report
            .as_ref()
            .map(|r| r.actions.clone())
            .unwrap_or_default();
        let dry_run = self
            .orchestrator
            .simulate(&record.incident, &actions)
            .await?;
        let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
        journal
            .commit(EntryKind::DryRunRecorded {
                dry_run: dry_run.clone(),
            })
            .await?;
        Ok(dry_run)
    }

    /// Submit a review decision. The decision is durably audited before it
    /// is returned. A refusal is audited too and leaves the state unchanged.
    pub async fn submit(&self, id: &str, submission: Submission) -> Result<Decision, ControllerError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        if record.state != LifecycleState::PendingReview {
            return Err(ControllerError::refused(id, record.state, "submit"));
        }
        let Some(report) = record.report.clone() else {
            return Err(ControllerError::refused(id, record.state, "submit"));
        };
        let outcome = self.gate.submit(
            &record.incident,
            &report,
            record.review_dry_run.as_ref(),
            submission.clone(),
        );
        let incident = record.incident.clone();
        let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
        match outcome {
            Ok(decision) => {
                let effect = journal
                    .commit(EntryKind::DecisionRecorded {
                        decision: decision.clone(),
                    })
                    .await?;
                tracing::info!(incident = %id, kind = %decision.kind, actor = %decision.actor, "decision recorded");
                let message = format!("{} by {}", decision.kind, decision.actor);
                match effect {
                    Effect::Execute => {
                        self.notifier
                            .send(&incident, Urgency::Attention, format!("{message}; ready to execute"))
                            .await;
                    }
                    Effect::Archive => {
                        self.notifier.send(&incident, Urgency::Info, message).await;
                        // A rejected diagnosis is knowledge too.
                        let mut feedback = orchestrator::resolution(
                            &journal,
                            &incident,
                            FeedbackOutcome::Rejected,
                            &report.actions,
                            Some(decision.rationale.clone()),
                        );
                        feedback.recorded_at = decision.decided_at.clone();
                        orchestrator::record_feedback(
                            self.orchestrator.feedback.as_ref(),
                            &mut journal,
                            &feedback,
                        )
                        .await?;
                    }
                    _ => {}
                }
                Ok(decision)
            }
            Err(refusal) => {
                let action_ids = match &refusal {
                    GateError::UnacknowledgedHighRisk { ids } => ids.clone(),
                    GateError::InvalidSubmission(_) => submission.action_ids(),
                };
                journal
                    .commit(EntryKind::PolicyViolation {
                        violation: PolicyViolation {
                            actor: submission.actor.clone(),
                            kind: submission.kind,
                            action_ids,
                            reason: refusal.to_string(),
                        },
                    })
                    .await?;
                Err(refusal.into())
            }
        }
    }

    /// Execute the approved action set. A failed execution is `Ok` with
    /// outcome `Failed`; the incident is then `EXEC_FAILED`.
    pub async fn execute(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionRecord, ControllerError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        if record.state != LifecycleState::ApprovedPendingExec {
            return Err(ControllerError::refused(id, record.state, "execute"));
        }
        let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
        self.orchestrator
            .execute(&mut journal, self.notifier.as_ref(), &cancel)
            .await?;
        record
            .execution
            .clone()
            .ok_or_else(|| ControllerError::refused(id, record.state, "execute"))
    }

    /// Settle an execution left in `EXECUTING` by a crash or an audit outage.
    /// The action that was in flight is recorded as failed and the incident
    /// moves to `EXEC_FAILED`, where rollback is offered. Nothing is re-run.
    pub async fn recover(&self, id: &str) -> Result<ExecutionRecord, ControllerError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        // Holding the slot means no execution of this incident is in flight here.
        if record.state != LifecycleState::Executing {
            return Err(ControllerError::refused(id, record.state, "recover"));
        }
        let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
        self.orchestrator
            .settle_interrupted(&mut journal, self.notifier.as_ref())
            .await?;
        record
            .execution
            .clone()
            .ok_or_else(|| ControllerError::refused(id, record.state, "recover"))
    }

    /// Explicit rollback of a failed execution. A failed rollback keeps the
    /// incident in `EXEC_FAILED`, so it can be requested again. An interrupted
    /// execution is settled first.
    pub async fn rollback(
        &self,
        id: &str,
        actor: &str,
        rationale: &str,
    ) -> Result<ExecutionRecord, ControllerError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        if record.state == LifecycleState::Executing {
            let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
            self.orchestrator
                .settle_interrupted(&mut journal, self.notifier.as_ref())
                .await?;
        }
        if record.state != LifecycleState::ExecFailed {
            let op = "rollback";
            return Err(if record.state.is_terminal() {
                ControllerError::IncidentClosed {
                    id: id.to_string(),
                    state: record.state,
                    operation: op,
                }
            } else {
                ControllerError::InvalidTransition {
                    id: id.to_string(),
                    state: record.state,
                    operation: op,
                }
            });
        }
        let mut journal = Journal::new(&mut record, self.sink.as_ref(), &self.snapshots);
        self.orchestrator
            .rollback(&mut journal, self.notifier.as_ref(), actor, rationale)
            .await?;
        record
            .execution
            .clone()
            .ok_or_else(|| ControllerError::refused(id, record.state, "rollback"))
    }

    // ── Readers ──

    /// Latest published snapshot. Never blocks on an in-flight transition.
    pub fn snapshot(&self, id: &str) -> Option<IncidentRecord> {
        self.snapshots.read().ok().and_then(|m| m.get(id).cloned())
    }

    /// All loaded incidents, ordered by id.
    pub fn list(&self) -> Vec<IncidentRecord> {
        let mut out: Vec<IncidentRecord> = self
            .snapshots
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.incident.id.cmp(&b.incident.id));
        out
    }

    /// Rebuild one incident from the audit log, replacing any cached copy.
    /// Waits for a transition in flight on the incident to finish first.
    pub async fn restore(&self, id: &str) -> Result<IncidentRecord, ControllerError> {
        if let Some(slot) = self.cached_slot(id) {
            let mut current = slot.lock().await;
            let record = self.load(id).await?;
            *current = record.clone();
            publish(&self.snapshots, &record);
            return Ok(record);
        }
        let record = self.load(id).await?;
        let slot = self.install(record);
        let current = slot.lock().await;
        Ok(current.clone())
    }

    /// Rebuild every incident found in the audit log.
    pub async fn restore_all(&self) -> Result<Vec<IncidentRecord>, ControllerError> {
        let mut out = Vec::new();
        for id in self.sink.incident_ids().await? {
            out.push(self.restore(&id).await?);
        }
        Ok(out)
    }
}
