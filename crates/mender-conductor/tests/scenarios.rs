use mender_conductor::collab::FeedbackOutcome;
use mender_conductor::mock::{
    MockEngine, MockExecutor, MockProbe, RecordingFeedback, StaticHistory, StaticKnowledge,
};
use mender_conductor::notify::CollectNotifier;
use mender_conductor::{
    Collaborators, ConductorConfig, ControllerError, ExecutorError, GateError, IncidentController,
    StageFailure, Submission,
};
use mender_core::audit::{AuditEntry, EntryKind};
use mender_core::lifecycle::LifecycleState;
use mender_core::record::replay;
use mender_core::types::*;
use mender_ledger::{AuditSink, JsonlSink, MemorySink};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Fixtures ──

fn tags(list: &[&str]) -> std::collections::BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn redis_incident() -> Incident {
    Incident {
        id: "INC-2991".into(),
        title: "Redis OOM on checkout cache".into(),
        severity: Severity::P1,
        environment: "production".into(),
        application: "checkout-service".into(),
        host: "prod-cache-01".into(),
        description: "OOM command not allowed when used memory > maxmemory".into(),
        logs: "ERR OOM command not allowed".into(),
        tags: tags(&["redis", "memory", "oom"]),
    }
}

fn action(id: &str, label: &str, command: &str, tier: RiskTier) -> ProposedAction {
    ProposedAction {
        id: id.into(),
        label: label.into(),
        command: command.into(),
        risk_tier: tier,
        raised_from: None,
    }
}

fn redis_report() -> DiagnosticReport {
    DiagnosticReport {
        summary: "Redis reached maxmemory with noeviction policy".into(),
        root_cause: "Unbounded session keys without TTL".into(),
        confidence: 91,
        components: vec!["redis".into(), "checkout-service".into()],
        actions: vec![
            action(
                "cmd-1",
                "Inspect memory usage",
                "redis-cli -h prod-cache-01 INFO memory",
                RiskTier::Safe,
            ),
            action(
                "cmd-2",
                "Release allocator memory",
                "redis-cli -h prod-cache-01 MEMORY PURGE",
                RiskTier::NeedsApproval,
            ),
            action(
                "cmd-3",
                "Sample session keys",
                "redis-cli -h prod-cache-01 --scan --pattern 'session:*' | head -100",
                RiskTier::Safe,
            ),
            action(
                "cmd-4",
                "Switch eviction policy",
                "redis-cli -h prod-cache-01 CONFIG SET maxmemory-policy allkeys-lru",
                RiskTier::HighRisk,
            ),
        ],
        rollback_command: "redis-cli -h prod-cache-01 CONFIG SET maxmemory-policy noeviction"
            .into(),
    }
}

fn three_step_report() -> DiagnosticReport {
    let mut report = redis_report();
    report.actions.truncate(3);
    report
}

struct Harness {
    controller: IncidentController,
    sink: Arc<MemorySink>,
    executor: Arc<MockExecutor>,
    feedback: Arc<RecordingFeedback>,
    notifier: Arc<CollectNotifier>,
}

fn harness_with(
    engine: MockEngine,
    executor: MockExecutor,
    probe: MockProbe,
    feedback: RecordingFeedback,
) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let executor = Arc::new(executor);
    let feedback = Arc::new(feedback);
    let notifier = Arc::new(CollectNotifier::new());
    let collab = Collaborators {
        knowledge: Arc::new(StaticKnowledge::new(vec![
            KnowledgeArticle {
                id: "KB-001".into(),
                title: "Redis memory exhaustion runbook".into(),
                tags: tags(&["redis", "memory", "oom"]),
            },
            KnowledgeArticle {
                id: "KB-014".into(),
                title: "Kubernetes pod eviction".into(),
                tags: tags(&["kubernetes"]),
            },
        ])),
        history: Arc::new(StaticHistory::new(vec![PastIncident {
            id: "INC-2841".into(),
            similarity: 94,
            resolution: "Raised maxmemory and set allkeys-lru".into(),
            date: "2026-02-10".into(),
        }])),
        engine: Arc::new(engine),
        executor: executor.clone(),
        probe: Arc::new(probe),
        feedback: feedback.clone(),
        sink: sink.clone(),
        notifier: notifier.clone(),
    };
    let controller = IncidentController::new(collab, &ConductorConfig::default()).unwrap();
    Harness {
        controller,
        sink,
        executor,
        feedback,
        notifier,
    }
}

fn harness(report: DiagnosticReport) -> Harness {
    harness_with(
        MockEngine::new(Ok(report)),
        MockExecutor::new(),
        MockProbe::new(),
        RecordingFeedback::new(),
    )
}

fn approve_all() -> Submission {
    Submission::new(DecisionKind::Approve, "alice", "matches KB-001").acknowledge("cmd-4")
}

fn kinds(entries: &[AuditEntry]) -> Vec<&'static str> {
    entries.iter().map(|e| e.kind.name()).collect()
}

fn statuses(record: &ExecutionRecord) -> Vec<ActionStatus> {
    record.actions.iter().map(|a| a.status).collect()
}

// ── Scenarios ──

#[tokio::test]
async fn redis_p1_approved_and_resolved() {
    let h = harness(redis_report());

    let record = h.controller.intake(redis_incident()).await.unwrap();
    assert_eq!(record.state, LifecycleState::PendingReview);
    let context = record.context.as_ref().unwrap();
    assert_eq!(context.knowledge.len(), 1);
    assert_eq!(context.knowledge[0].id, "KB-001");
    assert_eq!(context.similar[0].id, "INC-2841");
    assert_eq!(context.similar[0].similarity, 94);
    let report = record.report.as_ref().unwrap();
    assert_eq!(report.confidence, 91);
    assert_eq!(report.high_risk_ids(), vec!["cmd-4".to_string()]);

    let decision = h.controller.submit("INC-2991", approve_all()).await.unwrap();
    assert_eq!(decision.kind, DecisionKind::Approve);
    assert_eq!(decision.final_actions.len(), 4);
    assert_eq!(decision.acknowledged, vec!["cmd-4".to_string()]);

    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Succeeded));
    assert_eq!(execution.count(ActionStatus::Done), 4);
    assert_eq!(execution.preflight.len(), 3);
    assert!(execution.dry_run.is_some());
    assert_eq!(h.executor.runs(), vec!["cmd-1", "cmd-2", "cmd-3", "cmd-4"]);

    let snapshot = h.controller.snapshot("INC-2991").unwrap();
    assert_eq!(snapshot.state, LifecycleState::Resolved);
    assert_eq!(snapshot.feedback.as_ref().map(|f| f.ok), Some(true));
    let learned = h.feedback.received();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].root_cause, "Unbounded session keys without TTL");
    assert_eq!(learned[0].commands.len(), 4);

    let entries = h.sink.entries("INC-2991").await.unwrap();
    let kinds = kinds(&entries);
    assert_eq!(kinds.first(), Some(&"incident_opened"));
    assert_eq!(kinds.iter().filter(|k| **k == "action_started").count(), 4);
    assert_eq!(kinds.iter().filter(|k| **k == "action_finished").count(), 4);
    assert!(!kinds.contains(&"policy_violation"));
    assert_eq!(kinds.last(), Some(&"feedback_recorded"));
    assert!(h
        .notifier
        .messages()
        .iter()
        .any(|m| m.contains("resolved (4 action(s) done)")));
}

#[tokio::test]
async fn rejected_incident_never_executes() {
    let h = harness(redis_report());
    let mut incident = redis_incident();
    incident.id = "INC-2992".into();
    incident.severity = Severity::P2;
    h.controller.intake(incident).await.unwrap();

    let decision = h
        .controller
        .submit(
            "INC-2992",
            Submission::new(DecisionKind::Reject, "bob", "insufficient evidence"),
        )
        .await
        .unwrap();
    assert!(decision.final_actions.is_empty());
    assert_eq!(decision.rationale, "insufficient evidence");

    let record = h.controller.snapshot("INC-2992").unwrap();
    assert_eq!(record.state, LifecycleState::Rejected);
    assert!(record.execution.is_none());

    assert_eq!(record.feedback.as_ref().map(|f| f.ok), Some(true));

    // The rejected diagnosis goes back to the knowledge base as such.
    let learned = h.feedback.received();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].outcome, FeedbackOutcome::Rejected);
    assert_eq!(learned[0].rationale.as_deref(), Some("insufficient evidence"));
    assert_eq!(learned[0].root_cause, "Unbounded session keys without TTL");
    assert_eq!(learned[0].recorded_at, decision.decided_at);

    let entries = h.sink.entries("INC-2992").await.unwrap();
    let kinds = kinds(&entries);
    assert_eq!(kinds.iter().filter(|k| **k == "decision_recorded").count(), 1);
    assert!(!kinds.contains(&"action_started"));
    assert!(!kinds.contains(&"execution_started"));
    assert_eq!(kinds.last(), Some(&"feedback_recorded"));

    let err = h
        .controller
        .execute("INC-2992", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::IncidentClosed {
            state: LifecycleState::Rejected,
            ..
        }
    ));
    assert!(h.executor.runs().is_empty());
}

#[tokio::test]
async fn mid_sequence_failure_stops_and_offers_rollback() {
    let h = harness(three_step_report());
    h.executor.exit("cmd-2", 1, "purging\nERR MEMORY PURGE not supported\n");
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller
        .submit(
            "INC-2991",
            Submission::new(DecisionKind::Approve, "alice", "try purge first"),
        )
        .await
        .unwrap();

    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Failed));
    assert_eq!(
        statuses(&execution),
        vec![ActionStatus::Done, ActionStatus::Failed, ActionStatus::Pending]
    );
    assert_eq!(
        execution.failure,
        Some(ExecutionFailure::ActionExecutionFailed {
            action_id: "cmd-2".into(),
            exit_code: Some(1),
            detail: "ERR MEMORY PURGE not supported".into(),
        })
    );
    assert_eq!(
        execution.available_rollback(),
        Some("redis-cli -h prod-cache-01 CONFIG SET maxmemory-policy noeviction")
    );
    // Rollback is offered, never run on its own.
    assert_eq!(h.executor.runs(), vec!["cmd-1", "cmd-2"]);
    assert!(execution.rollbacks.is_empty());
    assert_eq!(
        h.controller.snapshot("INC-2991").unwrap().state,
        LifecycleState::ExecFailed
    );
    assert!(h
        .notifier
        .messages()
        .iter()
        .any(|m| m.contains("rollback available (not executed)")));
}

#[tokio::test]
async fn replay_matches_live_record() {
    let h = harness(three_step_report());
    h.executor.exit("cmd-3", 2, "boom");
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller
        .submit(
            "INC-2991",
            Submission::new(DecisionKind::Approve, "alice", "ok"),
        )
        .await
        .unwrap();
    h.controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();

    let entries = h.sink.entries("INC-2991").await.unwrap();
    let replayed = replay(&entries).unwrap();
    assert_eq!(Some(replayed), h.controller.snapshot("INC-2991"));

    let execution = h.controller.snapshot("INC-2991").unwrap().execution.unwrap();
    let ids: Vec<&str> = entries[entries.len() - execution.audit_refs.len()..]
        .iter()
        .map(|e| e.entry_id.as_str())
        .collect();
    assert_eq!(ids, execution.audit_refs);
}

#[tokio::test]
async fn operations_out_of_state_are_refused() {
    let h = harness(redis_report());
    h.controller.open(redis_incident()).await.unwrap();

    let err = h
        .controller
        .submit("INC-2991", approve_all())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::InvalidTransition {
            state: LifecycleState::Intake,
            operation: "submit",
            ..
        }
    ));

    h.controller.gather_context("INC-2991").await.unwrap();
    h.controller.analyze("INC-2991").await.unwrap();
    let err = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::InvalidTransition {
            state: LifecycleState::PendingReview,
            ..
        }
    ));
    let err = h
        .controller
        .rollback("INC-2991", "alice", "why not")
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidTransition { .. }));

    assert!(matches!(
        h.controller.open(redis_incident()).await.unwrap_err(),
        ControllerError::AlreadyExists(_)
    ));
    assert!(matches!(
        h.controller.analyze("INC-404").await.unwrap_err(),
        ControllerError::NotFound(_)
    ));
}

#[tokio::test]
async fn unacknowledged_high_risk_is_refused_and_audited() {
    let h = harness(redis_report());
    h.controller.intake(redis_incident()).await.unwrap();

    let err = h
        .controller
        .submit(
            "INC-2991",
            Submission::new(DecisionKind::Approve, "alice", "ship it"),
        )
        .await
        .unwrap_err();
    match err {
        ControllerError::Policy(GateError::UnacknowledgedHighRisk { ids }) => {
            assert_eq!(ids, vec!["cmd-4".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }

    let record = h.controller.snapshot("INC-2991").unwrap();
    assert_eq!(record.state, LifecycleState::PendingReview);
    assert!(record.decision.is_none());
    assert_eq!(record.policy_violations.len(), 1);
    assert_eq!(record.policy_violations[0].actor, "alice");
    assert_eq!(record.policy_violations[0].action_ids, vec!["cmd-4".to_string()]);

    let entries = h.sink.entries("INC-2991").await.unwrap();
    assert_eq!(kinds(&entries).last(), Some(&"policy_violation"));
    assert!(h.executor.runs().is_empty());

    // Still reviewable: the acknowledged resubmission goes through.
    h.controller.submit("INC-2991", approve_all()).await.unwrap();
}

#[tokio::test]
async fn edited_command_is_reclassified() {
    let h = harness(three_step_report());
    h.controller.intake(redis_incident()).await.unwrap();

    let edit = Submission::new(DecisionKind::Modify, "alice", "flush instead")
        .edit("cmd-3", "redis-cli -h prod-cache-01 FLUSHALL");
    let err = h
        .controller
        .submit("INC-2991", edit.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Policy(GateError::UnacknowledgedHighRisk { .. })
    ));

    let decision = h
        .controller
        .submit("INC-2991", edit.acknowledge("cmd-3"))
        .await
        .unwrap();
    assert_eq!(decision.kind, DecisionKind::Modify);
    assert_eq!(decision.edits.len(), 1);
    assert_eq!(decision.edits[0].reclassified_tier, RiskTier::HighRisk);
    let edited = decision.final_actions.iter().find(|a| a.id == "cmd-3").unwrap();
    assert_eq!(edited.command, "redis-cli -h prod-cache-01 FLUSHALL");
    assert_eq!(edited.risk_tier, RiskTier::HighRisk);
}

#[tokio::test]
async fn confirmed_review_dry_run_is_not_repeated() {
    let h = harness(redis_report());
    h.controller.intake(redis_incident()).await.unwrap();

    let dry_run = h.controller.simulate("INC-2991").await.unwrap();
    assert_eq!(dry_run.simulations.len(), 4);
    assert_eq!(h.executor.dry_runs(), 4);

    let decision = h
        .controller
        .submit("INC-2991", approve_all().confirm_dry_run())
        .await
        .unwrap();
    assert_eq!(decision.confirmed_dry_run, Some(dry_run.action_set_digest.clone()));

    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Succeeded));
    assert!(execution.dry_run.is_none());
    assert_eq!(h.executor.dry_runs(), 4);
}

#[tokio::test]
async fn preflight_failure_blocks_every_action() {
    let h = harness_with(
        MockEngine::new(Ok(redis_report())),
        MockExecutor::new(),
        MockProbe::new().fail(PreflightCheck::TargetReachability, "prod-cache-01 unreachable"),
        RecordingFeedback::new(),
    );
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();

    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Failed));
    assert_eq!(
        execution.failure,
        Some(ExecutionFailure::PreflightFailed {
            check: PreflightCheck::TargetReachability,
            detail: "prod-cache-01 unreachable".into(),
        })
    );
    assert_eq!(execution.count(ActionStatus::Pending), 4);
    let checks: Vec<CheckStatus> = execution.preflight.iter().map(|c| c.status).collect();
    assert_eq!(
        checks,
        vec![CheckStatus::Passed, CheckStatus::Failed, CheckStatus::Waiting]
    );
    assert!(h.executor.runs().is_empty());
}

#[tokio::test]
async fn operator_halt_stops_before_next_action() {
    let h = harness(redis_report());
    let cancel = CancellationToken::new();
    h.executor.cancel_after("cmd-1", cancel.clone());
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();

    let execution = h.controller.execute("INC-2991", cancel).await.unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Failed));
    assert_eq!(
        execution.failure,
        Some(ExecutionFailure::Halted {
            next_action_id: "cmd-2".into()
        })
    );
    assert_eq!(h.executor.runs(), vec!["cmd-1"]);
    assert_eq!(execution.count(ActionStatus::Done), 1);
    assert_eq!(execution.count(ActionStatus::Pending), 3);
}

#[tokio::test]
async fn rollback_is_explicit_and_repeatable_after_failure() {
    let h = harness(three_step_report());
    h.executor.exit("cmd-2", 1, "ERR");
    h.executor.exit("rollback", 1, "ERR still busy");
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller
        .submit(
            "INC-2991",
            Submission::new(DecisionKind::Approve, "alice", "go"),
        )
        .await
        .unwrap();
    h.controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();

    let first = h
        .controller
        .rollback("INC-2991", "carol", "restore eviction policy")
        .await
        .unwrap();
    assert_eq!(first.rollbacks.len(), 1);
    assert_eq!(first.rollbacks[0].succeeded, Some(false));
    assert_eq!(first.outcome, Some(ExecutionOutcome::Failed));
    assert_eq!(
        h.controller.snapshot("INC-2991").unwrap().state,
        LifecycleState::ExecFailed
    );

    let second = h
        .controller
        .rollback("INC-2991", "carol", "retry after drain")
        .await
        .unwrap();
    assert_eq!(second.rollbacks.len(), 2);
    assert_eq!(second.rollbacks[1].succeeded, Some(true));
    assert_eq!(second.outcome, Some(ExecutionOutcome::RolledBack));
    assert_eq!(
        h.controller.snapshot("INC-2991").unwrap().state,
        LifecycleState::RolledBack
    );
    assert_eq!(h.executor.runs(), vec!["cmd-1", "cmd-2", "rollback", "rollback"]);

    let err = h
        .controller
        .rollback("INC-2991", "carol", "again")
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::IncidentClosed { .. }));
}

#[tokio::test]
async fn diagnostic_outage_routes_to_manual_triage() {
    let h = harness_with(
        MockEngine::new(Err(StageFailure::DiagnosticUnavailable("503 from engine".into()))),
        MockExecutor::new(),
        MockProbe::new(),
        RecordingFeedback::new(),
    );
    let record = h.controller.intake(redis_incident()).await.unwrap();
    assert_eq!(record.state, LifecycleState::NeedsManualTriage);
    assert!(record.report.is_none());
    assert!(record.triage_reason.as_deref().unwrap_or("").contains("503 from engine"));

    let err = h
        .controller
        .submit("INC-2991", approve_all())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::IncidentClosed { .. }));
}

#[tokio::test]
async fn audit_outage_mid_execution_stops_the_sequence() {
    let h = harness(redis_report());
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();

    // execution_started, preflight_completed, dry_run_recorded, action_started
    h.sink.fail_after(4);
    let err = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Sink(_)));
    assert_eq!(h.executor.runs(), vec!["cmd-1"]);

    let record = h.controller.snapshot("INC-2991").unwrap();
    assert_eq!(record.state, LifecycleState::Executing);
    let execution = record.execution.unwrap();
    assert_eq!(execution.actions[0].status, ActionStatus::Running);
    assert_eq!(execution.count(ActionStatus::Pending), 3);

    // What is durable still replays.
    let replayed = replay(&h.sink.entries("INC-2991").await.unwrap()).unwrap();
    assert_eq!(replayed.state, LifecycleState::Executing);

    // Once the log is back the interrupted run is settled, never resumed.
    h.sink.restore_service();
    let settled = h.controller.recover("INC-2991").await.unwrap();
    assert_eq!(settled.outcome, Some(ExecutionOutcome::Failed));
    assert_eq!(
        settled.failure,
        Some(ExecutionFailure::ActionExecutionFailed {
            action_id: "cmd-1".into(),
            exit_code: None,
            detail: "interrupted".into(),
        })
    );
    assert_eq!(settled.actions[0].status, ActionStatus::Failed);
    assert_eq!(settled.count(ActionStatus::Pending), 3);
    assert_eq!(h.executor.runs(), vec!["cmd-1"]);
    assert_eq!(
        h.controller.snapshot("INC-2991").unwrap().state,
        LifecycleState::ExecFailed
    );
    assert!(h
        .notifier
        .attention("INC-2991")
        .iter()
        .any(|n| n.message.starts_with("rollback available (not executed)")));

    let rolled = h
        .controller
        .rollback("INC-2991", "carol", "undo the partial run")
        .await
        .unwrap();
    assert_eq!(rolled.outcome, Some(ExecutionOutcome::RolledBack));
    let replayed = replay(&h.sink.entries("INC-2991").await.unwrap()).unwrap();
    assert_eq!(Some(replayed), h.controller.snapshot("INC-2991"));
}

#[tokio::test]
async fn rollback_settles_an_interrupted_execution_first() {
    let h = harness(redis_report());
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();
    h.sink.fail_after(4);
    h.controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap_err();
    h.sink.restore_service();

    // A later process only has the log to go on.
    let restored = h.controller.restore("INC-2991").await.unwrap();
    assert_eq!(restored.state, LifecycleState::Executing);
    let execution = h
        .controller
        .rollback("INC-2991", "carol", "operator restart")
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::RolledBack));
    assert_eq!(execution.actions[0].status, ActionStatus::Failed);
    assert_eq!(h.executor.runs(), vec!["cmd-1", "rollback"]);

    let entries = h.sink.entries("INC-2991").await.unwrap();
    let kinds = kinds(&entries);
    let settled = kinds.iter().position(|k| *k == "execution_finished").unwrap();
    let started = kinds.iter().position(|k| *k == "rollback_started").unwrap();
    assert!(settled < started);

    let err = h.controller.recover("INC-2991").await.unwrap_err();
    assert!(matches!(err, ControllerError::IncidentClosed { .. }));
}

#[tokio::test]
async fn executor_outage_fails_the_running_action() {
    let h = harness(three_step_report());
    h.executor.push(
        "cmd-2",
        Err(ExecutorError::Unavailable("ssh: connection refused".into())),
    );
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller
        .submit("INC-2991", Submission::new(DecisionKind::Approve, "alice", "go"))
        .await
        .unwrap();

    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Failed));
    assert_eq!(
        execution.failure,
        Some(ExecutionFailure::ExecutorUnavailable {
            detail: "ssh: connection refused".into()
        })
    );
    assert_eq!(
        statuses(&execution),
        vec![ActionStatus::Done, ActionStatus::Failed, ActionStatus::Pending]
    );
    assert_eq!(h.executor.runs(), vec!["cmd-1", "cmd-2"]);
    assert!(execution.available_rollback().is_some());
}

#[tokio::test]
async fn action_timeout_is_an_execution_failure() {
    let h = harness(three_step_report());
    h.executor
        .push("cmd-2", Err(ExecutorError::Timeout(Duration::from_secs(60))));
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller
        .submit("INC-2991", Submission::new(DecisionKind::Approve, "alice", "go"))
        .await
        .unwrap();

    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        execution.failure,
        Some(ExecutionFailure::ActionExecutionFailed {
            action_id: "cmd-2".into(),
            exit_code: None,
            detail: "timed out after 60s".into(),
        })
    );
    let timed_out = execution.action("cmd-2").unwrap();
    assert_eq!(timed_out.status, ActionStatus::Failed);
    assert_eq!(timed_out.exit_code, None);
    assert_eq!(execution.action("cmd-3").unwrap().status, ActionStatus::Pending);
    assert_eq!(h.executor.runs(), vec!["cmd-1", "cmd-2"]);
}

#[tokio::test]
async fn failed_simulation_is_audited_and_execution_proceeds() {
    let h = harness_with(
        MockEngine::new(Ok(redis_report())),
        MockExecutor::new().with_dry_run_error(ExecutorError::Unavailable("sandbox offline".into())),
        MockProbe::new(),
        RecordingFeedback::new(),
    );
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();

    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Succeeded));
    assert!(execution.dry_run.is_none());
    assert!(execution
        .dry_run_failure
        .as_deref()
        .unwrap_or("")
        .contains("sandbox offline"));

    let entries = h.sink.entries("INC-2991").await.unwrap();
    let kinds = kinds(&entries);
    let failed = kinds.iter().position(|k| *k == "dry_run_failed").unwrap();
    let first_action = kinds.iter().position(|k| *k == "action_started").unwrap();
    assert!(failed < first_action);
    assert_eq!(Some(replay(&entries).unwrap()), h.controller.snapshot("INC-2991"));
}

#[tokio::test]
async fn restore_waits_for_the_transition_in_flight() {
    let h = harness_with(
        MockEngine::new(Ok(redis_report())),
        MockExecutor::new().with_delay(Duration::from_millis(20)),
        MockProbe::new(),
        RecordingFeedback::new(),
    );
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();

    let (executed, restored) = tokio::join!(
        h.controller.execute("INC-2991", CancellationToken::new()),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.controller.restore("INC-2991").await
        },
    );
    assert_eq!(executed.unwrap().outcome, Some(ExecutionOutcome::Succeeded));
    let restored = restored.unwrap();
    assert_eq!(restored.state, LifecycleState::Resolved);
    assert_eq!(Some(restored), h.controller.snapshot("INC-2991"));

    // Still one record behind the id: later operations see the final state.
    let err = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::IncidentClosed { .. }));
    assert_eq!(h.executor.runs().len(), 4);
}

#[tokio::test]
async fn attention_notices_follow_the_lifecycle() {
    let h = harness(three_step_report());
    h.executor.exit("cmd-2", 1, "ERR");
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller
        .submit("INC-2991", Submission::new(DecisionKind::Approve, "alice", "go"))
        .await
        .unwrap();
    h.controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();

    let attention = h.notifier.attention("INC-2991");
    let messages: Vec<&str> = attention.iter().map(|n| n.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "awaiting review (3 action(s), confidence 91)",
            "approve by alice; ready to execute",
            "rollback available (not executed): redis-cli -h prod-cache-01 CONFIG SET maxmemory-policy noeviction",
        ]
    );
    assert!(attention.iter().all(|n| n.severity == Severity::P1));

    let triage = harness_with(
        MockEngine::new(Err(StageFailure::DiagnosticUnavailable("503 from engine".into()))),
        MockExecutor::new(),
        MockProbe::new(),
        RecordingFeedback::new(),
    );
    triage.controller.intake(redis_incident()).await.unwrap();
    let attention = triage.notifier.attention("INC-2991");
    assert_eq!(attention.len(), 1);
    assert!(attention[0].message.starts_with("needs manual triage"));
}

#[tokio::test]
async fn feedback_failure_is_recorded_not_fatal() {
    let h = harness_with(
        MockEngine::new(Ok(redis_report())),
        MockExecutor::new(),
        MockProbe::new(),
        RecordingFeedback::failing("knowledge base read-only"),
    );
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();
    let execution = h
        .controller
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Succeeded));

    let record = h.controller.snapshot("INC-2991").unwrap();
    assert_eq!(record.state, LifecycleState::Resolved);
    let note = record.feedback.unwrap();
    assert!(!note.ok);
    assert!(note.detail.unwrap().contains("read-only"));
}

#[tokio::test]
async fn concurrent_submissions_serialize_per_incident() {
    let h = harness(redis_report());
    h.controller.intake(redis_incident()).await.unwrap();

    let (a, b) = tokio::join!(
        h.controller.submit("INC-2991", approve_all()),
        h.controller.submit(
            "INC-2991",
            Submission::new(DecisionKind::Reject, "bob", "not convinced")
        ),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(matches!(
        loser,
        ControllerError::InvalidTransition { .. } | ControllerError::IncidentClosed { .. }
    ));

    let entries = h.sink.entries("INC-2991").await.unwrap();
    assert_eq!(
        kinds(&entries)
            .iter()
            .filter(|k| **k == "decision_recorded")
            .count(),
        1
    );
}

#[tokio::test]
async fn incidents_progress_independently() {
    let h = harness_with(
        MockEngine::new(Ok(redis_report())),
        MockExecutor::new().with_delay(Duration::from_millis(5)),
        MockProbe::new(),
        RecordingFeedback::new(),
    );
    let mut other = redis_incident();
    other.id = "INC-3000".into();
    h.controller.intake(redis_incident()).await.unwrap();
    h.controller.intake(other).await.unwrap();
    h.controller.submit("INC-2991", approve_all()).await.unwrap();
    h.controller
        .submit(
            "INC-3000",
            Submission::new(DecisionKind::Reject, "bob", "duplicate"),
        )
        .await
        .unwrap();

    let (executed, snapshot) = tokio::join!(
        h.controller.execute("INC-2991", CancellationToken::new()),
        async { h.controller.snapshot("INC-3000") },
    );
    assert_eq!(executed.unwrap().outcome, Some(ExecutionOutcome::Succeeded));
    assert_eq!(snapshot.unwrap().state, LifecycleState::Rejected);

    let states: Vec<(String, LifecycleState)> = h
        .controller
        .list()
        .into_iter()
        .map(|r| (r.incident.id, r.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("INC-2991".to_string(), LifecycleState::Resolved),
            ("INC-3000".to_string(), LifecycleState::Rejected),
        ]
    );
}

#[tokio::test]
async fn jsonl_log_restores_into_a_fresh_controller() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("ledger").join("audit.jsonl");

    let build = |sink: Arc<JsonlSink>| {
        let collab = Collaborators {
            knowledge: Arc::new(StaticKnowledge::new(vec![])),
            history: Arc::new(StaticHistory::new(vec![])),
            engine: Arc::new(MockEngine::new(Ok(three_step_report()))),
            executor: Arc::new(MockExecutor::new()),
            probe: Arc::new(MockProbe::new()),
            feedback: Arc::new(RecordingFeedback::new()),
            sink,
            notifier: Arc::new(CollectNotifier::new()),
        };
        IncidentController::new(collab, &ConductorConfig::default()).unwrap()
    };

    let first = build(Arc::new(JsonlSink::new(&path, false)));
    first.intake(redis_incident()).await.unwrap();
    first
        .submit(
            "INC-2991",
            Submission::new(DecisionKind::Approve, "alice", "ok"),
        )
        .await
        .unwrap();
    let live = first.snapshot("INC-2991").unwrap();
    assert_eq!(live.state, LifecycleState::ApprovedPendingExec);

    // A later process picks up where the first left off.
    let second = build(Arc::new(JsonlSink::new(&path, false)));
    let restored = second.restore_all().await.unwrap();
    assert_eq!(restored, vec![live]);
    let execution = second
        .execute("INC-2991", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.outcome, Some(ExecutionOutcome::Succeeded));
}
