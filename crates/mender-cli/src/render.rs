use mender_core::record::IncidentRecord;
use mender_core::types::*;

fn tier_mark(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Safe => " ",
        RiskTier::NeedsApproval => "!",
        RiskTier::HighRisk => "‼",
    }
}

fn status_mark(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Pending => "·",
        ActionStatus::Running => "▶",
        ActionStatus::Done => "✓",
        ActionStatus::Failed => "✗",
    }
}

pub fn print_plan(report: &DiagnosticReport) {
    println!("Diagnosis ({}% confidence)", report.confidence);
    println!("  summary:    {}", report.summary);
    println!("  root cause: {}", report.root_cause);
    if !report.components.is_empty() {
        println!("  components: {}", report.components.join(", "));
    }
    println!("  actions:");
    for (i, a) in report.actions.iter().enumerate() {
        let raised = a
            .raised_from
            .map(|t| format!(" (raised from {t})"))
            .unwrap_or_default();
        println!(
            "  {} {}. [{}] {} ({}){raised}",
            tier_mark(a.risk_tier),
            i + 1,
            a.id,
            a.label,
            a.risk_tier
        );
        println!("       $ {}", a.command);
    }
    println!("  rollback:   {}", report.rollback_command);
    let high = report.high_risk_ids();
    if !high.is_empty() {
        println!("  high-risk actions need --ack: {}", high.join(", "));
    }
}

pub fn print_execution(exec: &ExecutionRecord) {
    if !exec.preflight.is_empty() {
        println!("Pre-flight");
        for c in &exec.preflight {
            let detail = c.detail.as_deref().unwrap_or("");
            println!("  {:?} {} {detail}", c.status, c.check.name());
        }
    }
    if let Some(reason) = &exec.dry_run_failure {
        println!("Simulation skipped: {reason}");
    }
    println!("Actions");
    for run in &exec.actions {
        let exit = run
            .exit_code
            .map(|c| format!(" (exit {c})"))
            .unwrap_or_default();
        println!(
            "  {} [{}] {}{exit}",
            status_mark(run.status),
            run.action.id,
            run.action.label
        );
    }
    if let Some(outcome) = exec.outcome {
        println!("Outcome: {outcome:?}");
    }
    if let Some(failure) = &exec.failure {
        println!("  cause: {failure}");
    }
    for r in &exec.rollbacks {
        let result = match r.succeeded {
            Some(true) => "succeeded",
            Some(false) => "failed",
            None => "in flight",
        };
        println!("  rollback by {} ({}): {result}", r.actor, r.rationale);
    }
    if let Some(cmd) = exec.available_rollback() {
        println!("Rollback available (not executed): {cmd}");
    }
}

pub fn print_record(record: &IncidentRecord) {
    let inc = &record.incident;
    println!("{} [{}] {}", inc.id, record.state, inc.title);
    println!(
        "  {} · {} · {} on {}",
        inc.severity, inc.environment, inc.application, inc.host
    );
    if !inc.tags.is_empty() {
        let tags: Vec<&str> = inc.tags.iter().map(String::as_str).collect();
        println!("  tags: {}", tags.join(", "));
    }

    if let Some(ctx) = &record.context {
        println!("Context");
        for k in &ctx.knowledge {
            println!("  {} {} (overlap: {})", k.id, k.title, k.tag_overlap.join(", "));
        }
        for p in &ctx.similar {
            println!("  {} {}% similar, {}: {}", p.id, p.similarity, p.date, p.resolution);
        }
        for w in &ctx.warnings {
            println!("  warning ({:?}): {}", w.source, w.detail);
        }
    }
    if let Some(reason) = &record.triage_reason {
        println!("Needs manual triage: {reason}");
    }
    if let Some(report) = &record.report {
        print_plan(report);
    }
    for v in &record.policy_violations {
        println!(
            "Refused {} by {}: {} [{}]",
            v.kind,
            v.actor,
            v.reason,
            v.action_ids.join(", ")
        );
    }
    if let Some(d) = &record.decision {
        println!("Decision: {} by {} at {}", d.kind, d.actor, d.decided_at);
        println!("  rationale: {}", d.rationale);
        for e in &d.edits {
            println!(
                "  edited {}: {} -> {} ({} -> {})",
                e.action_id, e.original_command, e.edited_command, e.original_tier, e.reclassified_tier
            );
        }
        if !d.acknowledged.is_empty() {
            println!("  acknowledged: {}", d.acknowledged.join(", "));
        }
    }
    if let Some(exec) = &record.execution {
        print_execution(exec);
    }
    if let Some(fb) = &record.feedback {
        match (fb.ok, &fb.detail) {
            (true, _) => println!("Knowledge feedback recorded"),
            (false, detail) => println!(
                "Knowledge feedback failed: {}",
                detail.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
