use crate::workspace::{self, block_on};
use mender_core::audit::{verify_chain, AuditEntry, EntryKind};
use mender_core::record::replay;
use mender_ledger::{AuditSink, JsonlSink};
use std::path::Path;

fn load(repo_root: &Path, id: &str) -> anyhow::Result<Vec<AuditEntry>> {
    let paths = workspace::paths(repo_root)?;
    let sink = JsonlSink::new(paths.audit_jsonl, false);
    let entries = block_on(sink.entries(id))??;
    if entries.is_empty() {
        anyhow::bail!("no audit entries for {id}");
    }
    Ok(entries)
}

/// One-line summary of an entry's payload.
fn describe(kind: &EntryKind) -> String {
    match kind {
        EntryKind::IncidentOpened { incident } => {
            format!("{} {} on {}", incident.severity, incident.title, incident.host)
        }
        EntryKind::ContextGathered { bundle } => format!(
            "{} article(s), {} similar, {} warning(s)",
            bundle.knowledge.len(),
            bundle.similar.len(),
            bundle.warnings.len()
        ),
        EntryKind::AnalysisCompleted { report } => format!(
            "{} action(s), confidence {}",
            report.actions.len(),
            report.confidence
        ),
        EntryKind::AnalysisFailed { reason } => reason.clone(),
        EntryKind::ReviewOpened => String::new(),
        EntryKind::DryRunRecorded { dry_run } => {
            format!("{} simulation(s)", dry_run.simulations.len())
        }
        EntryKind::DryRunFailed { reason } => reason.clone(),
        EntryKind::PolicyViolation { violation } => {
            format!("{} by {}: {}", violation.kind, violation.actor, violation.reason)
        }
        EntryKind::DecisionRecorded { decision } => {
            format!("{} by {}: {}", decision.kind, decision.actor, decision.rationale)
        }
        EntryKind::ExecutionStarted { decision_id } => decision_id.clone(),
        EntryKind::PreflightCompleted { checks } => checks
            .iter()
            .map(|c| format!("{}={:?}", c.check.name(), c.status))
            .collect::<Vec<_>>()
            .join(" "),
        EntryKind::ActionStarted { action_id, index } => format!("#{index} {action_id}"),
        EntryKind::ActionFinished {
            action_id,
            status,
            exit_code,
            ..
        } => match exit_code {
            Some(code) => format!("{action_id} {status:?} (exit {code})"),
            None => format!("{action_id} {status:?}"),
        },
        EntryKind::ExecutionFinished { outcome, failure } => match failure {
            Some(f) => format!("{outcome:?}: {f}"),
            None => format!("{outcome:?}"),
        },
        EntryKind::FeedbackRecorded { ok, detail } => match detail {
            Some(d) => format!("ok={ok}: {d}"),
            None => format!("ok={ok}"),
        },
        EntryKind::RollbackStarted { actor, rationale } => format!("by {actor}: {rationale}"),
        EntryKind::RollbackFinished {
            succeeded,
            exit_code,
            ..
        } => match exit_code {
            Some(code) => format!("succeeded={succeeded} (exit {code})"),
            None => format!("succeeded={succeeded}"),
        },
    }
}

/// `mender log <id>`
pub fn execute(repo_root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    for entry in load(repo_root, id)? {
        if json {
            println!("{}", serde_json::to_string(&entry)?);
        } else {
            println!(
                "{:>3} {} {:<20} {}",
                entry.seq,
                entry.ts,
                entry.kind.name(),
                describe(&entry.kind)
            );
        }
    }
    Ok(())
}

/// `mender verify <id>`
pub fn verify(repo_root: &Path, id: &str) -> anyhow::Result<()> {
    let entries = load(repo_root, id)?;
    verify_chain(&entries)?;
    let record = replay(&entries)?;
    println!(
        "{id}: {} entries, chain intact, state {} (head {})",
        entries.len(),
        record.state,
        &record.head_hash[..record.head_hash.len().min(16)]
    );
    Ok(())
}
