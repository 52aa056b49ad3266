use crate::render;
use crate::workspace::{block_on, Workspace};
use clap::ValueEnum;
use mender_conductor::{ControllerError, Submission};
use mender_core::types::DecisionKind;
use mender_ledger::lock::WorkspaceLock;
use std::path::Path;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Verdict {
    Approve,
    Modify,
    Reject,
}

impl From<Verdict> for DecisionKind {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Approve => DecisionKind::Approve,
            Verdict::Modify => DecisionKind::Modify,
            Verdict::Reject => DecisionKind::Reject,
        }
    }
}

/// `mender show <id>`
pub fn show(repo_root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_root)?;
    let record = block_on(ws.controller.restore(id))??;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        render::print_record(&record);
    }
    Ok(())
}

/// `mender list`
pub fn list(repo_root: &Path) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_root)?;
    let mut records = block_on(ws.controller.restore_all())??;
    if records.is_empty() {
        println!("No incidents.");
        return Ok(());
    }
    records.sort_by(|a, b| a.incident.id.cmp(&b.incident.id));
    for r in &records {
        println!(
            "{:<12} {:<22} {:<3} {}",
            r.incident.id,
            r.state.as_str(),
            r.incident.severity,
            r.incident.title
        );
    }
    Ok(())
}

/// `mender simulate <id>`
pub fn simulate(repo_root: &Path, id: &str) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_root)?;
    let _lock = WorkspaceLock::acquire(&ws.paths, &format!("simulate {id}"))?;
    let dry_run = block_on(ws.controller.simulate(id))??;
    println!("Dry run of {} action(s)", dry_run.simulations.len());
    for sim in &dry_run.simulations {
        let mark = if sim.mutating { "mutating" } else { "read-only" };
        println!("  [{}] {mark}: {}", sim.action_id, sim.preview);
    }
    println!("  action set: {}", dry_run.action_set_digest);
    Ok(())
}

pub struct DecideParams<'a> {
    pub repo_root: &'a Path,
    pub id: &'a str,
    pub verdict: Verdict,
    pub rationale: &'a str,
    pub acks: &'a [String],
    pub edits: &'a [String],
    pub confirm_dry_run: bool,
    pub actor: Option<&'a str>,
}

/// Split `ID=COMMAND` at the first `=`.
fn parse_edit(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((id, cmd)) if !id.trim().is_empty() => Ok((id.trim(), cmd.trim())),
        _ => anyhow::bail!("--edit expects ID=COMMAND, got {raw:?}"),
    }
}

fn build_submission(p: &DecideParams<'_>, actor: &str) -> anyhow::Result<Submission> {
    let mut submission = Submission::new(p.verdict.into(), actor, p.rationale);
    for ack in p.acks {
        submission = submission.acknowledge(ack);
    }
    for raw in p.edits {
        let (id, cmd) = parse_edit(raw)?;
        submission = submission.edit(id, cmd);
    }
    if p.confirm_dry_run {
        submission = submission.confirm_dry_run();
    }
    Ok(submission)
}

/// `mender decide <id> <verdict>`
pub fn decide(p: DecideParams<'_>) -> anyhow::Result<()> {
    let ws = Workspace::open(p.repo_root)?;
    let actor = ws.actor(p.actor);
    let submission = build_submission(&p, &actor)?;
    let _lock = WorkspaceLock::acquire(&ws.paths, &format!("decide {} by {actor}", p.id))?;

    match block_on(ws.controller.submit(p.id, submission))? {
        Ok(decision) => {
            println!("{} {} ({})", p.id, decision.kind, decision.decision_id);
            if let Some(digest) = &decision.confirmed_dry_run {
                println!("  reusing review dry run {digest}");
            }
            if decision.kind != DecisionKind::Reject {
                println!("Next: mender execute {}", p.id);
            }
            Ok(())
        }
        Err(ControllerError::Policy(refusal)) => {
            anyhow::bail!("decision refused and audited: {refusal}")
        }
        Err(e) => Err(e.into()),
    }
}
