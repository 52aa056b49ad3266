use crate::render;
use crate::workspace::{block_on, Workspace};
use mender_core::types::ExecutionOutcome;
use mender_ledger::lock::WorkspaceLock;
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn ctrlc_cancel(cancel: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
    });
}

/// `mender execute <id>`
pub fn execute(repo_root: &Path, id: &str) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_root)?;
    let _lock = WorkspaceLock::acquire(&ws.paths, &format!("execute {id}"))?;

    // Ctrl-C halts before the next action; the running one completes.
    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());

    let exec = block_on(ws.controller.execute(id, cancel))??;
    println!();
    render::print_execution(&exec);
    match exec.outcome {
        Some(ExecutionOutcome::Succeeded) => Ok(()),
        _ => anyhow::bail!(
            "execution of {id} failed; review it, then `mender rollback {id} --rationale \"...\"` if needed"
        ),
    }
}

/// `mender recover <id>`
pub fn recover(repo_root: &Path, id: &str) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_root)?;
    let _lock = WorkspaceLock::acquire(&ws.paths, &format!("recover {id}"))?;

    let exec = block_on(ws.controller.recover(id))??;
    println!();
    render::print_execution(&exec);
    println!("{id} is EXEC_FAILED; `mender rollback {id} --rationale \"...\"` if needed");
    Ok(())
}

/// `mender rollback <id>`
pub fn rollback(
    repo_root: &Path,
    id: &str,
    rationale: &str,
    actor: Option<&str>,
) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_root)?;
    let actor = ws.actor(actor);
    let _lock = WorkspaceLock::acquire(&ws.paths, &format!("rollback {id}"))?;

    let exec = block_on(ws.controller.rollback(id, &actor, rationale))??;
    println!();
    render::print_execution(&exec);
    match exec.outcome {
        Some(ExecutionOutcome::RolledBack) => Ok(()),
        _ => anyhow::bail!("rollback of {id} failed; the incident stays EXEC_FAILED"),
    }
}
