use crate::render;
use crate::workspace::{block_on, Workspace};
use anyhow::Context;
use mender_core::lifecycle::LifecycleState;
use mender_core::types::Incident;
use mender_ledger::lock::WorkspaceLock;
use std::path::Path;

/// Parse an incident file. Tags are normalized to lowercase.
pub fn load_incident(path: &Path) -> anyhow::Result<Incident> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut incident: Incident =
        serde_yaml::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
    incident.tags = incident
        .tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if incident.id.trim().is_empty() {
        anyhow::bail!("{}: incident id is empty", path.display());
    }
    Ok(incident)
}

/// `mender intake <incident.yaml>`
pub fn execute(repo_root: &Path, file: &Path) -> anyhow::Result<()> {
    let incident = load_incident(file)?;
    let ws = Workspace::open(repo_root)?;
    let _lock = WorkspaceLock::acquire(&ws.paths, "intake")?;

    let record = block_on(ws.controller.intake(incident))??;
    println!();
    render::print_record(&record);
    match record.state {
        LifecycleState::PendingReview => {
            println!();
            println!(
                "Next: mender decide {} <approve|modify|reject> --rationale \"...\"",
                record.incident.id
            );
        }
        LifecycleState::NeedsManualTriage => {
            println!();
            println!("No automated plan; handle {} manually.", record.incident.id);
        }
        _ => {}
    }
    Ok(())
}
