use mender_conductor::ConductorConfig;
use mender_ledger::lock::WorkspaceLock;
use mender_ledger::MenderPaths;
use std::path::Path;

const KNOWLEDGE_TEMPLATE: &str = "\
# Knowledge articles matched against incident tags.
# - id: KB-001
#   title: Redis memory exhaustion runbook
#   tags: [redis, memory, oom]
[]
";

const HISTORY_TEMPLATE: &str = "\
# Past incidents. `similarity` (0-100) is optional; tag overlap is used otherwise.
# - id: INC-2841
#   tags: [redis, memory]
#   resolution: Raised maxmemory and set allkeys-lru
#   date: 2026-02-10
[]
";

pub fn execute(repo_root: &Path) -> anyhow::Result<()> {
    let paths = MenderPaths::discover(repo_root);
    let fresh = !paths.is_initialized();

    paths.ensure_layout()?;
    let _lock = WorkspaceLock::acquire(&paths, "init")?;

    if !paths.config_json.exists() {
        ConductorConfig::default().save(&paths.config_json)?;
    }
    for (path, template) in [
        (&paths.knowledge_yaml, KNOWLEDGE_TEMPLATE),
        (&paths.history_yaml, HISTORY_TEMPLATE),
    ] {
        if !path.exists() {
            std::fs::write(path, template)?;
        }
    }

    if fresh {
        println!("Initialized {}", paths.mender_dir.display());
        println!(
            "  diagnoses: {}/<incident-id>.yaml",
            paths.diagnoses_dir.display()
        );
    } else {
        println!("Already initialized at {}", paths.mender_dir.display());
    }
    Ok(())
}
