use mender_conductor::catalog::{FileDiagnosis, FileFeedback, FileHistory, FileKnowledge};
use mender_conductor::notify::StdoutNotifier;
use mender_conductor::shell::{ShellExecutor, ShellProbe};
use mender_conductor::{Collaborators, ConductorConfig, IncidentController};
use mender_core::risk::RiskClassifier;
use mender_ledger::{JsonlSink, MenderPaths};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// Resolve the workspace containing `start`, or fail with an init hint.
pub fn paths(start: &Path) -> anyhow::Result<MenderPaths> {
    match MenderPaths::find_root(start) {
        Some(root) => Ok(MenderPaths::discover(root)),
        None => anyhow::bail!("No .mender/ workspace found. Run `mender init` first."),
    }
}

/// A controller wired to the workspace's audit log, catalog and local shell.
pub struct Workspace {
    pub paths: MenderPaths,
    pub config: ConductorConfig,
    pub controller: IncidentController,
}

impl Workspace {
    pub fn open(start: &Path) -> anyhow::Result<Self> {
        let paths = paths(start)?;
        let config = ConductorConfig::load(&paths.config_json)?;
        let classifier = RiskClassifier::new(&config.risk_policy())?;

        let collab = Collaborators {
            knowledge: Arc::new(FileKnowledge::new(paths.knowledge_yaml.clone())),
            history: Arc::new(FileHistory::new(
                paths.history_yaml.clone(),
                paths.resolutions_jsonl.clone(),
            )),
            engine: Arc::new(FileDiagnosis::new(paths.diagnoses_dir.clone())),
            executor: Arc::new(ShellExecutor::new(classifier).with_cwd(paths.root.clone())),
            probe: Arc::new(ShellProbe::new(
                config.reachability_cmd.clone(),
                config.lookup_timeout(),
            )),
            feedback: Arc::new(FileFeedback::new(paths.resolutions_jsonl.clone())),
            sink: Arc::new(JsonlSink::new(paths.audit_jsonl.clone(), true)),
            notifier: Arc::new(StdoutNotifier::default()),
        };
        let controller = IncidentController::new(collab, &config)?;
        tracing::debug!(root = %paths.root.display(), "workspace opened");
        Ok(Self {
            paths,
            config,
            controller,
        })
    }

    /// `--actor`, else the configured default.
    pub fn actor(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .unwrap_or_else(|| self.config.actor.clone())
    }
}

pub fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new()?;
    Ok(rt.block_on(fut))
}
