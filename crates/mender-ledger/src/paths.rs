use std::path::{Path, PathBuf};

/// All well-known paths under `.mender/`.
#[derive(Debug, Clone)]
pub struct MenderPaths {
    pub root: PathBuf,
    pub mender_dir: PathBuf,
    pub ledger_dir: PathBuf,
    pub audit_jsonl: PathBuf,
    pub lock_file: PathBuf,
    pub config_json: PathBuf,
    pub catalog_dir: PathBuf,
    pub knowledge_yaml: PathBuf,
    pub history_yaml: PathBuf,
    pub resolutions_jsonl: PathBuf,
    pub diagnoses_dir: PathBuf,
}

impl MenderPaths {
    /// Derive all paths from a workspace root. Pure computation, no I/O.
    pub fn discover(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mender_dir = root.join(".mender");
        let ledger_dir = mender_dir.join("ledger");
        let catalog_dir = mender_dir.join("catalog");
        Self {
            audit_jsonl: ledger_dir.join("audit.jsonl"),
            lock_file: mender_dir.join("LOCK"),
            config_json: mender_dir.join("config.json"),
            knowledge_yaml: catalog_dir.join("knowledge.yaml"),
            history_yaml: catalog_dir.join("history.yaml"),
            resolutions_jsonl: catalog_dir.join("resolutions.jsonl"),
            diagnoses_dir: catalog_dir.join("diagnoses"),
            catalog_dir,
            ledger_dir,
            mender_dir,
            root,
        }
    }

    /// Create all required directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [&self.ledger_dir, &self.catalog_dir, &self.diagnoses_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.mender_dir.is_dir()
    }

    /// Scripted diagnosis for one incident.
    pub fn diagnosis_file(&self, incident_id: &str) -> PathBuf {
        self.diagnoses_dir.join(format!("{incident_id}.yaml"))
    }

    /// Walk up from `start` looking for a directory containing `.mender/`.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        let mut cur = start.to_path_buf();
        loop {
            if cur.join(".mender").is_dir() {
                return Some(cur);
            }
            if !cur.pop() {
                return None;
            }
        }
    }
}
