use mender_core::risk::RiskPolicy;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Conductor settings, stored as `.mender/config.json`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConductorConfig {
    pub diagnostic_timeout_sec: u64,
    pub lookup_timeout_sec: u64,
    pub action_timeout_sec: u64,
    pub rollback_timeout_sec: u64,
    pub production_markers: Vec<String>,
    pub extra_high_risk_patterns: Vec<String>,
    pub extra_mutating_patterns: Vec<String>,
    /// Shell template run as the reachability check; `{host}` is substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reachability_cmd: Option<String>,
    /// Reviewer identity used when none is given.
    pub actor: String,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            diagnostic_timeout_sec: 120,
            lookup_timeout_sec: 10,
            action_timeout_sec: 300,
            rollback_timeout_sec: 300,
            production_markers: RiskPolicy::default().production_markers,
            extra_high_risk_patterns: Vec::new(),
            extra_mutating_patterns: Vec::new(),
            reachability_cmd: None,
            actor: "operator".to_string(),
        }
    }
}

impl ConductorConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        Self::from_json(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }

    pub fn risk_policy(&self) -> RiskPolicy {
        RiskPolicy {
            production_markers: self.production_markers.clone(),
            extra_high_risk_patterns: self.extra_high_risk_patterns.clone(),
            extra_mutating_patterns: self.extra_mutating_patterns.clone(),
        }
    }

    pub fn diagnostic_timeout(&self) -> Duration {
        Duration::from_secs(self.diagnostic_timeout_sec)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_sec)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_sec)
    }

    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_secs(self.rollback_timeout_sec)
    }
}

pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}
