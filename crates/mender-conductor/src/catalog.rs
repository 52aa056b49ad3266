//! File-backed collaborators over `.mender/catalog/`.

use crate::collab::*;
use crate::error::StageFailure;
use anyhow::Context;
use mender_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn read_yaml_list<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(&content).with_context(|| format!("parse {}", path.display()))
}

/// Articles listed in `knowledge.yaml`.
pub struct FileKnowledge {
    path: PathBuf,
}

impl FileKnowledge {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait::async_trait]
impl KnowledgeSearch for FileKnowledge {
    async fn find(&self, _tags: &BTreeSet<String>) -> anyhow::Result<Vec<KnowledgeArticle>> {
        read_yaml_list(&self.path)
    }
}

/// One entry of `history.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub resolution: String,
    pub date: String,
    /// Overrides the computed tag similarity.
    #[serde(default)]
    pub similarity: Option<u8>,
}

/// Tag Jaccard index scaled to 0..=100.
pub fn tag_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> u8 {
    let union = a.union(b).count();
    if union == 0 {
        return 0;
    }
    let shared = a.intersection(b).count();
    ((shared * 100) / union) as u8
}

/// Past incidents from `history.yaml` plus resolutions appended by
/// [`FileFeedback`].
pub struct FileHistory {
    history: PathBuf,
    resolutions: PathBuf,
}

impl FileHistory {
    pub fn new(history: PathBuf, resolutions: PathBuf) -> Self {
        Self {
            history,
            resolutions,
        }
    }

    fn resolved(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        if !self.resolutions.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.resolutions)
            .with_context(|| format!("read {}", self.resolutions.display()))?;
        let mut out = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fb: ResolutionFeedback = serde_json::from_str(line).with_context(|| {
                format!("{}:{}", self.resolutions.display(), i + 1)
            })?;
            if fb.outcome != FeedbackOutcome::Resolved {
                continue;
            }
            out.push(HistoryEntry {
                resolution: if fb.root_cause.is_empty() {
                    fb.commands.join("; ")
                } else {
                    fb.root_cause
                },
                date: fb.recorded_at.chars().take(10).collect(),
                id: fb.incident_id,
                tags: fb.tags,
                similarity: None,
            });
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl HistorySearch for FileHistory {
    async fn find(&self, incident: &Incident) -> anyhow::Result<Vec<PastIncident>> {
        let mut entries: Vec<HistoryEntry> = read_yaml_list(&self.history)?;
        entries.extend(self.resolved()?);
        Ok(entries
            .into_iter()
            .filter(|e| e.id != incident.id)
            .filter_map(|e| {
                let similarity = e
                    .similarity
                    .unwrap_or_else(|| tag_similarity(&e.tags, &incident.tags))
                    .min(100);
                (similarity > 0).then(|| PastIncident {
                    id: e.id,
                    similarity,
                    resolution: e.resolution,
                    date: e.date,
                })
            })
            .collect())
    }
}

/// Appends resolutions to `resolutions.jsonl`.
pub struct FileFeedback {
    path: PathBuf,
}

impl FileFeedback {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait::async_trait]
impl KnowledgeFeedback for FileFeedback {
    async fn record(&self, feedback: &ResolutionFeedback) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(feedback)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Diagnoses prepared as `diagnoses/<incident-id>.yaml`.
pub struct FileDiagnosis {
    dir: PathBuf,
}

impl FileDiagnosis {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait::async_trait]
impl DiagnosticEngine for FileDiagnosis {
    async fn analyze(
        &self,
        incident: &Incident,
        _context: &ContextBundle,
        _deadline: Duration,
    ) -> Result<DiagnosticReport, StageFailure> {
        let path = self.dir.join(format!("{}.yaml", incident.id));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            StageFailure::DiagnosticUnavailable(format!("{}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| StageFailure::MalformedReport(format!("{}: {e}", path.display())))
    }
}
