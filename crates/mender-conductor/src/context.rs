use crate::collab::{HistorySearch, KnowledgeSearch};
use mender_core::types::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Merges incident data with knowledge-base and history lookups.
///
/// A failed or slow lookup degrades to an empty part plus a warning; gathering
/// itself never fails. Complete bundles are cached per incident id until the
/// caller evicts them; degraded ones are retried on the next call.
pub struct ContextAggregator {
    knowledge: Arc<dyn KnowledgeSearch>,
    history: Arc<dyn HistorySearch>,
    lookup_timeout: Duration,
    cache: Mutex<HashMap<String, ContextBundle>>,
}

impl ContextAggregator {
    pub fn new(
        knowledge: Arc<dyn KnowledgeSearch>,
        history: Arc<dyn HistorySearch>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            knowledge,
            history,
            lookup_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn gather(&self, incident: &Incident) -> ContextBundle {
        if let Some(hit) = self.cached(&incident.id) {
            return hit;
        }

        let (kb, past) = tokio::join!(
            tokio::time::timeout(self.lookup_timeout, self.knowledge.find(&incident.tags)),
            tokio::time::timeout(self.lookup_timeout, self.history.find(incident)),
        );

        let mut bundle = ContextBundle::default();
        match flatten(kb, self.lookup_timeout) {
            Ok(articles) => bundle.knowledge = rank_knowledge(&incident.tags, articles),
            Err(detail) => {
                tracing::warn!(incident = %incident.id, %detail, "knowledge search degraded");
                bundle.warnings.push(ContextWarning {
                    source: ContextSource::KnowledgeBase,
                    detail,
                });
            }
        }
        match flatten(past, self.lookup_timeout) {
            Ok(similar) => bundle.similar = rank_history(similar),
            Err(detail) => {
                tracing::warn!(incident = %incident.id, %detail, "history search degraded");
                bundle.warnings.push(ContextWarning {
                    source: ContextSource::History,
                    detail,
                });
            }
        }

        if bundle.warnings.is_empty() {
            if let Ok(mut cache) = self.cache.lock() {
                cache
                    .entry(incident.id.clone())
                    .or_insert_with(|| bundle.clone());
            }
        }
        bundle
    }

    /// Drop the cached bundle once it is part of the incident record.
    pub fn evict(&self, id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(id);
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn cached(&self, id: &str) -> Option<ContextBundle> {
        self.cache.lock().ok().and_then(|c| c.get(id).cloned())
    }
}

fn flatten<T>(
    res: Result<anyhow::Result<T>, tokio::time::error::Elapsed>,
    timeout: Duration,
) -> Result<T, String> {
    match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
    }
}

/// Articles sharing at least one tag, by overlap size (descending) then id.
fn rank_knowledge(
    tags: &std::collections::BTreeSet<String>,
    articles: Vec<KnowledgeArticle>,
) -> Vec<KnowledgeRef> {
    let mut refs: Vec<KnowledgeRef> = articles
        .into_iter()
        .filter_map(|a| {
            let overlap: Vec<String> = a.tags.intersection(tags).cloned().collect();
            (!overlap.is_empty()).then(|| KnowledgeRef {
                id: a.id,
                title: a.title,
                tag_overlap: overlap,
            })
        })
        .collect();
    refs.sort_by(|a, b| {
        b.tag_overlap
            .len()
            .cmp(&a.tag_overlap.len())
            .then_with(|| a.id.cmp(&b.id))
    });
    refs.dedup_by(|a, b| a.id == b.id);
    refs
}

/// By similarity (descending) then id; similarity clamped to 100.
fn rank_history(mut similar: Vec<PastIncident>) -> Vec<PastIncident> {
    for p in &mut similar {
        p.similarity = p.similarity.min(100);
    }
    similar.sort_by(|a, b| b.similarity.cmp(&a.similarity).then_with(|| a.id.cmp(&b.id)));
    similar
}
