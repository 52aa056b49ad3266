use crate::sink::{check_order, AuditSink, SinkError};
use mender_core::audit::AuditEntry;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    entries: Vec<AuditEntry>,
    heads: HashMap<String, u64>,
    /// Appends still accepted before the sink goes unavailable.
    budget: Option<usize>,
}

/// In-memory audit sink. Used by tests and embedders without a disk log.
#[derive(Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` more appends, then fail every append with `Unavailable`.
    pub fn fail_after(&self, n: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.budget = Some(n);
        }
    }

    pub fn restore_service(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.budget = None;
        }
    }

    /// Every entry across incidents, in append order.
    pub fn all(&self) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .map(|inner| inner.entries.clone())
            .unwrap_or_default()
    }
}

fn poisoned() -> SinkError {
    SinkError::Unavailable("memory sink lock poisoned".into())
}

#[async_trait::async_trait]
impl AuditSink for MemorySink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        let budget = inner.budget;
        match budget {
            Some(0) => return Err(SinkError::Unavailable("memory sink offline".into())),
            Some(n) => inner.budget = Some(n - 1),
            None => {}
        }
        check_order(&inner.heads, entry)?;
        inner.heads.insert(entry.incident_id.clone(), entry.seq + 1);
        inner.entries.push(entry.clone());
        Ok(())
    }

    async fn entries(&self, incident_id: &str) -> Result<Vec<AuditEntry>, SinkError> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.incident_id == incident_id)
            .cloned()
            .collect())
    }

    async fn incident_ids(&self) -> Result<Vec<String>, SinkError> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        let mut ids: Vec<String> = Vec::new();
        for e in &inner.entries {
            if !ids.contains(&e.incident_id) {
                ids.push(e.incident_id.clone());
            }
        }
        Ok(ids)
    }
}
