use mender_core::audit::AuditEntry;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
    #[error("audit sink I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt audit line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("out-of-order append for {incident_id}: expected seq {expected}, got {found}")]
    OutOfOrder {
        incident_id: String,
        expected: u64,
        found: u64,
    },
}

/// Durable, append-only store of audit entries, ordered per incident.
///
/// `append` returning `Ok` is the acknowledgement: callers must not act on
/// an entry before it has been acknowledged.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), SinkError>;

    /// Entries of one incident, in append order.
    async fn entries(&self, incident_id: &str) -> Result<Vec<AuditEntry>, SinkError>;

    /// Incident ids in order of first appearance.
    async fn incident_ids(&self) -> Result<Vec<String>, SinkError>;
}

/// Per-incident append order check shared by the sinks.
pub(crate) fn check_order(
    heads: &std::collections::HashMap<String, u64>,
    entry: &AuditEntry,
) -> Result<(), SinkError> {
    let expected = heads.get(&entry.incident_id).copied().unwrap_or(0);
    if entry.seq != expected {
        return Err(SinkError::OutOfOrder {
            incident_id: entry.incident_id.clone(),
            expected,
            found: entry.seq,
        });
    }
    Ok(())
}
