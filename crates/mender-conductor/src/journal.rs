use crate::error::ControllerError;
use mender_core::audit::EntryKind;
use mender_core::lifecycle::Effect;
use mender_core::record::IncidentRecord;
use mender_ledger::AuditSink;
use std::collections::HashMap;
use std::sync::RwLock;

/// Snapshots published to readers, keyed by incident id.
pub type Snapshots = RwLock<HashMap<String, IncidentRecord>>;

/// Write path for one incident: validate, append durably, then apply.
///
/// Nothing reaches the record (or readers) before the sink acknowledged it.
pub struct Journal<'a> {
    record: &'a mut IncidentRecord,
    sink: &'a dyn AuditSink,
    snapshots: &'a Snapshots,
}

impl<'a> Journal<'a> {
    pub fn new(record: &'a mut IncidentRecord, sink: &'a dyn AuditSink, snapshots: &'a Snapshots) -> Self {
        Self {
            record,
            sink,
            snapshots,
        }
    }

    pub fn record(&self) -> &IncidentRecord {
        &*self.record
    }

    pub async fn commit(&mut self, kind: EntryKind) -> Result<Effect, ControllerError> {
        self.record.validate(&kind)?;
        let entry = self.record.next_entry(kind);
        if let Err(e) = self.sink.append(&entry).await {
            tracing::error!(
                incident = %entry.incident_id,
                kind = entry.kind.name(),
                error = %e,
                "audit append failed"
            );
            return Err(e.into());
        }
        let effect = self.record.apply(&entry)?;
        tracing::debug!(
            incident = %entry.incident_id,
            seq = entry.seq,
            kind = entry.kind.name(),
            state = %self.record.state,
            "committed"
        );
        publish(self.snapshots, &*self.record);
        Ok(effect)
    }
}

pub fn publish(snapshots: &Snapshots, record: &IncidentRecord) {
    if let Ok(mut map) = snapshots.write() {
        map.insert(record.incident.id.clone(), record.clone());
    }
}
