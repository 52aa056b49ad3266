use crate::sink::{check_order, AuditSink, SinkError};
use mender_core::audit::AuditEntry;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// Audit sink backed by a single `audit.jsonl`, one entry per line.
///
/// A line only counts once its terminating newline is on disk. An
/// unterminated tail is a torn write: readers skip it and the next append
/// truncates it away.
pub struct JsonlSink {
    path: PathBuf,
    fsync: bool,
    /// Next expected seq per incident, loaded on first append.
    heads: Mutex<Option<HashMap<String, u64>>>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>, fsync: bool) -> Self {
        Self {
            path: path.into(),
            fsync,
            heads: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Complete entries, plus the byte length they occupy.
    fn scan(&self) -> Result<(Vec<AuditEntry>, u64), SinkError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };
        let complete = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        if complete < bytes.len() {
            tracing::warn!(
                path = %self.path.display(),
                bytes = bytes.len() - complete,
                "skipping torn audit tail"
            );
        }
        let mut entries = Vec::new();
        for (i, line) in bytes[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let entry: AuditEntry = serde_json::from_slice(line)
                .map_err(|source| SinkError::Corrupt { line: i + 1, source })?;
            entries.push(entry);
        }
        Ok((entries, complete as u64))
    }

    fn read_all(&self) -> Result<Vec<AuditEntry>, SinkError> {
        Ok(self.scan()?.0)
    }

    /// Load the per-incident heads and cut any torn tail off the file.
    fn load_heads(&self) -> Result<HashMap<String, u64>, SinkError> {
        let (entries, valid_len) = self.scan()?;
        let mut heads = HashMap::new();
        for e in entries {
            heads.insert(e.incident_id.clone(), e.seq + 1);
        }
        match OpenOptions::new().write(true).open(&self.path) {
            Ok(file) => {
                if file.metadata()?.len() > valid_len {
                    tracing::warn!(path = %self.path.display(), valid_len, "truncating torn audit tail");
                    file.set_len(valid_len)?;
                    file.sync_all()?;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(heads)
    }
}

#[async_trait::async_trait]
impl AuditSink for JsonlSink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), SinkError> {
        let mut guard = self
            .heads
            .lock()
            .map_err(|_| SinkError::Unavailable("jsonl sink lock poisoned".into()))?;
        let mut heads = match guard.take() {
            Some(heads) => heads,
            None => self.load_heads()?,
        };
        if let Err(e) = check_order(&heads, entry) {
            *guard = Some(heads);
            return Err(e);
        }

        let mut line = serde_json::to_string(entry)
            .map_err(|source| SinkError::Corrupt { line: 0, source })?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let start = file.metadata()?.len();

        // One write for the whole line; undo it if it is not fully durable.
        let written = file.write_all(line.as_bytes()).and_then(|()| {
            if self.fsync {
                file.sync_all()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            match file.set_len(start).and_then(|()| file.sync_all()) {
                // Heads stay unloaded, so the next append rescans and trims.
                Err(undo) => {
                    tracing::error!(incident = %entry.incident_id, error = %undo, "could not undo partial audit write")
                }
                Ok(()) => *guard = Some(heads),
            }
            return Err(e.into());
        }

        heads.insert(entry.incident_id.clone(), entry.seq + 1);
        *guard = Some(heads);
        tracing::debug!(incident = %entry.incident_id, seq = entry.seq, kind = entry.kind.name(), "audit entry appended");
        Ok(())
    }

    async fn entries(&self, incident_id: &str) -> Result<Vec<AuditEntry>, SinkError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.incident_id == incident_id)
            .collect())
    }

    async fn incident_ids(&self) -> Result<Vec<String>, SinkError> {
        let mut ids: Vec<String> = Vec::new();
        for e in self.read_all()? {
            if !ids.contains(&e.incident_id) {
                ids.push(e.incident_id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_core::audit::{verify_chain, EntryKind};

    fn chain(incident: &str, n: u64) -> Vec<AuditEntry> {
        let mut out: Vec<AuditEntry> = Vec::new();
        for seq in 0..n {
            let parent = out.last().map(|e| e.hash.clone());
            out.push(AuditEntry::new(
                incident,
                seq,
                parent.as_deref(),
                EntryKind::AnalysisFailed {
                    reason: format!("step {seq}"),
                },
            ));
        }
        out
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(tmp.path().join("ledger/audit.jsonl"), true);
        for e in chain("INC-1", 3) {
            sink.append(&e).await.unwrap();
        }
        for e in chain("INC-2", 1) {
            sink.append(&e).await.unwrap();
        }

        let back = sink.entries("INC-1").await.unwrap();
        assert_eq!(back.len(), 3);
        verify_chain(&back).unwrap();
        assert_eq!(sink.incident_ids().await.unwrap(), vec!["INC-1", "INC-2"]);
    }

    #[tokio::test]
    async fn reopened_sink_continues_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let entries = chain("INC-1", 3);
        {
            let sink = JsonlSink::new(&path, false);
            sink.append(&entries[0]).await.unwrap();
            sink.append(&entries[1]).await.unwrap();
        }
        let sink = JsonlSink::new(&path, false);
        assert!(matches!(
            sink.append(&entries[0]).await,
            Err(SinkError::OutOfOrder { expected: 2, .. })
        ));
        sink.append(&entries[2]).await.unwrap();
        assert_eq!(sink.entries("INC-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn corrupt_line_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let sink = JsonlSink::new(&path, false);
        assert!(matches!(
            sink.entries("INC-1").await,
            Err(SinkError::Corrupt { line: 1, .. })
        ));
    }

    #[tokio::test]
    async fn torn_tail_is_skipped_then_trimmed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let entries = chain("INC-1", 2);
        JsonlSink::new(&path, false).append(&entries[0]).await.unwrap();

        // Crash partway through writing the second line.
        let partial = serde_json::to_string(&entries[1]).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial.as_bytes()[..40]).unwrap();
        drop(file);

        let sink = JsonlSink::new(&path, true);
        assert_eq!(sink.entries("INC-1").await.unwrap().len(), 1);
        sink.append(&entries[1]).await.unwrap();

        let back = sink.entries("INC-1").await.unwrap();
        assert_eq!(back.len(), 2);
        verify_chain(&back).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn lone_partial_line_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        std::fs::write(&path, r#"{"entry_id":"aud_01"#).unwrap();
        let sink = JsonlSink::new(&path, false);
        assert!(sink.entries("INC-1").await.unwrap().is_empty());
        sink.append(&chain("INC-1", 1)[0]).await.unwrap();
        assert_eq!(sink.entries("INC-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(tmp.path().join("none.jsonl"), false);
        assert!(sink.entries("INC-1").await.unwrap().is_empty());
        assert!(sink.incident_ids().await.unwrap().is_empty());
    }
}
