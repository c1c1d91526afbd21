//! **Audit trail** for escalation sessions.
//!
//! Every state transition produces exactly one [`AuditRecord`]. Sinks:
//!
//! - [`JsonlAuditLog`]: one JSON object per line, appended to a file (the
//!   `emergency_calls.log` format).
//! - [`MemoryAuditLog`]: in-process, for tests and inspection.
//! - [`AuditWriter`]: background task that drains records from a channel into
//!   another sink, so the coordinator never waits on disk. Explicit
//!   `spawn`/`shutdown`; nothing global.

use crate::classifier::EmergencyType;
use crate::error::{Collaborator, CrisisError, CrisisResult};
use crate::ports::AuditLog;
use crate::session::{CallId, SessionId};
use crate::state::{CallStatus, EscalationState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub conversation_id: String,
    pub emergency_type: EmergencyType,
    pub from_state: EscalationState,
    pub to_state: EscalationState,
    /// Session step count after this record.
    pub step: u32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_status: Option<CallStatus>,
}

impl AuditRecord {
    pub fn new(
        session_id: SessionId,
        conversation_id: impl Into<String>,
        emergency_type: EmergencyType,
        from_state: EscalationState,
        to_state: EscalationState,
        step: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            conversation_id: conversation_id.into(),
            emergency_type,
            from_state,
            to_state,
            step,
            reason: reason.into(),
            call_id: None,
            call_status: None,
        }
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    pub fn with_call_status(mut self, status: CallStatus) -> Self {
        self.call_status = Some(status);
        self
    }

    /// True for records that changed state (as opposed to notes).
    pub fn is_transition(&self) -> bool {
        self.from_state != self.to_state
    }
}

/// Keeps records in memory. Cheap to clone; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    records: Arc<std::sync::Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn records_for(&self, conversation_id: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.conversation_id == conversation_id)
            .collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> CrisisResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }
}

/// Appends JSON lines to a file, creating it (and its parent directory) on first write.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record back. Blank lines are skipped; a malformed line is an error.
    pub async fn read_all(&self) -> CrisisResult<Vec<AuditRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(CrisisError::from))
            .collect()
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn append(&self, record: AuditRecord) -> CrisisResult<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

enum AuditCommand {
    Record(AuditRecord),
    Shutdown,
}

const AUDIT_CHANNEL_CAPACITY: usize = 1024;

/// Background audit writer. Records are written in submission order.
pub struct AuditWriter {
    tx: mpsc::Sender<AuditCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AuditWriter {
    /// Spawns the writer task on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditLog>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditCommand>(AUDIT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    AuditCommand::Record(record) => {
                        if let Err(e) = sink.append(record).await {
                            tracing::warn!(error = %e, "📝 Audit write failed; record dropped");
                        }
                    }
                    AuditCommand::Shutdown => break,
                }
            }
            tracing::debug!("📝 Audit writer stopped");
        });
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Flushes everything submitted so far and stops the task. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = self.tx.send(AuditCommand::Shutdown).await;
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "📝 Audit writer task ended abnormally");
            }
        }
    }
}

#[async_trait]
impl AuditLog for AuditWriter {
    async fn append(&self, record: AuditRecord) -> CrisisResult<()> {
        self.tx
            .send(AuditCommand::Record(record))
            .await
            .map_err(|_| CrisisError::unavailable(Collaborator::Audit, "audit writer is shut down"))
    }
}
