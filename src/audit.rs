//! Transaction audit log
//!
//! Appends one JSON line per transaction lifecycle transition so a user can
//! check on-chain whether a transaction reported as failed was actually
//! mined before resubmitting it.

use crate::gateway::{PendingTransaction, TxStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entry in the audit log
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: DateTime<Utc>,
    entry_type: &'static str,
    #[serde(flatten)]
    transaction: &'a PendingTransaction,
    error: Option<&'a str>,
    duration_ms: i64,
}

/// Writer for audit log entries
struct AuditLogWriter {
    path: PathBuf,
}

impl AuditLogWriter {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, entry: &AuditEntry<'_>) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Append-only JSONL log of contract transactions
#[derive(Clone)]
pub struct AuditLog {
    writer: Arc<Mutex<AuditLogWriter>>,
}

impl AuditLog {
    /// Create an audit log writing to `log_path` (JSONL format)
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(AuditLogWriter::new(log_path.into()))),
        }
    }

    /// Record the transaction's current status
    ///
    /// Audit failures are logged and never fail the action.
    pub async fn record(&self, transaction: &PendingTransaction, error: Option<&str>) {
        let now = Utc::now();
        let entry = AuditEntry {
            timestamp: now,
            entry_type: match transaction.status {
                TxStatus::Submitted => "transaction_submitted",
                TxStatus::Confirmed => "transaction_confirmed",
                TxStatus::Failed => "transaction_failed",
            },
            transaction,
            error,
            duration_ms: (now - transaction.submitted_at).num_milliseconds(),
        };

        let writer = self.writer.lock().await;
        if let Err(e) = writer.write(&entry) {
            tracing::warn!(error = %e, "Failed to write audit log entry");
        }
    }
}
