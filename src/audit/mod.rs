//! Audit module - Usage ledger
//!
//! Every execution attempt that passes validation leaves exactly one record,
//! whether it completed, was blocked, or failed internally. Ledgers are
//! append-only and idempotent per `execution_id`.

mod jsonl;
mod memory;

pub use jsonl::JsonlLedger;
pub use memory::MemoryLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::AuditConfig;
use crate::error::Result;
use crate::limits::Tier;
use crate::orchestrator::ProviderFailure;

/// Final state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Blocked,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Blocked => "blocked",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub user_id: String,
    pub tier: Tier,
    pub language: String,
    pub status: ExecutionStatus,
    /// Provider that produced the result, if any
    pub provider_id: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub truncated: bool,
    #[serde(default)]
    pub security_warnings: Vec<String>,
    /// Providers tried and failed before the result
    #[serde(default)]
    pub provider_failures: Vec<ProviderFailure>,
    pub task_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Start a record with no outcome yet
    pub fn new(
        execution_id: impl Into<String>,
        user_id: impl Into<String>,
        tier: Tier,
        language: impl Into<String>,
        status: ExecutionStatus,
    ) -> Self {
        ExecutionRecord {
            execution_id: execution_id.into(),
            user_id: user_id.into(),
            tier,
            language: language.into(),
            status,
            provider_id: None,
            exit_code: None,
            execution_time_ms: 0,
            truncated: false,
            security_warnings: Vec::new(),
            provider_failures: Vec::new(),
            task_id: None,
            sandbox_id: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only usage ledger
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Record an execution. A second record with the same `execution_id` is
    /// ignored.
    async fn record_execution(&self, record: ExecutionRecord) -> Result<()>;
}

/// Ledger selected by configuration: a JSON-lines file when a path is set,
/// otherwise an in-memory ledger that is lost on exit
pub async fn open_ledger(config: &AuditConfig) -> Result<Arc<dyn UsageLedger>> {
    match &config.path {
        Some(path) => Ok(Arc::new(JsonlLedger::open(path).await?)),
        None => {
            warn!("No audit.path configured; usage records are kept in memory only");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_status_lowercase() {
        let record = ExecutionRecord::new("e1", "u1", Tier::Pro, "python", ExecutionStatus::Blocked);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "blocked");
        assert_eq!(json["tier"], "pro");
        assert!(json["provider_id"].is_null());
    }

    #[tokio::test]
    async fn test_open_ledger_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            path: Some(dir.path().join("audit").join("ledger.jsonl")),
        };
        let ledger = open_ledger(&config).await.unwrap();
        ledger
            .record_execution(ExecutionRecord::new("e1", "u1", Tier::Free, "shell", ExecutionStatus::Completed))
            .await
            .unwrap();
        let written = std::fs::read_to_string(config.path.as_ref().unwrap()).unwrap();
        assert_eq!(written.lines().count(), 1);

        assert!(open_ledger(&AuditConfig::default()).await.is_ok());
    }
}
