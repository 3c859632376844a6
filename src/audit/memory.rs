//! In-memory ledger

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;

use super::{ExecutionRecord, UsageLedger};
use crate::error::Result;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<ExecutionRecord>,
    seen: HashSet<String>,
}

/// Ledger held in process memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger::default()
    }

    /// Snapshot of recorded entries in insertion order
    pub async fn records(&self) -> Vec<ExecutionRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn record_execution(&self, record: ExecutionRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.seen.insert(record.execution_id.clone()) {
            inner.records.push(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ExecutionStatus;
    use crate::limits::Tier;

    #[tokio::test]
    async fn test_duplicate_ids_are_ignored() {
        let ledger = MemoryLedger::new();
        let first = ExecutionRecord::new("e1", "u", Tier::Free, "shell", ExecutionStatus::Completed);
        let mut second = first.clone();
        second.status = ExecutionStatus::Failed;

        ledger.record_execution(first).await.unwrap();
        ledger.record_execution(second).await.unwrap();
        ledger
            .record_execution(ExecutionRecord::new("e2", "u", Tier::Free, "shell", ExecutionStatus::Blocked))
            .await
            .unwrap();

        let records = ledger.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, ExecutionStatus::Completed);
        assert_eq!(records[1].execution_id, "e2");
    }
}
