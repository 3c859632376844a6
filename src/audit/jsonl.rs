//! JSON-lines file ledger
//!
//! One record per line, appended. Ids already in the file are loaded on
//! open so duplicates stay out across restarts.
//!
//! Only the most recent ids are remembered (an LRU cache of
//! [`RECENT_IDS_CAPACITY`] entries). A duplicate of an id older than that
//! window is appended again. Duplicates come from retries of the same
//! execution, which arrive close together.

use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ExecutionRecord, UsageLedger};
use crate::error::{Error, Result};

/// Execution ids remembered for duplicate detection
pub const RECENT_IDS_CAPACITY: u64 = 100_000;

/// Append-only ledger file
#[derive(Debug)]
pub struct JsonlLedger {
    path: PathBuf,
    seen: Cache<String, ()>,
    /// Serializes appends
    write: Mutex<()>,
}

impl JsonlLedger {
    /// Open (or create on first write) the ledger at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_capacity(path, RECENT_IDS_CAPACITY).await
    }

    /// Like [`JsonlLedger::open`], remembering at most `capacity` ids
    pub async fn open_with_capacity(path: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let seen = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        let mut existing = 0usize;

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (index, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ExecutionRecord>(line) {
                        Ok(record) => {
                            seen.insert(record.execution_id, ()).await;
                            existing += 1;
                        }
                        Err(e) => warn!(
                            "Skipping unreadable ledger line {} in {}: {}",
                            index + 1,
                            path.display(),
                            e
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            "Opened usage ledger {} ({} existing record(s))",
            path.display(),
            existing
        );
        Ok(JsonlLedger {
            path,
            seen,
            write: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UsageLedger for JsonlLedger {
    async fn record_execution(&self, record: ExecutionRecord) -> Result<()> {
        // Held across the write so concurrent appends cannot interleave
        let _write = self.write.lock().await;
        if self.seen.contains_key(&record.execution_id) {
            debug!("Ledger already has {}, skipping", record.execution_id);
            return Ok(());
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Ledger(format!("Cannot open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.seen.insert(record.execution_id, ()).await;
        Ok(())
    }
}
