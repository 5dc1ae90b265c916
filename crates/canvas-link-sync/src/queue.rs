//! Outbound sync queue: idempotent canvas mutations waiting to reach the
//! backend.
//!
//! The queue holds at most one entry per entity (operation kind + id).
//! Enqueueing identical content is a no-op; enqueueing changed content
//! replaces the entry in place, keeping its position.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use canvas_link_core::canvas::{Composition, PlacedElement};
use canvas_link_core::error::{CanvasLinkError, Result};

use crate::remote::CanvasRemote;

/// One idempotent mutation of the remote canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOperation {
    UpsertGlyph { glyph: PlacedElement },
    UpsertComposition { composition: Composition },
    MarkMinimized { id: String },
}

impl SyncOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncOperation::UpsertGlyph { .. } => "upsert_glyph",
            SyncOperation::UpsertComposition { .. } => "upsert_composition",
            SyncOperation::MarkMinimized { .. } => "mark_minimized",
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            SyncOperation::UpsertGlyph { glyph } => &glyph.id,
            SyncOperation::UpsertComposition { composition } => &composition.id,
            SyncOperation::MarkMinimized { id } => id,
        }
    }

    /// Deduplication key.
    pub fn key(&self) -> (&'static str, &str) {
        (self.kind(), self.entity_id())
    }

    /// Send this operation to `remote`.
    pub async fn apply(&self, remote: &dyn CanvasRemote) -> Result<()> {
        match self {
            SyncOperation::UpsertGlyph { glyph } => remote.upsert_glyph(glyph).await,
            SyncOperation::UpsertComposition { composition } => {
                remote.upsert_composition(composition).await
            }
            SyncOperation::MarkMinimized { id } => remote.mark_minimized(id).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSync {
    pub operation: SyncOperation,
    pub enqueued_at: DateTime<Utc>,
}

/// What [`SyncQueue::enqueue`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Added,
    Replaced,
    Unchanged,
}

/// Result of replaying the queue against the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub remaining: usize,
    /// Error of the operation that stopped the drain.
    pub failure: Option<String>,
}

/// Ordered, deduplicated queue of pending sync operations.
///
/// Persisted to `<dir>/sync_queue.json` when opened with a directory; the
/// file is created on the first change.
pub struct SyncQueue {
    path: Option<PathBuf>,
    entries: Vec<QueuedSync>,
}

impl SyncQueue {
    /// Queue that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
        }
    }

    /// Open the queue stored under `dir`, loading any existing entries.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join("sync_queue.json");
        let entries = if path.exists() {
            let data = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&data).map_err(|e| {
                CanvasLinkError::Store(format!("corrupt sync queue {}: {e}", path.display()))
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[QueuedSync] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `operation`, replacing a queued operation on the same entity.
    ///
    /// The in-memory queue is updated even when persisting fails.
    pub async fn enqueue(&mut self, operation: SyncOperation) -> Result<Enqueued> {
        let existing = self
            .entries
            .iter()
            .position(|entry| entry.operation.key() == operation.key());

        let result = match existing {
            Some(i) if self.entries[i].operation == operation => return Ok(Enqueued::Unchanged),
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.operation = operation;
                entry.enqueued_at = Utc::now();
                Enqueued::Replaced
            }
            None => {
                self.entries.push(QueuedSync {
                    operation,
                    enqueued_at: Utc::now(),
                });
                Enqueued::Added
            }
        };
        self.persist().await?;
        Ok(result)
    }

    /// Replay queued operations in order. Each acknowledged operation is
    /// removed; the first failure stops the drain so ordering is kept.
    pub async fn drain(&mut self, remote: &dyn CanvasRemote) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(entry) = self.entries.first() {
            let kind = entry.operation.kind();
            let id = entry.operation.entity_id().to_string();
            match entry.operation.apply(remote).await {
                Ok(()) => {
                    debug!(kind, id = %id, "Sync operation acknowledged");
                    self.entries.remove(0);
                    report.sent += 1;
                }
                Err(e) => {
                    warn!(kind, id = %id, error = %e, "Sync operation failed, stopping drain");
                    report.failure = Some(e.to_string());
                    break;
                }
            }
        }
        report.remaining = self.entries.len();
        if report.sent > 0 {
            self.persist().await?;
            info!(sent = report.sent, remaining = report.remaining, "Drained sync queue");
        }
        Ok(report)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
