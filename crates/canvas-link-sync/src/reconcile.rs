//! Startup reconciliation of the local canvas with the backend.
//!
//! The snapshot fetch races a timeout. If the backend answers in time its
//! snapshot is merged into local state (local wins on shared ids). Otherwise
//! every local entity is queued for upload. The two paths never both run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use canvas_link_core::canvas::{CanvasSnapshot, CanvasState};

use crate::queue::{Enqueued, SyncOperation, SyncQueue};
use crate::remote::CanvasRemote;

/// Remote-only entities adopted by a merge, per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub glyphs: usize,
    pub compositions: usize,
    pub minimized: usize,
}

impl MergeCounts {
    pub fn total(&self) -> usize {
        self.glyphs + self.compositions + self.minimized
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

impl fmt::Display for MergeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "merged {}, {}, {}",
            plural(self.glyphs, "glyph", "glyphs"),
            plural(self.compositions, "composition", "compositions"),
            plural(self.minimized, "minimized window", "minimized windows"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The remote snapshot arrived in time and was merged.
    Merged(MergeCounts),
    /// The remote was unavailable; local entities were queued instead.
    Enqueued {
        /// Local entities pushed to the queue.
        entities: usize,
        /// Queue entries added or replaced.
        changed: usize,
        reason: String,
    },
}

impl ReconcileOutcome {
    /// Whether local state gained entities and should be persisted.
    pub fn adopted_any(&self) -> bool {
        matches!(self, ReconcileOutcome::Merged(counts) if counts.total() > 0)
    }
}

/// Merge `remote` into `local` by id. Remote-only ids are adopted; ids
/// already present locally are left untouched.
pub fn merge_snapshot(local: &mut CanvasState, remote: CanvasSnapshot) -> MergeCounts {
    let mut counts = MergeCounts::default();
    for glyph in remote.glyphs {
        if !local.glyphs.contains_key(&glyph.id) {
            local.upsert_glyph(glyph);
            counts.glyphs += 1;
        }
    }
    for composition in remote.compositions {
        if !local.compositions.contains_key(&composition.id) {
            local.upsert_composition(composition);
            counts.compositions += 1;
        }
    }
    for id in remote.minimized_windows {
        if local.minimized.insert(id) {
            counts.minimized += 1;
        }
    }
    counts
}

/// Queue one upsert or mark per local entity. Returns how many queue
/// entries changed. Persistence failures are logged and skipped.
pub async fn enqueue_local(local: &CanvasState, queue: &mut SyncQueue) -> usize {
    let operations = local
        .glyphs
        .values()
        .map(|glyph| SyncOperation::UpsertGlyph {
            glyph: glyph.clone(),
        })
        .chain(local.compositions.values().map(|composition| {
            SyncOperation::UpsertComposition {
                composition: composition.clone(),
            }
        }))
        .chain(
            local
                .minimized
                .iter()
                .map(|id| SyncOperation::MarkMinimized { id: id.clone() }),
        );

    let mut changed = 0;
    for operation in operations {
        let (kind, id) = (operation.kind(), operation.entity_id().to_string());
        match queue.enqueue(operation).await {
            Ok(Enqueued::Unchanged) => {}
            Ok(_) => changed += 1,
            Err(e) => {
                // The in-memory entry is still in place.
                changed += 1;
                warn!(kind, id = %id, error = %e, "Failed to persist sync queue");
            }
        }
    }
    changed
}

/// Runs the startup reconciliation against one backend.
pub struct Reconciler {
    remote: Arc<dyn CanvasRemote>,
    timeout: Duration,
}

impl Reconciler {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3_000);

    pub fn new(remote: Arc<dyn CanvasRemote>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    /// Reconcile `local` with the backend. Never fails: every error path
    /// degrades to queueing local state.
    pub async fn reconcile(&self, local: &mut CanvasState, queue: &mut SyncQueue) -> ReconcileOutcome {
        let reason = match tokio::time::timeout(self.timeout, self.remote.fetch_snapshot()).await {
            Ok(Ok(snapshot)) => {
                let counts = merge_snapshot(local, snapshot);
                info!(
                    glyphs = counts.glyphs,
                    compositions = counts.compositions,
                    minimized = counts.minimized,
                    "{counts}"
                );
                return ReconcileOutcome::Merged(counts);
            }
            Ok(Err(e)) => format!("snapshot fetch failed: {e}"),
            Err(_) => {
                // The fetch future is dropped here; a late reply is never applied.
                debug!(timeout_ms = self.timeout.as_millis() as u64, "Snapshot fetch abandoned");
                format!("snapshot fetch timed out after {}ms", self.timeout.as_millis())
            }
        };

        warn!(%reason, "Backend unavailable, queueing local canvas");
        let changed = enqueue_local(local, queue).await;
        info!(entities = local.len(), changed, "Queued local canvas for sync");
        ReconcileOutcome::Enqueued {
            entities: local.len(),
            changed,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use canvas_link_core::canvas::{Composition, PlacedElement};

    use super::*;
    use crate::remote::tests::MockRemote;

    fn glyph(id: &str, x: i32) -> PlacedElement {
        PlacedElement {
            id: id.into(),
            symbol: "sym".into(),
            x,
            y: 0,
            width: None,
            height: None,
            result_data: None,
        }
    }

    fn local_ab() -> CanvasState {
        let mut state = CanvasState::new();
        state.upsert_glyph(glyph("A", 1));
        state.upsert_glyph(glyph("B", 2));
        state
    }

    fn remote_bc() -> CanvasSnapshot {
        CanvasSnapshot {
            glyphs: vec![glyph("B", 500), glyph("C", 3)],
            ..CanvasSnapshot::default()
        }
    }

    fn reconciler(remote: MockRemote) -> (Reconciler, Arc<MockRemote>) {
        let remote = Arc::new(remote);
        (Reconciler::new(remote.clone(), Reconciler::DEFAULT_TIMEOUT), remote)
    }

    #[test]
    fn test_merge_adopts_remote_only_and_local_wins() {
        let mut local = local_ab();
        let counts = merge_snapshot(&mut local, remote_bc());

        assert_eq!(counts, MergeCounts { glyphs: 1, compositions: 0, minimized: 0 });
        let ids: Vec<_> = local.glyphs.keys().cloned().collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(local.glyphs["B"].x, 2);
    }

    #[test]
    fn test_merge_all_collections() {
        let mut local = CanvasState::new();
        local.mark_minimized("w1");
        let remote = CanvasSnapshot {
            glyphs: vec![],
            compositions: vec![Composition {
                id: "comp".into(),
                edges: vec![],
                x: 0,
                y: 0,
            }],
            minimized_windows: vec!["w1".into(), "w2".into()],
        };
        let counts = merge_snapshot(&mut local, remote);
        assert_eq!(counts, MergeCounts { glyphs: 0, compositions: 1, minimized: 1 });
        assert_eq!(counts.to_string(), "merged 0 glyphs, 1 composition, 1 minimized window");
    }

    #[tokio::test]
    async fn test_reachable_remote_merges_without_enqueue() {
        let (reconciler, remote) = reconciler(MockRemote::new().with_snapshot(remote_bc()));
        let mut local = local_ab();
        let mut queue = SyncQueue::in_memory();

        let outcome = reconciler.reconcile(&mut local, &mut queue).await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Merged(MergeCounts { glyphs: 1, compositions: 0, minimized: 0 })
        );
        assert!(outcome.adopted_any());
        assert!(queue.is_empty());
        assert_eq!(remote.calls(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let (reconciler, _) = reconciler(MockRemote::new().with_snapshot(remote_bc()));
        let mut local = local_ab();
        let mut queue = SyncQueue::in_memory();

        reconciler.reconcile(&mut local, &mut queue).await;
        let after_first = local.clone();
        let outcome = reconciler.reconcile(&mut local, &mut queue).await;

        assert_eq!(outcome, ReconcileOutcome::Merged(MergeCounts::default()));
        assert!(!outcome.adopted_any());
        assert_eq!(local, after_first);
    }

    #[tokio::test]
    async fn test_unreachable_enqueues_each_local_entity() {
        let (reconciler, _) = reconciler(MockRemote::new());
        let mut local = local_ab();
        let before = local.clone();
        let mut queue = SyncQueue::in_memory();

        let outcome = reconciler.reconcile(&mut local, &mut queue).await;
        assert!(matches!(
            outcome,
            ReconcileOutcome::Enqueued { entities: 2, changed: 2, .. }
        ));
        let queued: Vec<_> = queue.entries().iter().map(|e| e.operation.clone()).collect();
        assert_eq!(
            queued,
            vec![
                SyncOperation::UpsertGlyph { glyph: glyph("A", 1) },
                SyncOperation::UpsertGlyph { glyph: glyph("B", 2) },
            ]
        );
        assert_eq!(local, before);
    }

    #[tokio::test]
    async fn test_offline_rerun_does_not_duplicate() {
        let (reconciler, _) = reconciler(MockRemote::new());
        let mut local = local_ab();
        let mut queue = SyncQueue::in_memory();

        reconciler.reconcile(&mut local, &mut queue).await;
        let outcome = reconciler.reconcile(&mut local, &mut queue).await;
        assert!(matches!(outcome, ReconcileOutcome::Enqueued { changed: 0, .. }));
        assert_eq!(queue.len(), 2);

        // A local edit replaces the queued entry in place.
        local.upsert_glyph(glyph("A", 42));
        let outcome = reconciler.reconcile(&mut local, &mut queue).await;
        assert!(matches!(outcome, ReconcileOutcome::Enqueued { changed: 1, .. }));
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.entries()[0].operation,
            SyncOperation::UpsertGlyph { glyph: glyph("A", 42) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_remote_times_out_to_enqueue() {
        let (reconciler, _) = reconciler(
            MockRemote::new()
                .with_snapshot(remote_bc())
                .slow(Duration::from_secs(10)),
        );
        let mut local = local_ab();
        let mut queue = SyncQueue::in_memory();

        let started = tokio::time::Instant::now();
        let outcome = reconciler.reconcile(&mut local, &mut queue).await;

        let waited = started.elapsed();
        assert!(waited >= Reconciler::DEFAULT_TIMEOUT, "{waited:?}");
        assert!(waited < Duration::from_secs(10), "{waited:?}");
        match outcome {
            ReconcileOutcome::Enqueued { entities, reason, .. } => {
                assert_eq!(entities, 2);
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("expected enqueue, got {other:?}"),
        }
        // The late snapshot is never merged.
        assert!(!local.glyphs.contains_key("C"));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_local_offline_enqueues_nothing() {
        let (reconciler, _) = reconciler(MockRemote::new());
        let mut local = CanvasState::new();
        let mut queue = SyncQueue::in_memory();
        let outcome = reconciler.reconcile(&mut local, &mut queue).await;
        assert!(matches!(outcome, ReconcileOutcome::Enqueued { entities: 0, changed: 0, .. }));
        assert!(queue.is_empty());
    }
}
