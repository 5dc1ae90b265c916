//! Canvas state synchronisation: local persistence, the outbound sync queue,
//! the remote canvas API, and startup reconciliation.

pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod store;

pub use queue::{DrainReport, Enqueued, QueuedSync, SyncOperation, SyncQueue};
pub use reconcile::{MergeCounts, ReconcileOutcome, Reconciler};
pub use remote::{CanvasRemote, HttpCanvasRemote};
pub use store::CanvasStore;
