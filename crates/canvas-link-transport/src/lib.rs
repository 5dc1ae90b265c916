//! Realtime transport for canvas-link: a self-healing WebSocket connection
//! and a tiered, type-checked message router.

pub mod backoff;
pub mod builtin;
pub mod connection;
pub mod endpoint;
pub mod registry;
pub mod router;

pub use builtin::{LogNotifier, Notifier};
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionStatus};
pub use router::{Route, Router, RouterHandle};
