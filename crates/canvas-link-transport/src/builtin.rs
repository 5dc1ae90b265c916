//! Built-in handlers: cross-cutting side effects that feature code cannot
//! replace (desktop notifications, the daemon indicator).

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use canvas_link_core::protocol::{DaemonStatus, InboundMessage, MessageTag};

/// Desktop notification sink.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, title: &str, body: &str);
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "Notification");
    }
}

/// The fixed built-in handler set.
pub struct Builtins {
    notifier: Arc<dyn Notifier>,
    daemon: watch::Sender<Option<DaemonStatus>>,
}

impl Builtins {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (daemon, _) = watch::channel(None);
        Self { notifier, daemon }
    }

    /// Whether a built-in handler exists for `tag`.
    pub fn handles(tag: MessageTag) -> bool {
        matches!(
            tag,
            MessageTag::DaemonStatus
                | MessageTag::PulseExecutionFailed
                | MessageTag::StorageWarning
                | MessageTag::WatcherError
                | MessageTag::PluginHealth
        )
    }

    /// Latest daemon status, for indicator widgets.
    pub fn subscribe_daemon(&self) -> watch::Receiver<Option<DaemonStatus>> {
        self.daemon.subscribe()
    }

    pub(crate) fn dispatch(&mut self, message: InboundMessage) -> Result<(), InboundMessage> {
        match message {
            InboundMessage::DaemonStatus(status) => {
                debug!(
                    running = status.running,
                    active_jobs = status.active_jobs,
                    queued_jobs = status.queued_jobs,
                    "Daemon status"
                );
                self.daemon.send_replace(Some(status));
            }
            InboundMessage::PulseExecutionFailed(failed) => {
                warn!(
                    scheduled_job_id = %failed.scheduled_job_id,
                    execution_id = %failed.execution_id,
                    error = %failed.error_message,
                    "Pulse execution failed"
                );
                self.notifier.notify(
                    "Pulse execution failed",
                    &format!("{}: {}", failed.scheduled_job_id, failed.error_message),
                );
            }
            InboundMessage::StorageWarning(warning) => {
                let percent = (warning.fill_percent * 100.0).round();
                self.notifier.notify(
                    "Storage limit approaching",
                    &format!(
                        "{} / {} is {percent}% full ({} of {}), full in {}",
                        warning.actor,
                        warning.context,
                        warning.current,
                        warning.limit,
                        warning.time_until_full
                    ),
                );
            }
            InboundMessage::WatcherError(err) => {
                let title = if err.severity == "warning" {
                    "Watcher warning"
                } else {
                    "Watcher error"
                };
                self.notifier
                    .notify(title, &format!("{}: {}", err.watcher_id, err.error));
            }
            InboundMessage::PluginHealth(health) => {
                if !health.healthy {
                    self.notifier.notify(
                        "Plugin unhealthy",
                        &format!("{} ({}): {}", health.name, health.state, health.message),
                    );
                }
            }
            other => return Err(other),
        }
        Ok(())
    }
}
