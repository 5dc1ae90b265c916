//! Message router: picks exactly one handler tier per inbound frame.
//!
//! Precedence, first match wins:
//! 1. built-in handler for the exact tag
//! 2. dynamically registered handler for the exact tag
//! 3. the fallback handler
//! 4. warn and drop

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use canvas_link_core::protocol::{DaemonStatus, InboundMessage, MessageTag, Payload, RawFrame};

use crate::builtin::{Builtins, Notifier};
use crate::registry::{boxed_handler, BoxedHandler, HandlerRegistry};

/// Catch-all for frames no other tier claims.
pub type FallbackHandler = Box<dyn FnMut(RawFrame) + Send>;

/// Which tier handled a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Builtin,
    Dynamic,
    Fallback,
    /// No tier matched; the frame was dropped.
    Unrouted,
    /// The frame failed to parse or did not match its payload schema.
    Malformed,
}

/// Work items for a spawned router. Frames and registry mutations share one
/// queue so they are applied in arrival order.
pub enum RouterCommand {
    Frame(String),
    Register(MessageTag, BoxedHandler),
    Unregister(MessageTag),
    SetFallback(Option<FallbackHandler>),
}

pub struct Router {
    builtins: Builtins,
    registry: HandlerRegistry,
    fallback: Option<FallbackHandler>,
}

impl Router {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            builtins: Builtins::new(notifier),
            registry: HandlerRegistry::new(),
            fallback: None,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn subscribe_daemon(&self) -> watch::Receiver<Option<DaemonStatus>> {
        self.builtins.subscribe_daemon()
    }

    /// Register a feature handler for `P::TAG`, replacing any previous one.
    pub fn register<P, F>(&mut self, handler: F) -> bool
    where
        P: Payload,
        F: FnMut(P) + Send + 'static,
    {
        self.registry.register(handler)
    }

    pub fn unregister(&mut self, tag: MessageTag) -> bool {
        self.registry.unregister(tag)
    }

    pub fn set_fallback<F>(&mut self, handler: F)
    where
        F: FnMut(RawFrame) + Send + 'static,
    {
        self.fallback = Some(Box::new(handler));
    }

    pub fn clear_fallback(&mut self) {
        self.fallback = None;
    }

    /// Parse and route one text frame. Never panics.
    pub fn route_text(&mut self, text: &str) -> Route {
        match RawFrame::parse(text) {
            Ok(frame) => self.route(frame),
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                Route::Malformed
            }
        }
    }

    pub fn route(&mut self, frame: RawFrame) -> Route {
        if let Some(tag) = frame.tag() {
            let builtin = Builtins::handles(tag);
            if builtin || self.registry.contains(tag) {
                let message = match InboundMessage::decode(tag, frame.body) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(%tag, error = %e, "Dropping malformed frame");
                        return Route::Malformed;
                    }
                };
                return if builtin {
                    let builtins = &mut self.builtins;
                    guarded(tag.as_str(), || {
                        let _ = builtins.dispatch(message);
                    });
                    Route::Builtin
                } else {
                    let registry = &mut self.registry;
                    guarded(tag.as_str(), || {
                        let _ = registry.dispatch(message);
                    });
                    Route::Dynamic
                };
            }
        }

        match self.fallback.as_mut() {
            Some(fallback) => {
                let kind = frame.kind.clone();
                guarded(&kind, || fallback(frame));
                Route::Fallback
            }
            None => {
                warn!(kind = %frame.kind, "No handler for message, dropping");
                Route::Unrouted
            }
        }
    }

    fn apply(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::Frame(text) => {
                let route = self.route_text(&text);
                debug!(?route, "Routed frame");
            }
            RouterCommand::Register(tag, handler) => {
                self.registry.insert(tag, handler);
            }
            RouterCommand::Unregister(tag) => {
                self.registry.unregister(tag);
            }
            RouterCommand::SetFallback(handler) => {
                self.fallback = handler;
            }
        }
    }

    /// Process commands until every [`RouterHandle`] is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RouterCommand>) {
        while let Some(command) = commands.recv().await {
            self.apply(command);
        }
        debug!("Router stopped");
    }

    /// Move the router onto its own task.
    pub fn spawn(self) -> (RouterHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (RouterHandle { tx }, task)
    }
}

/// Run a handler, containing any panic so the routing loop survives.
fn guarded(kind: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(kind, "Message handler panicked");
    }
}

/// Cloneable handle to a spawned [`Router`].
///
/// Every method returns false once the router task has stopped.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterCommand>,
}

impl RouterHandle {
    /// Queue an inbound text frame for routing.
    pub fn deliver(&self, text: String) -> bool {
        self.tx.send(RouterCommand::Frame(text)).is_ok()
    }

    pub fn register<P, F>(&self, handler: F) -> bool
    where
        P: Payload,
        F: FnMut(P) + Send + 'static,
    {
        self.tx
            .send(RouterCommand::Register(P::TAG, boxed_handler(handler)))
            .is_ok()
    }

    pub fn unregister(&self, tag: MessageTag) -> bool {
        self.tx.send(RouterCommand::Unregister(tag)).is_ok()
    }

    pub fn set_fallback<F>(&self, handler: F) -> bool
    where
        F: FnMut(RawFrame) + Send + 'static,
    {
        self.tx
            .send(RouterCommand::SetFallback(Some(Box::new(handler))))
            .is_ok()
    }

    pub fn clear_fallback(&self) -> bool {
        self.tx.send(RouterCommand::SetFallback(None)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
