//! Dynamic handler registry: at most one feature handler per message tag.

use std::collections::HashMap;

use tracing::debug;

use canvas_link_core::protocol::{InboundMessage, MessageTag, Payload};

/// Type-erased handler. Built only through [`boxed_handler`], which pins the
/// tag to the handler's payload type.
pub type BoxedHandler = Box<dyn FnMut(InboundMessage) + Send>;

/// Erase a typed handler for payload `P`.
pub fn boxed_handler<P, F>(mut handler: F) -> BoxedHandler
where
    P: Payload,
    F: FnMut(P) + Send + 'static,
{
    Box::new(move |message| {
        if let Some(payload) = P::from_message(message) {
            handler(payload);
        }
    })
}

/// Handlers owned by whichever feature modules are currently mounted.
///
/// Mutated only by the routing context; no locking.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageTag, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `P::TAG`, replacing any previous handler.
    /// Returns true when a handler was replaced.
    pub fn register<P, F>(&mut self, handler: F) -> bool
    where
        P: Payload,
        F: FnMut(P) + Send + 'static,
    {
        self.insert(P::TAG, boxed_handler(handler))
    }

    pub(crate) fn insert(&mut self, tag: MessageTag, handler: BoxedHandler) -> bool {
        let replaced = self.handlers.insert(tag, handler).is_some();
        debug!(%tag, replaced, "Registered handler");
        replaced
    }

    /// Remove the handler for `tag`. Returns true if one was registered.
    pub fn unregister(&mut self, tag: MessageTag) -> bool {
        let removed = self.handlers.remove(&tag).is_some();
        debug!(%tag, removed, "Unregistered handler");
        removed
    }

    pub fn contains(&self, tag: MessageTag) -> bool {
        self.handlers.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler for the message's tag. Gives the message back when
    /// no handler is registered.
    pub(crate) fn dispatch(&mut self, message: InboundMessage) -> Result<(), InboundMessage> {
        match self.handlers.get_mut(&message.tag()) {
            Some(handler) => {
                handler(message);
                Ok(())
            }
            None => Err(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use canvas_link_core::protocol::{ImportComplete, LlmStream};

    use super::*;

    #[test]
    fn test_register_replaces_previous() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        let first = calls.clone();
        assert!(!registry.register(move |p: ImportComplete| {
            first.lock().unwrap().push(format!("first:{}", p.message))
        }));
        let second = calls.clone();
        assert!(registry.register(move |p: ImportComplete| {
            second.lock().unwrap().push(format!("second:{}", p.message))
        }));
        assert_eq!(registry.len(), 1);

        let message = InboundMessage::ImportComplete(ImportComplete {
            message: "done".into(),
        });
        assert!(registry.dispatch(message).is_ok());
        assert_eq!(*calls.lock().unwrap(), vec!["second:done".to_string()]);
    }

    #[test]
    fn test_unregister_returns_message() {
        let mut registry = HandlerRegistry::new();
        registry.register(|_: LlmStream| {});
        assert!(registry.contains(MessageTag::LlmStream));

        assert!(registry.unregister(MessageTag::LlmStream));
        assert!(!registry.unregister(MessageTag::LlmStream));
        assert!(registry.is_empty());

        let message = InboundMessage::LlmStream(LlmStream::default());
        assert!(registry.dispatch(message).is_err());
    }
}
