use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::traits::Mediator;

/// A recovery sequence registered on a message. Identity is the `id`, so the
/// same sequence pushed twice yields two distinct handlers.
#[derive(Clone)]
pub struct FaultHandler {
    id: Uuid,
    name: String,
    sequence: Arc<dyn Mediator>,
}

impl FaultHandler {
    pub fn new<S: Into<String>>(name: S, sequence: Arc<dyn Mediator>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sequence,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> Arc<dyn Mediator> {
        Arc::clone(&self.sequence)
    }
}

impl fmt::Debug for FaultHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultHandler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("sequence", &self.sequence.name())
            .finish()
    }
}

/// Fault handlers in registration order; the head is the most recently pushed.
#[derive(Debug, Clone, Default)]
pub struct FaultHandlerChain {
    handlers: Vec<FaultHandler>,
}

impl FaultHandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: FaultHandler) {
        self.handlers.push(handler);
    }

    pub fn pop(&mut self) -> Option<FaultHandler> {
        self.handlers.pop()
    }

    pub fn head(&self) -> Option<&FaultHandler> {
        self.handlers.last()
    }

    /// Identity of the head, used to detect a fault sequence firing during a call
    pub fn head_id(&self) -> Option<Uuid> {
        self.handlers.last().map(FaultHandler::id)
    }

    /// Removes the handler with `id` if it is still the head
    pub fn pop_if_head(&mut self, id: Uuid) -> bool {
        if self.head_id() == Some(id) {
            self.handlers.pop();
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
