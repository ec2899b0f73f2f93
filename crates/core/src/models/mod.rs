pub mod continuation;
pub mod fault_handler;
pub mod message_context;
pub mod payload;

pub use continuation::{ContinuationFrame, ContinuationStack, SequenceType};
pub use fault_handler::{FaultHandler, FaultHandlerChain};
pub use message_context::MessageContext;
pub use payload::Payload;
