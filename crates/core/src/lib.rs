pub mod constants;
pub mod models;
pub mod policy_value;
pub mod traits;

pub use models::{
    ContinuationFrame, ContinuationStack, FaultHandler, FaultHandlerChain, MessageContext,
    Payload, SequenceType,
};
pub use policy_value::PolicyValue;
pub use traits::{ExpressionError, ExpressionEvaluator, Mediator, PropertyLookupEvaluator};

pub use mediation_errors::{MediationError, MediationResult};
