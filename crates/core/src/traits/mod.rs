pub mod expression;
pub mod mediator;

pub use expression::*;
pub use mediator::*;
