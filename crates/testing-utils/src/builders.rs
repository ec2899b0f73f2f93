//! Test data builders
//!
//! Builders for message contexts and endpoint definitions with sensible
//! defaults and easy customization.

use mediation_core::{
    ContinuationFrame, FaultHandler, Mediator, MessageContext, Payload, PolicyValue, SequenceType,
};
use mediation_endpoint::{
    EndpointDefinition, ErrorCodeList, MarkForSuspension, RetryConfig, SuspendOnFailure,
    TimeoutAction, TimeoutPolicy,
};
use serde_json::Value;
use std::sync::Arc;

/// Builder for in-flight messages
pub struct MessageContextBuilder {
    ctx: MessageContext,
}

impl MessageContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: MessageContext::new(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.ctx.set_payload(payload);
        self
    }

    pub fn with_json(self, value: Value) -> Self {
        self.with_payload(Payload::json(value))
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.ctx.set_property(key, value);
        self
    }

    pub fn with_variable(mut self, name: &str, value: Value) -> Self {
        self.ctx.set_variable(name, value);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.ctx
            .transport_headers
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_destination(mut self, to: &str) -> Self {
        self.ctx.to = Some(to.to_string());
        self
    }

    pub fn out_only(mut self) -> Self {
        self.ctx.set_out_only(true);
        self
    }

    /// Pushes a frame as an enclosing sequence would before running its children
    pub fn in_sequence(mut self, name: &str, position: usize) -> Self {
        self.ctx
            .continuation
            .push(ContinuationFrame::new(SequenceType::Named, name).resume_at(position));
        self
    }

    pub fn with_fault_handler(mut self, name: &str, sequence: Arc<dyn Mediator>) -> Self {
        self.ctx.fault_handlers.push(FaultHandler::new(name, sequence));
        self
    }

    pub fn build(self) -> MessageContext {
        self.ctx
    }
}

impl Default for MessageContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for endpoint policies. Every numeric field is set as a literal
/// unless the `*_expr` variant is used.
pub struct EndpointDefinitionBuilder {
    definition: EndpointDefinition,
}

impl EndpointDefinitionBuilder {
    pub fn new(address: &str) -> Self {
        Self {
            definition: EndpointDefinition::with_address(address),
        }
    }

    /// Definition for endpoints that send to the message's own destination
    pub fn implicit() -> Self {
        Self {
            definition: EndpointDefinition::default(),
        }
    }

    fn suspend(&mut self) -> &mut SuspendOnFailure {
        self.definition
            .suspend_on_failure
            .get_or_insert_with(SuspendOnFailure::default)
    }

    fn mark(&mut self) -> &mut MarkForSuspension {
        self.definition
            .mark_for_suspension
            .get_or_insert_with(MarkForSuspension::default)
    }

    fn timeout(&mut self) -> &mut TimeoutPolicy {
        self.definition
            .timeout
            .get_or_insert_with(TimeoutPolicy::default)
    }

    pub fn with_suspension(mut self, initial_ms: u64, progression: f64, maximum_ms: u64) -> Self {
        let suspend = self.suspend();
        suspend.initial_duration_ms = Some(PolicyValue::literal(initial_ms));
        suspend.progression_factor = Some(PolicyValue::literal(progression));
        suspend.maximum_duration_ms = Some(PolicyValue::literal(maximum_ms));
        self
    }

    pub fn with_suspend_codes(mut self, codes: Vec<i32>) -> Self {
        self.suspend().error_codes = Some(PolicyValue::literal(ErrorCodeList(codes)));
        self
    }

    pub fn with_initial_suspend_expr(mut self, expression: &str) -> Self {
        self.suspend().initial_duration_ms = Some(PolicyValue::expression(expression));
        self
    }

    pub fn with_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        let mark = self.mark();
        mark.retries_before_suspension = Some(PolicyValue::literal(retries));
        mark.retry_delay_ms = Some(PolicyValue::literal(delay_ms));
        self
    }

    pub fn with_mark_codes(mut self, codes: Vec<i32>) -> Self {
        self.mark().error_codes = Some(PolicyValue::literal(ErrorCodeList(codes)));
        self
    }

    pub fn with_timeout(mut self, duration_ms: u64, action: TimeoutAction) -> Self {
        let timeout = self.timeout();
        timeout.duration_ms = Some(PolicyValue::literal(duration_ms));
        timeout.response_action = Some(PolicyValue::literal(action));
        self
    }

    pub fn with_retry_disabled(mut self, codes: Vec<i32>) -> Self {
        self.definition.retry_config = Some(RetryConfig {
            disabled_error_codes: codes,
            enabled_error_codes: Vec::new(),
        });
        self
    }

    pub fn with_retry_enabled(mut self, codes: Vec<i32>) -> Self {
        self.definition.retry_config = Some(RetryConfig {
            disabled_error_codes: Vec::new(),
            enabled_error_codes: codes,
        });
        self
    }

    pub fn build(self) -> EndpointDefinition {
        self.definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_builder() {
        let ctx = MessageContextBuilder::new()
            .with_json(json!({"id": 1}))
            .with_property("customer", json!("acme"))
            .in_sequence("main", 2)
            .out_only()
            .build();

        assert_eq!(ctx.payload, Payload::json(json!({"id": 1})));
        assert_eq!(ctx.property_str("customer"), Some("acme"));
        assert_eq!(ctx.continuation.peek().map(|f| f.position), Some(2));
        assert!(ctx.is_out_only());
    }

    #[test]
    fn test_definition_builder_is_valid() {
        let definition = EndpointDefinitionBuilder::new("http://localhost/quote")
            .with_suspension(1000, 2.0, 8000)
            .with_retries(2, 10)
            .with_retry_disabled(vec![101504])
            .build();

        assert!(definition.validate().is_ok());
        assert!(!definition.retry_config().is_retry_eligible(101504));
    }
}
