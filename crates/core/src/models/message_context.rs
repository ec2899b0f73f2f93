use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::{headers, properties};
use crate::models::{ContinuationStack, FaultHandlerChain, Payload};
use crate::MediationResult;

/// Per-message mutable state. Owned by the in-flight flow; branches and
/// out-only sends work on a [`MessageContext::fork`].
#[derive(Debug, Clone)]
pub struct MessageContext {
    id: Uuid,
    properties: HashMap<String, Value>,
    variables: HashMap<String, Value>,
    pub payload: Payload,
    pub transport_headers: HashMap<String, String>,
    pub message_type: Option<String>,
    pub content_type: Option<String>,
    pub continuation: ContinuationStack,
    pub fault_handlers: FaultHandlerChain,
    pub response: bool,
    /// Implicit destination used when a call has no endpoint configured
    pub to: Option<String>,
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            properties: HashMap::new(),
            variables: HashMap::new(),
            payload: Payload::Empty,
            transport_headers: HashMap::new(),
            message_type: None,
            content_type: None,
            continuation: ContinuationStack::new(),
            fault_handlers: FaultHandlerChain::new(),
            response: false,
            to: None,
        }
    }

    /// New context carrying `payload`, with message type and content type
    /// taken from the payload variant.
    pub fn with_payload(payload: Payload) -> Self {
        let mut ctx = Self::new();
        ctx.set_payload(payload);
        ctx
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Boolean view of a property; accepts `true` and the string `"true"`.
    pub fn property_bool(&self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn property_keys(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    pub fn is_out_only(&self) -> bool {
        self.property_bool(properties::OUT_ONLY)
    }

    pub fn set_out_only(&mut self, out_only: bool) {
        self.set_property(properties::OUT_ONLY, out_only);
    }

    /// Replaces the body and switches message/content type to the payload's own.
    pub fn set_payload(&mut self, payload: Payload) {
        if let Some(content_type) = payload.content_type() {
            self.message_type = Some(content_type.to_string());
            self.content_type = Some(content_type.to_string());
        }
        self.payload = payload;
    }

    pub fn take_payload(&mut self) -> Payload {
        std::mem::take(&mut self.payload)
    }

    /// Switches message type and content type, mirroring the content type
    /// into the transport headers.
    pub fn set_content_type(&mut self, message_type: &str, content_type: &str) {
        self.message_type = Some(message_type.to_string());
        self.content_type = Some(content_type.to_string());
        self.transport_headers
            .insert(headers::CONTENT_TYPE.to_string(), content_type.to_string());
    }

    /// Drops bookkeeping left behind by the previous endpoint invocation.
    pub fn clear_per_call_properties(&mut self) {
        for key in properties::PER_CALL_KEYS {
            self.properties.remove(key);
        }
    }

    /// Attaches a classified failure to the message.
    pub fn set_error(&mut self, code: i32, message: &str, detail: Option<&str>) {
        self.set_property(properties::ERROR_CODE, code);
        self.set_property(properties::ERROR_MESSAGE, message);
        match detail {
            Some(detail) => self.set_property(properties::ERROR_DETAIL, detail),
            None => {
                self.remove_property(properties::ERROR_DETAIL);
            }
        }
    }

    pub fn error_code(&self) -> Option<i32> {
        self.properties
            .get(properties::ERROR_CODE)
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
    }

    /// Copy of this message under a fresh id. Properties, body, continuation
    /// and fault handlers are carried over.
    pub fn fork(&self) -> Self {
        let mut clone = self.clone();
        clone.id = Uuid::new_v4();
        clone
    }

    /// Pops the head of the fault-handler chain and runs its sequence on this
    /// message. Returns `Ok(false)` when no handler is registered.
    ///
    /// Outstanding continuation frames are abandoned: the fault sequence takes
    /// over the flow.
    pub async fn handle_fault(&mut self) -> MediationResult<bool> {
        let Some(handler) = self.fault_handlers.pop() else {
            warn!("消息 {} 没有可用的故障处理器", self.id);
            return Ok(false);
        };
        debug!(
            "消息 {} 进入故障序列: {} (handler={})",
            self.id,
            handler.name(),
            handler.id()
        );
        self.continuation.clear();
        handler.sequence().mediate(self).await?;
        Ok(true)
    }
}
