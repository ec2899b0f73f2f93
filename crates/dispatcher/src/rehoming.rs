//! 调用前后的载荷搬移
//!
//! 出站时把配置的来源搬到消息体；入站时把响应体搬到配置的目标，
//! 并在需要时恢复原始消息体、传输头与内容类型。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use mediation_core::constants::properties;
use mediation_core::{MessageContext, Payload};
use mediation_errors::{MediationError, MediationResult};

/// Where the outbound payload comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PayloadSource {
    Body,
    Property(String),
    Variable(String),
    Inline(Payload),
}

/// Where the response payload goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PayloadTarget {
    Body,
    Property(String),
    Variable(String),
}

/// Message type, content type and transport headers as they were before the
/// call touched the message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginalMessage {
    pub message_type: Option<String>,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
}

impl OriginalMessage {
    pub fn capture(ctx: &MessageContext) -> Self {
        Self {
            message_type: ctx.message_type.clone(),
            content_type: ctx.content_type.clone(),
            headers: ctx.transport_headers.clone(),
        }
    }

    /// Reads the snapshot back from the bookkeeping properties written by
    /// [`Rehoming::record`], as the response path has to.
    pub fn from_properties(ctx: &MessageContext) -> Self {
        let headers = ctx
            .get_property(properties::ORIGINAL_TRANSPORT_HEADERS)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Self {
            message_type: ctx
                .property_str(properties::ORIGINAL_MESSAGE_TYPE)
                .map(str::to_string),
            content_type: ctx
                .property_str(properties::ORIGINAL_CONTENT_TYPE)
                .map(str::to_string),
            headers,
        }
    }
}

/// Payload rehoming configured on a call mediator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rehoming {
    pub source: Option<PayloadSource>,
    pub target: Option<PayloadTarget>,
    /// Message type of the source; defaults to the message's own type
    pub source_message_type: Option<String>,
}

impl Rehoming {
    pub fn is_source_available(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_target_available(&self) -> bool {
        self.target.is_some()
    }

    fn effective_source_type<'a>(&'a self, original: &'a OriginalMessage) -> Option<&'a str> {
        self.source_message_type
            .as_deref()
            .or(original.message_type.as_deref())
    }

    /// Outbound half: the configured source becomes the request body. When a
    /// target is configured too, the current body is parked in
    /// `_INTERMEDIATE_ORIGINAL_BODY` so the response path can put it back.
    pub fn apply_outbound(
        &self,
        ctx: &mut MessageContext,
        original: &OriginalMessage,
    ) -> MediationResult<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };

        if self.target.is_some() {
            let body = ctx.payload.to_value();
            ctx.set_property(properties::INTERMEDIATE_ORIGINAL_BODY, body);
        }

        let source_type = self.effective_source_type(original).map(str::to_string);
        if *source != PayloadSource::Body {
            let payload = read_source(ctx, source, source_type.as_deref())?;
            ctx.payload = payload;
        }

        if let Some(source_type) = source_type.as_deref() {
            if !same_type(Some(source_type), original.message_type.as_deref()) {
                debug!("出站载荷类型切换为 {}", source_type);
                ctx.set_content_type(source_type, source_type);
            }
        }
        Ok(())
    }

    /// Writes the bookkeeping properties the response path reads.
    pub fn record(&self, ctx: &mut MessageContext, original: &OriginalMessage) {
        if let Some(target) = &self.target {
            if let Ok(target) = serde_json::to_value(target) {
                ctx.set_property(properties::TARGET_FOR_INBOUND_PAYLOAD, target);
            }
        }
        if let Some(source_type) = self.effective_source_type(original) {
            ctx.set_property(properties::SOURCE_MESSAGE_TYPE, source_type);
        }
        match &original.message_type {
            Some(message_type) => ctx.set_property(properties::ORIGINAL_MESSAGE_TYPE, message_type.as_str()),
            None => {
                ctx.remove_property(properties::ORIGINAL_MESSAGE_TYPE);
            }
        }
        match &original.content_type {
            Some(content_type) => ctx.set_property(properties::ORIGINAL_CONTENT_TYPE, content_type.as_str()),
            None => {
                ctx.remove_property(properties::ORIGINAL_CONTENT_TYPE);
            }
        }
        ctx.set_property(properties::IS_SOURCE_AVAILABLE, self.is_source_available());
        ctx.set_property(properties::IS_TARGET_AVAILABLE, self.is_target_available());
        if let Ok(headers) = serde_json::to_value(&original.headers) {
            ctx.set_property(properties::ORIGINAL_TRANSPORT_HEADERS, headers);
        }
    }

    /// Inbound half, run on the response: the response body goes to the
    /// target, and with a source configured the parked original body comes
    /// back along with the original headers and content type.
    pub fn apply_inbound(
        &self,
        response: &mut MessageContext,
        original: &OriginalMessage,
    ) -> MediationResult<()> {
        let Some(target) = &self.target else {
            return Ok(());
        };

        let response_body = response.payload.clone();
        write_target(response, target, response_body);

        if self.source.is_some() {
            let parked = response
                .remove_property(properties::INTERMEDIATE_ORIGINAL_BODY)
                .unwrap_or(Value::Null);
            response.payload = Payload::from_value(parked, original.message_type.as_deref());
            response.transport_headers = original.headers.clone();

            let source_type = self.effective_source_type(original);
            if !same_type(source_type, original.message_type.as_deref()) {
                if let Some(message_type) = original.message_type.as_deref() {
                    let content_type = original.content_type.as_deref().unwrap_or(message_type);
                    response.set_content_type(message_type, content_type);
                }
            }
        }
        Ok(())
    }
}

fn same_type(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

fn read_source(
    ctx: &MessageContext,
    source: &PayloadSource,
    message_type: Option<&str>,
) -> MediationResult<Payload> {
    let value = match source {
        PayloadSource::Body => return Ok(ctx.payload.clone()),
        PayloadSource::Inline(payload) => return Ok(payload.clone()),
        PayloadSource::Property(name) => ctx.get_property(name),
        PayloadSource::Variable(name) => ctx.get_variable(name),
    };
    let value = value.cloned().ok_or_else(|| {
        MediationError::Internal(format!("出站载荷来源不存在: {source:?}"))
    })?;
    Ok(Payload::from_value(value, message_type))
}

fn write_target(ctx: &mut MessageContext, target: &PayloadTarget, payload: Payload) {
    match target {
        PayloadTarget::Body => ctx.set_payload(payload),
        PayloadTarget::Property(name) => ctx.set_property(name.as_str(), payload.to_value()),
        PayloadTarget::Variable(name) => ctx.set_variable(name.as_str(), payload.to_value()),
    }
}
