use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::content_types;

/// Message body handle. Payload tree manipulation belongs to the content
/// handlers; the dispatch core only moves bodies around whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Xml(String),
    Text(String),
}

impl Payload {
    pub fn json(value: Value) -> Self {
        Payload::Json(value)
    }

    pub fn xml<S: Into<String>>(xml: S) -> Self {
        Payload::Xml(xml.into())
    }

    pub fn text<S: Into<String>>(text: S) -> Self {
        Payload::Text(text.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// Default content type for the payload variant
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Payload::Empty => None,
            Payload::Json(_) => Some(content_types::JSON),
            Payload::Xml(_) => Some(content_types::XML),
            Payload::Text(_) => Some(content_types::TEXT),
        }
    }

    /// Value view used when a payload is stored into a property or variable
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Empty => Value::Null,
            Payload::Json(value) => value.clone(),
            Payload::Xml(xml) => Value::String(xml.clone()),
            Payload::Text(text) => Value::String(text.clone()),
        }
    }

    /// Rebuild a payload from a stored value, guided by the message type it
    /// was stored under.
    pub fn from_value(value: Value, message_type: Option<&str>) -> Self {
        let is_xml = message_type
            .map(|t| t.contains("xml"))
            .unwrap_or(false);
        match value {
            Value::Null => Payload::Empty,
            Value::String(s) if is_xml => Payload::Xml(s),
            Value::String(s) if message_type == Some(content_types::TEXT) => Payload::Text(s),
            other => Payload::Json(other),
        }
    }

    /// XML fragment for nesting under an aggregation root. Declarations are
    /// dropped; non-XML bodies are escaped into text nodes.
    pub fn to_xml_fragment(&self) -> String {
        match self {
            Payload::Empty => String::new(),
            Payload::Xml(xml) => strip_xml_declaration(xml).to_string(),
            Payload::Text(text) => escape_xml(text),
            Payload::Json(value) => escape_xml(&value.to_string()),
        }
    }
}

fn strip_xml_declaration(xml: &str) -> &str {
    let trimmed = xml.trim();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
