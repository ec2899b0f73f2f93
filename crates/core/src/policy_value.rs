//! Literal-or-expression policy fields.
//!
//! A policy field is either fixed at configuration time or computed from the
//! in-flight message. Serialized form: a literal serializes as itself, an
//! expression as its text wrapped in braces (`"{${props.timeout}}"`), so a
//! definition written back out preserves the expression text untouched.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use crate::models::MessageContext;
use crate::traits::ExpressionEvaluator;
use crate::{MediationError, MediationResult};

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyValue<T> {
    Literal(T),
    Expression(String),
}

impl<T> PolicyValue<T> {
    pub fn literal(value: T) -> Self {
        PolicyValue::Literal(value)
    }

    pub fn expression<S: Into<String>>(expression: S) -> Self {
        PolicyValue::Expression(expression.into())
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, PolicyValue::Expression(_))
    }

    pub fn as_literal(&self) -> Option<&T> {
        match self {
            PolicyValue::Literal(value) => Some(value),
            PolicyValue::Expression(_) => None,
        }
    }

    pub fn expression_text(&self) -> Option<&str> {
        match self {
            PolicyValue::Literal(_) => None,
            PolicyValue::Expression(expr) => Some(expr),
        }
    }
}

impl<T> PolicyValue<T>
where
    T: Clone + DeserializeOwned + FromStr,
{
    /// Resolves the field against `ctx`. Literals never touch the evaluator.
    pub fn resolve(
        &self,
        ctx: &MessageContext,
        evaluator: &dyn ExpressionEvaluator,
    ) -> MediationResult<T> {
        match self {
            PolicyValue::Literal(value) => Ok(value.clone()),
            PolicyValue::Expression(expr) => {
                let value = evaluator.evaluate(expr, ctx)?;
                convert_value(expr, value)
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but a failed evaluation degrades to
    /// `default` instead of failing the dispatch.
    pub fn resolve_or(
        &self,
        ctx: &MessageContext,
        evaluator: &dyn ExpressionEvaluator,
        default: T,
        field: &str,
    ) -> T {
        match self.resolve(ctx, evaluator) {
            Ok(value) => value,
            Err(e) => {
                warn!("策略字段 {} 解析失败，使用默认值: {}", field, e);
                default
            }
        }
    }
}

fn convert_value<T>(expr: &str, value: Value) -> MediationResult<T>
where
    T: DeserializeOwned + FromStr,
{
    if let Value::String(text) = &value {
        if let Ok(parsed) = text.trim().parse::<T>() {
            return Ok(parsed);
        }
    }
    serde_json::from_value(value.clone()).map_err(|e| {
        MediationError::expression(expr, format!("无法转换表达式结果 {value}: {e}"))
    })
}

fn unwrap_braces(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('{') && trimmed.ends_with('}') {
        Some(&trimmed[1..trimmed.len() - 1])
    } else {
        None
    }
}

impl<T: fmt::Display> fmt::Display for PolicyValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyValue::Literal(value) => write!(f, "{value}"),
            PolicyValue::Expression(expr) => write!(f, "{{{expr}}}"),
        }
    }
}

impl<T: Serialize> Serialize for PolicyValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PolicyValue::Literal(value) => value.serialize(serializer),
            PolicyValue::Expression(expr) => serializer.serialize_str(&format!("{{{expr}}}")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr<T> {
    Text(String),
    Literal(T),
}

impl<'de, T> Deserialize<'de> for PolicyValue<T>
where
    T: Deserialize<'de> + FromStr,
    <T as FromStr>::Err: fmt::Display,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Repr::<T>::deserialize(deserializer)? {
            Repr::Literal(value) => Ok(PolicyValue::Literal(value)),
            Repr::Text(text) => match unwrap_braces(&text) {
                Some(expr) => Ok(PolicyValue::Expression(expr.to_string())),
                None => text
                    .trim()
                    .parse::<T>()
                    .map(PolicyValue::Literal)
                    .map_err(serde::de::Error::custom),
            },
        }
    }
}
