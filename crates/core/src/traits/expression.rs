//! 表达式求值接口
//!
//! 表达式语言本身不属于调度核心。核心只依赖一个纯函数
//! `(表达式文本, 消息上下文) -> 值`，求值失败只影响当前字段。

use serde_json::Value;
use thiserror::Error;

use crate::models::MessageContext;
use crate::MediationError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("不支持的表达式: {0}")]
    Unsupported(String),
    #[error("表达式未解析到值: {0}")]
    NotFound(String),
    #[error("表达式结果类型不匹配: {expression} 期望 {expected}")]
    TypeMismatch {
        expression: String,
        expected: &'static str,
    },
}

impl ExpressionError {
    pub fn expression(&self) -> &str {
        match self {
            ExpressionError::Unsupported(expr) | ExpressionError::NotFound(expr) => expr,
            ExpressionError::TypeMismatch { expression, .. } => expression,
        }
    }
}

impl From<ExpressionError> for MediationError {
    fn from(err: ExpressionError) -> Self {
        MediationError::expression(err.expression().to_string(), err.to_string())
    }
}

pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, ctx: &MessageContext) -> Result<Value, ExpressionError>;

    fn evaluate_bool(&self, expression: &str, ctx: &MessageContext) -> Result<bool, ExpressionError> {
        match self.evaluate(expression, ctx)? {
            Value::Bool(b) => Ok(b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(ExpressionError::TypeMismatch {
                expression: expression.to_string(),
                expected: "boolean",
            }),
        }
    }

    fn evaluate_string(
        &self,
        expression: &str,
        ctx: &MessageContext,
    ) -> Result<String, ExpressionError> {
        match self.evaluate(expression, ctx)? {
            Value::String(s) => Ok(s),
            Value::Null => Err(ExpressionError::NotFound(expression.to_string())),
            other => Ok(other.to_string()),
        }
    }
}

/// Minimal evaluator resolving `${props.<key>}`, `${vars.<name>}`,
/// `${headers.<name>}`, `${payload}` / `${payload.<a>.<b>}` and
/// `${messageId}`. Anything else is reported as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyLookupEvaluator;

impl ExpressionEvaluator for PropertyLookupEvaluator {
    fn evaluate(&self, expression: &str, ctx: &MessageContext) -> Result<Value, ExpressionError> {
        let inner = expression
            .trim()
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| ExpressionError::Unsupported(expression.to_string()))?
            .trim();
        let not_found = || ExpressionError::NotFound(expression.to_string());

        if inner == "messageId" {
            return Ok(Value::String(ctx.id().to_string()));
        }
        if inner == "payload" {
            return match ctx.payload.to_value() {
                Value::Null => Err(not_found()),
                value => Ok(value),
            };
        }
        let (scope, path) = inner
            .split_once('.')
            .ok_or_else(|| ExpressionError::Unsupported(expression.to_string()))?;
        match scope {
            "props" => ctx.get_property(path).cloned().ok_or_else(not_found),
            "vars" => ctx.get_variable(path).cloned().ok_or_else(not_found),
            "headers" => ctx
                .transport_headers
                .get(path)
                .map(|h| Value::String(h.clone()))
                .ok_or_else(not_found),
            "payload" => {
                let root = ctx.payload.to_value();
                path.split('.')
                    .try_fold(&root, |node, segment| node.get(segment))
                    .cloned()
                    .ok_or_else(not_found)
            }
            _ => Err(ExpressionError::Unsupported(expression.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use serde_json::json;

    #[test]
    fn test_property_lookup_scopes() {
        let mut ctx = MessageContext::with_payload(Payload::json(json!({"order": {"id": 42}})));
        ctx.set_property("region", "eu");
        ctx.set_variable("attempt", 2);
        ctx.transport_headers
            .insert("X-Correlation".to_string(), "abc".to_string());

        let eval = PropertyLookupEvaluator;
        assert_eq!(eval.evaluate("${props.region}", &ctx).unwrap(), json!("eu"));
        assert_eq!(eval.evaluate("${vars.attempt}", &ctx).unwrap(), json!(2));
        assert_eq!(
            eval.evaluate_string("${headers.X-Correlation}", &ctx).unwrap(),
            "abc"
        );
        assert_eq!(eval.evaluate("${payload.order.id}", &ctx).unwrap(), json!(42));
        assert_eq!(
            eval.evaluate_string("${messageId}", &ctx).unwrap(),
            ctx.id().to_string()
        );
    }

    #[test]
    fn test_unknown_expression_is_an_error() {
        let ctx = MessageContext::new();
        let eval = PropertyLookupEvaluator;
        assert!(matches!(
            eval.evaluate("//order/id", &ctx),
            Err(ExpressionError::Unsupported(_))
        ));
        assert!(matches!(
            eval.evaluate("${props.none}", &ctx),
            Err(ExpressionError::NotFound(_))
        ));
    }

    #[test]
    fn test_evaluate_bool_rejects_non_boolean() {
        let mut ctx = MessageContext::new();
        ctx.set_property("done", "TRUE");
        ctx.set_property("count", 3);
        let eval = PropertyLookupEvaluator;
        assert!(eval.evaluate_bool("${props.done}", &ctx).unwrap());
        assert!(eval.evaluate_bool("${props.count}", &ctx).is_err());
    }

    #[test]
    fn test_expression_error_converts_to_mediation_error() {
        let err: MediationError = ExpressionError::NotFound("${vars.x}".to_string()).into();
        assert!(matches!(err, MediationError::Expression { .. }));
    }
}
