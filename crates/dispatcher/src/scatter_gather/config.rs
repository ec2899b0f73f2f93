use std::sync::Arc;

use serde::{Deserialize, Serialize};

use mediation_config::ScatterGatherDefaults;
use mediation_core::{Mediator, PolicyValue};
use mediation_errors::{MediationError, MediationResult};

/// 聚合结果的内容类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AggregateContentType {
    Json,
    /// XML 聚合必须指定根元素
    Xml { root_element: String },
}

/// 聚合结果的放置位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum ResultTarget {
    Body,
    Variable(String),
}

/// 聚合策略，数值字段支持字面量或表达式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPolicy {
    /// 每个分支贡献的值；未设置时使用分支消息体
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<PolicyValue<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_messages: Option<PolicyValue<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<PolicyValue<u32>>,
}

/// A scatter-gather branch
#[derive(Clone)]
pub struct Target {
    pub id: Option<String>,
    pub sequence: Arc<dyn Mediator>,
    pub asynchronous: bool,
}

impl Target {
    pub fn new(sequence: Arc<dyn Mediator>) -> Self {
        Self {
            id: None,
            sequence,
            asynchronous: true,
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("sequence", &self.sequence.name())
            .field("asynchronous", &self.asynchronous)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ScatterGatherConfig {
    pub parallel_execution: bool,
    pub content_type: AggregateContentType,
    pub result_target: ResultTarget,
    pub targets: Vec<Target>,
    pub aggregation: AggregationPolicy,
    /// 聚合策略未声明超时时使用
    pub default_timeout_ms: Option<u64>,
}

impl ScatterGatherConfig {
    pub fn new(content_type: AggregateContentType, result_target: ResultTarget) -> Self {
        Self::from_defaults(&ScatterGatherDefaults::default(), content_type, result_target)
    }

    pub fn from_defaults(
        defaults: &ScatterGatherDefaults,
        content_type: AggregateContentType,
        result_target: ResultTarget,
    ) -> Self {
        Self {
            parallel_execution: defaults.parallel_execution,
            content_type,
            result_target,
            targets: Vec::new(),
            aggregation: AggregationPolicy::default(),
            default_timeout_ms: defaults.timeout_ms,
        }
    }

    /// 添加分支；分支的异步标记跟随执行模式
    pub fn with_target(mut self, mut target: Target) -> Self {
        target.asynchronous = self.parallel_execution;
        self.targets.push(target);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel_execution = false;
        for target in &mut self.targets {
            target.asynchronous = false;
        }
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationPolicy) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// 构造期校验，分发期不再检查
    pub fn validate(&self) -> MediationResult<()> {
        if self.targets.is_empty() {
            return Err(MediationError::config_error(
                "scatter-gather 至少需要一个分支序列",
            ));
        }
        if let AggregateContentType::Xml { root_element } = &self.content_type {
            if !is_xml_name(root_element) {
                return Err(MediationError::config_error(format!(
                    "XML 聚合需要合法的根元素名称: '{root_element}'"
                )));
            }
        }
        if let ResultTarget::Variable(name) = &self.result_target {
            if name.trim().is_empty() {
                return Err(MediationError::config_error(
                    "scatter-gather 结果变量名不能为空",
                ));
            }
        }

        let aggregation = &self.aggregation;
        if let (Some(min), Some(max)) = (
            aggregation.min_messages.as_ref().and_then(PolicyValue::as_literal),
            aggregation.max_messages.as_ref().and_then(PolicyValue::as_literal),
        ) {
            if min > max {
                return Err(MediationError::config_error(format!(
                    "min-messages ({min}) 大于 max-messages ({max})"
                )));
            }
        }
        if let Some(0) = aggregation.timeout_ms.as_ref().and_then(PolicyValue::as_literal) {
            return Err(MediationError::config_error("聚合超时必须大于0"));
        }
        Ok(())
    }
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}
