use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 端点策略的兜底值。端点定义未声明，或动态表达式求值失败时使用。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointDefaults {
    pub initial_suspend_ms: u64,
    pub progression_factor: f64,
    pub maximum_suspend_ms: u64,
    pub retries_before_suspension: u32,
    pub retry_delay_ms: u64,
    /// 单次发送超时，`None` 表示不限制
    pub timeout_ms: Option<u64>,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self {
            initial_suspend_ms: 30_000,
            progression_factor: 1.0,
            maximum_suspend_ms: 86_400_000,
            retries_before_suspension: 0,
            retry_delay_ms: 0,
            timeout_ms: None,
        }
    }
}

impl ConfigValidator for EndpointDefaults {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_progression_factor(
            self.progression_factor,
            "dispatch.endpoint_defaults.progression_factor",
        )?;
        if self.maximum_suspend_ms < self.initial_suspend_ms {
            return Err(crate::ConfigError::Validation(
                "dispatch.endpoint_defaults.maximum_suspend_ms must be >= initial_suspend_ms"
                    .to_string(),
            ));
        }
        if let Some(timeout) = self.timeout_ms {
            ValidationUtils::validate_positive_ms(timeout, "dispatch.endpoint_defaults.timeout_ms")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub endpoint_defaults: EndpointDefaults,
}

impl ConfigValidator for DispatchConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.endpoint_defaults.validate()
    }
}
