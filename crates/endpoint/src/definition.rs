//! 端点定义
//!
//! 声明式的端点策略：寻址、安全、超时、挂起与重试。定义在构造后不可变，
//! 运行期状态全部在 [`EndpointHealth`](crate::health::EndpointHealth) 中维护。
//!
//! 数值类字段均为 [`PolicyValue`]，可以是字面量，也可以是在发送时针对
//! 当前消息求值的表达式。序列化时表达式以 `{expr}` 形式原样写回。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mediation_core::PolicyValue;
use mediation_errors::{MediationError, MediationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Soap11,
    Soap12,
    Pox,
    Get,
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimize {
    Mtom,
    Swa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingVersion {
    #[default]
    Final,
    Submission,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AddressingPolicy {
    #[serde(default)]
    pub version: AddressingVersion,
    #[serde(default)]
    pub separate_listener: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Policy key, may be resolved per message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyValue<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_policy: Option<String>,
}

/// What happens to a message whose endpoint call timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutAction {
    #[default]
    Never,
    Discard,
    Fault,
}

impl FromStr for TimeoutAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "never" | "none" => Ok(TimeoutAction::Never),
            "discard" => Ok(TimeoutAction::Discard),
            "fault" => Ok(TimeoutAction::Fault),
            other => Err(format!(
                "Invalid timeout action, action : {other} is not supported"
            )),
        }
    }
}

impl fmt::Display for TimeoutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutAction::Never => write!(f, "never"),
            TimeoutAction::Discard => write!(f, "discard"),
            TimeoutAction::Fault => write!(f, "fault"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<PolicyValue<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_action: Option<PolicyValue<TimeoutAction>>,
}

/// Comma separated list of classified error codes, e.g. `"101503, 101504"`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCodeList(pub Vec<i32>);

impl ErrorCodeList {
    pub fn contains(&self, code: i32) -> bool {
        self.0.contains(&code)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ErrorCodeList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<i32>().map_err(|_| {
                    format!(
                        "The error codes should be specified as valid numbers separated by commas : {s}"
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ErrorCodeList)
    }
}

impl fmt::Display for ErrorCodeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(i32::to_string).collect();
        write!(f, "{}", joined.join(","))
    }
}

impl From<Vec<i32>> for ErrorCodeList {
    fn from(codes: Vec<i32>) -> Self {
        ErrorCodeList(codes)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SuspendOnFailure {
    /// Codes that suspend the endpoint without a retrying phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<PolicyValue<ErrorCodeList>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_duration_ms: Option<PolicyValue<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression_factor: Option<PolicyValue<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_duration_ms: Option<PolicyValue<u64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkForSuspension {
    /// Codes counted towards suspension; empty counts every retry-eligible code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<PolicyValue<ErrorCodeList>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries_before_suspension: Option<PolicyValue<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<PolicyValue<u64>>,
}

/// Either the disabled or the enabled set may be given, never both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_error_codes: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_error_codes: Vec<i32>,
}

impl RetryConfig {
    /// A code may be retried when it is in the enabled set, or, with no
    /// enabled set, when it is not listed as disabled.
    pub fn is_retry_eligible(&self, code: i32) -> bool {
        if !self.enabled_error_codes.is_empty() {
            self.enabled_error_codes.contains(&code)
        } else {
            !self.disabled_error_codes.contains(&code)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EndpointDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<MessageFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<Optimize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addressing: Option<AddressingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_on_failure: Option<SuspendOnFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_for_suspension: Option<MarkForSuspension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,
}

impl EndpointDefinition {
    pub fn with_address<S: Into<String>>(address: S) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn is_addressing_on(&self) -> bool {
        self.addressing.is_some()
    }

    pub fn is_security_on(&self) -> bool {
        self.security.is_some()
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry_config.clone().unwrap_or_default()
    }

    /// Checks the literal parts of the policy. Expression fields are only
    /// known at dispatch time and are checked then.
    pub fn validate(&self) -> MediationResult<()> {
        if let Some(timeout) = &self.timeout {
            if let Some(PolicyValue::Literal(0)) = timeout.duration_ms {
                return Err(MediationError::config_error(
                    "Endpoint timeout duration must be greater than 0",
                ));
            }
        }

        if let Some(suspend) = &self.suspend_on_failure {
            if let Some(PolicyValue::Literal(factor)) = suspend.progression_factor {
                if !factor.is_finite() || factor < 1.0 {
                    return Err(MediationError::config_error(format!(
                        "Suspend progression factor must be >= 1.0, got {factor}"
                    )));
                }
            }
            if let (Some(PolicyValue::Literal(initial)), Some(PolicyValue::Literal(maximum))) =
                (&suspend.initial_duration_ms, &suspend.maximum_duration_ms)
            {
                if maximum < initial {
                    return Err(MediationError::config_error(format!(
                        "Suspend maximum duration {maximum}ms is below the initial duration {initial}ms"
                    )));
                }
            }
        }

        if let Some(retry) = &self.retry_config {
            if !retry.disabled_error_codes.is_empty() && !retry.enabled_error_codes.is_empty() {
                return Err(MediationError::config_error(
                    "retry_config accepts either disabled_error_codes or enabled_error_codes, not both",
                ));
            }
        }

        if let Some(security) = &self.security {
            if let Some(PolicyValue::Literal(key)) = &security.policy {
                if key.trim().is_empty() {
                    return Err(MediationError::config_error(
                        "Security policy key cannot be empty",
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn from_json(value: serde_json::Value) -> MediationResult<Self> {
        let definition: EndpointDefinition = serde_json::from_value(value)?;
        definition.validate()?;
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy_definition() -> EndpointDefinition {
        EndpointDefinition {
            address: Some("http://localhost:9000/services/StockQuote".to_string()),
            format: Some(MessageFormat::Soap11),
            optimize: Some(Optimize::Mtom),
            charset_encoding: Some("UTF-8".to_string()),
            addressing: Some(AddressingPolicy {
                version: AddressingVersion::Submission,
                separate_listener: true,
            }),
            security: Some(SecurityPolicy {
                policy: Some(PolicyValue::expression("${props.policyKey}")),
                inbound_policy: None,
                outbound_policy: Some("conf:/policy/out.xml".to_string()),
            }),
            timeout: Some(TimeoutPolicy {
                duration_ms: Some(PolicyValue::expression("${props.timeout}")),
                response_action: Some(PolicyValue::literal(TimeoutAction::Fault)),
            }),
            suspend_on_failure: Some(SuspendOnFailure {
                error_codes: Some(PolicyValue::literal(vec![101503].into())),
                initial_duration_ms: Some(PolicyValue::literal(1000)),
                progression_factor: Some(PolicyValue::expression("${vars.factor}")),
                maximum_duration_ms: Some(PolicyValue::literal(60_000)),
            }),
            mark_for_suspension: Some(MarkForSuspension {
                error_codes: Some(PolicyValue::expression("${props.timeoutCodes}")),
                retries_before_suspension: Some(PolicyValue::literal(3)),
                retry_delay_ms: Some(PolicyValue::literal(10)),
            }),
            retry_config: Some(RetryConfig {
                disabled_error_codes: vec![101504, 101505],
                enabled_error_codes: vec![],
            }),
        }
    }

    #[test]
    fn test_json_round_trip_preserves_expressions() {
        let definition = policy_definition();
        let json = serde_json::to_value(&definition).unwrap();

        assert_eq!(json["timeout"]["duration_ms"], json!("{${props.timeout}}"));
        assert_eq!(json["timeout"]["response_action"], json!("fault"));
        assert_eq!(
            json["suspend_on_failure"]["progression_factor"],
            json!("{${vars.factor}}")
        );

        let parsed = EndpointDefinition::from_json(json).unwrap();
        assert_eq!(parsed, definition);
    }

    #[test]
    fn test_toml_round_trip_preserves_expressions() {
        let definition = policy_definition();
        let text = toml::to_string(&definition).unwrap();
        assert!(text.contains("{${props.timeout}}"));

        let parsed: EndpointDefinition = toml::from_str(&text).unwrap();
        assert_eq!(parsed, definition);
    }

    #[test]
    fn test_error_codes_accept_comma_text() {
        let definition: EndpointDefinition = serde_json::from_value(json!({
            "mark_for_suspension": { "error_codes": "101503, 101504", "retries_before_suspension": "2" }
        }))
        .unwrap();
        let mark = definition.mark_for_suspension.unwrap();
        assert_eq!(
            mark.error_codes,
            Some(PolicyValue::literal(ErrorCodeList(vec![101503, 101504])))
        );
        assert_eq!(mark.retries_before_suspension, Some(PolicyValue::literal(2)));
    }

    #[test]
    fn test_invalid_timeout_action_rejected() {
        let result: Result<EndpointDefinition, _> = serde_json::from_value(json!({
            "timeout": { "response_action": "retry" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_both_retry_sets() {
        let definition = EndpointDefinition {
            retry_config: Some(RetryConfig {
                disabled_error_codes: vec![101504],
                enabled_error_codes: vec![101503],
            }),
            ..EndpointDefinition::default()
        };
        assert!(matches!(
            definition.validate(),
            Err(MediationError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_shrinking_suspend_policy() {
        let definition = EndpointDefinition {
            suspend_on_failure: Some(SuspendOnFailure {
                progression_factor: Some(PolicyValue::literal(0.5)),
                ..SuspendOnFailure::default()
            }),
            ..EndpointDefinition::default()
        };
        assert!(definition.validate().is_err());

        let definition = EndpointDefinition {
            suspend_on_failure: Some(SuspendOnFailure {
                initial_duration_ms: Some(PolicyValue::literal(5000)),
                maximum_duration_ms: Some(PolicyValue::literal(1000)),
                ..SuspendOnFailure::default()
            }),
            ..EndpointDefinition::default()
        };
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_retry_eligibility() {
        let disabled = RetryConfig {
            disabled_error_codes: vec![101504],
            enabled_error_codes: vec![],
        };
        assert!(!disabled.is_retry_eligible(101504));
        assert!(disabled.is_retry_eligible(101503));

        let enabled = RetryConfig {
            disabled_error_codes: vec![],
            enabled_error_codes: vec![101503],
        };
        assert!(enabled.is_retry_eligible(101503));
        assert!(!enabled.is_retry_eligible(101500));

        assert!(RetryConfig::default().is_retry_eligible(101503));
    }
}
