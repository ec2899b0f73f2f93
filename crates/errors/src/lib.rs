use thiserror::Error;


#[derive(Debug, Clone, Error)]
pub enum MediationError {
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("调度失败 [{code}]: {message}")]
    DispatchFault {
        code: i32,
        message: String,
        detail: Option<String>,
    },
    #[error("端点已挂起: {endpoint} (剩余 {remaining_ms}ms)")]
    EndpointSuspended {
        endpoint: String,
        code: i32,
        remaining_ms: u64,
    },
    #[error("不变量被破坏: {0}")]
    InvariantViolation(String),
    #[error("表达式求值失败: {expression} - {message}")]
    Expression { expression: String, message: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("端点未找到: {key}")]
    EndpointNotFound { key: String },
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type MediationResult<T> = Result<T, MediationError>;

impl MediationError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn dispatch_fault<S: Into<String>>(code: i32, message: S, detail: Option<String>) -> Self {
        Self::DispatchFault {
            code,
            message: message.into(),
            detail,
        }
    }
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }
    pub fn expression<E: Into<String>, M: Into<String>>(expression: E, message: M) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }
    pub fn endpoint_not_found<S: Into<String>>(key: S) -> Self {
        Self::EndpointNotFound { key: key.into() }
    }
    /// Invariant violations and configuration errors are never retried or
    /// handed to a fault sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MediationError::InvariantViolation(_) | MediationError::Configuration(_)
        )
    }
    /// Errors that the fault-handler chain is allowed to consume.
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            MediationError::DispatchFault { .. }
                | MediationError::EndpointSuspended { .. }
                | MediationError::Timeout(_)
        )
    }
    /// Transport-level failures the endpoint may retry, subject to its
    /// retry configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediationError::DispatchFault { .. } | MediationError::Timeout(_)
        )
    }
    pub fn error_code(&self) -> Option<i32> {
        match self {
            MediationError::DispatchFault { code, .. } => Some(*code),
            MediationError::EndpointSuspended { code, .. } => Some(*code),
            _ => None,
        }
    }
    pub fn user_message(&self) -> &str {
        match self {
            MediationError::DispatchFault { message, .. } => message,
            MediationError::EndpointSuspended { .. } => "目标端点暂不可用，请稍后重试",
            MediationError::Timeout(_) => "操作超时，请稍后重试",
            MediationError::Configuration(_) => "中介配置有误",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for MediationError {
    fn from(err: serde_json::Error) -> Self {
        MediationError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MediationError {
    fn from(err: toml::de::Error) -> Self {
        MediationError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for MediationError {
    fn from(err: anyhow::Error) -> Self {
        MediationError::Internal(err.to_string())
    }
}
