//! 端点：声明式策略、健康状态机与注册表
//!
//! 发送路径在调用传输层之前先查询端点健康状态；挂起中的端点直接失败，
//! 不会触达传输层。每次发送的结果都会回写到健康状态机。

pub mod definition;
pub mod endpoint;
pub mod health;
pub mod registry;
pub mod transport;

pub use definition::{
    AddressingPolicy, AddressingVersion, EndpointDefinition, ErrorCodeList, MarkForSuspension,
    MessageFormat, Optimize, RetryConfig, SecurityPolicy, SuspendOnFailure, TimeoutAction,
    TimeoutPolicy,
};
pub use endpoint::{Endpoint, EndpointKind, SendMode};
pub use health::{EndpointHealth, EndpointState, FailureVerdict, HealthSnapshot, SuspendSettings};
pub use registry::{EndpointRegistry, MediationEnvironment};
pub use transport::{Transport, TransportFault};
