use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use mediation_core::constants::{error_codes, properties};
use mediation_core::MessageContext;
use mediation_errors::{MediationError, MediationResult};
use mediation_observability::DispatchOutcome;

use crate::definition::{EndpointDefinition, TimeoutAction};
use crate::health::{EndpointHealth, FailureVerdict, HealthSnapshot, SuspendSettings};
use crate::registry::MediationEnvironment;
use crate::transport::{Transport, TransportFault};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    Address { uri: String },
    Wsdl { uri: String, service: String, port: String },
    /// Sends to the message's implicit destination
    Default,
    /// Resolved through the registry by key at send time
    Indirect { key: String },
}

/// Which channel a send goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// The call returns with the response; success is recorded on return
    Blocking,
    /// The call returns once handed off; success is recorded by the response path
    NonBlocking,
}

impl SendMode {
    fn default_error_code(&self) -> i32 {
        match self {
            SendMode::Blocking => error_codes::BLOCKING_CALL_OPERATION_FAILED,
            SendMode::NonBlocking => error_codes::NON_BLOCKING_CALL_OPERATION_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeoutSettings {
    duration: Option<Duration>,
    action: TimeoutAction,
}

#[derive(Debug)]
pub struct Endpoint {
    name: String,
    kind: EndpointKind,
    definition: EndpointDefinition,
    health: EndpointHealth,
    initialized: AtomicBool,
}

impl Endpoint {
    pub fn new<S: Into<String>>(
        name: S,
        kind: EndpointKind,
        mut definition: EndpointDefinition,
    ) -> MediationResult<Self> {
        let name = name.into();
        definition.validate()?;
        match &kind {
            EndpointKind::Address { uri } | EndpointKind::Wsdl { uri, .. } => {
                if uri.trim().is_empty() {
                    return Err(MediationError::config_error(format!(
                        "端点 {name} 缺少地址"
                    )));
                }
                if definition.address.is_none() {
                    definition.address = Some(uri.clone());
                }
            }
            EndpointKind::Indirect { key } => {
                if key.trim().is_empty() {
                    return Err(MediationError::config_error(format!(
                        "间接端点 {name} 缺少 key"
                    )));
                }
            }
            EndpointKind::Default => {}
        }

        Ok(Self {
            health: EndpointHealth::new(name.clone()),
            name,
            kind,
            definition,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn address<S: Into<String>, U: Into<String>>(
        name: S,
        uri: U,
        definition: EndpointDefinition,
    ) -> MediationResult<Self> {
        Self::new(name, EndpointKind::Address { uri: uri.into() }, definition)
    }

    pub fn default_endpoint<S: Into<String>>(
        name: S,
        definition: EndpointDefinition,
    ) -> MediationResult<Self> {
        Self::new(name, EndpointKind::Default, definition)
    }

    pub fn indirect<S: Into<String>, K: Into<String>>(name: S, key: K) -> MediationResult<Self> {
        Self::new(
            name,
            EndpointKind::Indirect { key: key.into() },
            EndpointDefinition::default(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    pub fn definition(&self) -> &EndpointDefinition {
        &self.definition
    }

    pub fn health(&self) -> &EndpointHealth {
        &self.health
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Error code reported while this endpoint is suspended
    pub fn suspended_error_code(&self) -> i32 {
        match self.kind {
            EndpointKind::Address { .. } => error_codes::ADDRESS_ENDPOINT_SUSPENDED,
            EndpointKind::Wsdl { .. } => error_codes::WSDL_ENDPOINT_SUSPENDED,
            EndpointKind::Default | EndpointKind::Indirect { .. } => {
                error_codes::DEFAULT_ENDPOINT_SUSPENDED
            }
        }
    }

    pub async fn init(&self, env: &MediationEnvironment) -> MediationResult<()> {
        if let EndpointKind::Indirect { key } = &self.kind {
            // key must resolve at deployment time
            env.registry().resolve(key).await?;
        }
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!("端点 {} 初始化完成 ({:?})", self.name, self.kind);
        }
        Ok(())
    }

    pub async fn destroy(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.health.reset().await;
            info!("端点 {} 已销毁", self.name);
        }
    }

    /// Sends `ctx` through `transport`, applying the health contract:
    /// a suspended endpoint fails fast without touching the transport,
    /// eligible failures are retried after the retry delay, and every
    /// outcome is fed back into the health state.
    #[instrument(skip_all, fields(endpoint = %self.name, message_id = %ctx.id()))]
    pub async fn send(
        &self,
        ctx: &mut MessageContext,
        transport: &dyn Transport,
        env: &MediationEnvironment,
        mode: SendMode,
    ) -> MediationResult<()> {
        match &self.kind {
            EndpointKind::Indirect { key } => {
                let real = env.registry().resolve(key).await?;
                debug!("间接端点 {} 解析为 {}", self.name, real.name());
                real.dispatch(ctx, transport, env, mode).await
            }
            _ => self.dispatch(ctx, transport, env, mode).await,
        }
    }

    async fn dispatch(
        &self,
        ctx: &mut MessageContext,
        transport: &dyn Transport,
        env: &MediationEnvironment,
        mode: SendMode,
    ) -> MediationResult<()> {
        ctx.set_property(properties::LAST_ENDPOINT, self.name.as_str());

        let settings =
            SuspendSettings::resolve(&self.definition, ctx, env.evaluator(), env.defaults());
        let timeout = self.resolve_timeout(ctx, env);

        loop {
            // 每次尝试前都检查，重试等待期间端点可能已被其他消息挂起
            if let Err(remaining) = self.health.check_ready().await {
                env.metrics()
                    .record_dispatch(&self.name, DispatchOutcome::Suspended, Duration::ZERO);
                warn!(
                    "端点 {} 处于挂起状态，剩余 {}ms，拒绝发送",
                    self.name,
                    remaining.as_millis()
                );
                return Err(MediationError::EndpointSuspended {
                    endpoint: self.name.clone(),
                    code: self.suspended_error_code(),
                    remaining_ms: remaining.as_millis() as u64,
                });
            }

            let started = Instant::now();
            let attempt = match timeout.duration {
                Some(limit) => {
                    match tokio::time::timeout(limit, transport.send(Some(&self.definition), ctx))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportFault::new(
                            error_codes::TIMEOUT_ERROR,
                            format!("Send timeout after {}ms", limit.as_millis()),
                        )),
                    }
                }
                None => transport.send(Some(&self.definition), ctx).await,
            };
            let elapsed = started.elapsed();

            let fault = match attempt {
                Ok(()) => {
                    env.metrics()
                        .record_dispatch(&self.name, DispatchOutcome::Success, elapsed);
                    if mode == SendMode::Blocking {
                        self.health.record_success().await;
                    }
                    debug!("端点 {} 发送成功，耗时 {}ms", self.name, elapsed.as_millis());
                    return Ok(());
                }
                Err(fault) => fault,
            };

            let code = fault.code.unwrap_or(mode.default_error_code());
            let outcome = if code == error_codes::TIMEOUT_ERROR {
                DispatchOutcome::Timeout
            } else {
                DispatchOutcome::Fault
            };
            env.metrics().record_dispatch(&self.name, outcome, elapsed);
            env.metrics().record_fault(&self.name, code);

            match self.health.record_failure(code, &settings).await {
                FailureVerdict::Retry { delay } => {
                    debug!(
                        "端点 {} 发送失败 [{}]，{}ms 后重试",
                        self.name,
                        code,
                        delay.as_millis()
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    ctx.clear_per_call_properties();
                    ctx.set_property(properties::LAST_ENDPOINT, self.name.as_str());
                    continue;
                }
                FailureVerdict::Suspended { .. } => {
                    env.metrics().record_suspension(&self.name);
                }
                FailureVerdict::Surface => {}
            }

            return Err(self.surface_fault(ctx, code, fault, timeout.action));
        }
    }

    fn surface_fault(
        &self,
        ctx: &mut MessageContext,
        code: i32,
        fault: TransportFault,
        action: TimeoutAction,
    ) -> MediationError {
        let message = fault
            .message
            .unwrap_or_else(|| "Error while performing the call operation".to_string());
        ctx.set_error(code, &message, fault.detail.as_deref());

        if code == error_codes::TIMEOUT_ERROR && action == TimeoutAction::Discard {
            info!("端点 {} 调用超时，按配置丢弃消息", self.name);
            return MediationError::Timeout(format!("{}: {}", self.name, message));
        }
        MediationError::dispatch_fault(code, message, fault.detail)
    }

    fn resolve_timeout(&self, ctx: &MessageContext, env: &MediationEnvironment) -> TimeoutSettings {
        let default_ms = env.defaults().timeout_ms;
        let Some(policy) = &self.definition.timeout else {
            return TimeoutSettings {
                duration: default_ms.map(Duration::from_millis),
                action: TimeoutAction::Never,
            };
        };

        let duration_ms = match &policy.duration_ms {
            Some(value) => match value.resolve(ctx, env.evaluator()) {
                Ok(ms) => Some(ms),
                Err(e) => {
                    warn!("端点 {} 超时时长解析失败，使用默认值: {}", self.name, e);
                    default_ms
                }
            },
            None => default_ms,
        };
        let action = policy
            .response_action
            .as_ref()
            .map(|action| {
                action.resolve_or(ctx, env.evaluator(), TimeoutAction::Never, "timeout.response_action")
            })
            .unwrap_or_default();

        TimeoutSettings {
            duration: duration_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
            action,
        }
    }

    /// Records the outcome of a reply that arrived on the response path.
    pub async fn record_response(&self, env: &MediationEnvironment) -> MediationResult<()> {
        self.resolved(env).await?.health.record_success().await;
        Ok(())
    }

    /// Records an asynchronous fault reply and attaches it to the message.
    pub async fn record_fault_response(
        &self,
        ctx: &mut MessageContext,
        fault: TransportFault,
        env: &MediationEnvironment,
    ) -> MediationResult<MediationError> {
        let endpoint = self.resolved(env).await?;
        let code = fault
            .code
            .unwrap_or(error_codes::NON_BLOCKING_CALL_OPERATION_FAILED);
        let settings =
            SuspendSettings::resolve(&endpoint.definition, ctx, env.evaluator(), env.defaults());
        env.metrics().record_fault(&endpoint.name, code);
        if let FailureVerdict::Suspended { .. } =
            endpoint.health.record_failure(code, &settings).await
        {
            env.metrics().record_suspension(&endpoint.name);
        }
        let timeout = endpoint.resolve_timeout(ctx, env);
        Ok(endpoint.surface_fault(ctx, code, fault, timeout.action))
    }

    pub async fn snapshot(&self, env: &MediationEnvironment) -> MediationResult<HealthSnapshot> {
        Ok(self.resolved(env).await?.health.snapshot().await)
    }

    async fn resolved(&self, env: &MediationEnvironment) -> MediationResult<Resolved<'_>> {
        match &self.kind {
            EndpointKind::Indirect { key } => {
                Ok(Resolved::Shared(env.registry().resolve(key).await?))
            }
            _ => Ok(Resolved::Direct(self)),
        }
    }
}

/// An endpoint with indirection already followed
enum Resolved<'a> {
    Direct(&'a Endpoint),
    Shared(Arc<Endpoint>),
}

impl Deref for Resolved<'_> {
    type Target = Endpoint;

    fn deref(&self) -> &Endpoint {
        match self {
            Resolved::Direct(endpoint) => endpoint,
            Resolved::Shared(endpoint) => endpoint,
        }
    }
}
