use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use mediation_core::constants::{error_codes, properties};
use mediation_core::{ContinuationFrame, Mediator, MessageContext};
use mediation_endpoint::{Endpoint, MediationEnvironment, SendMode, Transport, TransportFault};
use mediation_errors::{MediationError, MediationResult};

use crate::rehoming::{OriginalMessage, PayloadSource, PayloadTarget, Rehoming};

/// 调用中介器
///
/// 阻塞模式在当前任务内等待响应并直接继续流程；非阻塞模式压入续点帧后
/// 返回 `false`，由响应路径通过 [`CallMediator::on_response`] 恢复。
pub struct CallMediator {
    name: String,
    endpoint: Option<Arc<Endpoint>>,
    /// 阻塞调用使用独立的传输通道
    transport: Arc<dyn Transport>,
    env: MediationEnvironment,
    blocking: bool,
    rehoming: Rehoming,
}

impl std::fmt::Debug for CallMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallMediator")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint.as_ref().map(|e| e.name()))
            .field("blocking", &self.blocking)
            .field("rehoming", &self.rehoming)
            .finish()
    }
}

impl CallMediator {
    /// 创建非阻塞调用中介器
    pub fn new<S: Into<String>>(
        name: S,
        transport: Arc<dyn Transport>,
        env: MediationEnvironment,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
            transport,
            env,
            blocking: false,
            rehoming: Rehoming::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: Arc<Endpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// 切换为阻塞模式，`transport` 为阻塞专用通道
    pub fn blocking(mut self, transport: Arc<dyn Transport>) -> Self {
        self.blocking = true;
        self.transport = transport;
        self
    }

    pub fn with_source(mut self, source: PayloadSource, message_type: Option<&str>) -> Self {
        self.rehoming.source = Some(source);
        self.rehoming.source_message_type = message_type.map(str::to_string);
        self
    }

    pub fn with_target(mut self, target: PayloadTarget) -> Self {
        self.rehoming.target = Some(target);
        self
    }

    pub fn endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.endpoint.as_ref()
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn rehoming(&self) -> &Rehoming {
        &self.rehoming
    }

    fn mode(&self) -> SendMode {
        if self.blocking {
            SendMode::Blocking
        } else {
            SendMode::NonBlocking
        }
    }

    async fn send(&self, ctx: &mut MessageContext) -> MediationResult<()> {
        match &self.endpoint {
            Some(endpoint) => {
                endpoint
                    .send(ctx, self.transport.as_ref(), &self.env, self.mode())
                    .await
            }
            None => {
                debug!(
                    "调用中介器 {} 未配置端点，按隐式目标发送: {:?}",
                    self.name, ctx.to
                );
                match self.transport.send(None, ctx).await {
                    Ok(()) => Ok(()),
                    Err(fault) => Err(self.implicit_fault(ctx, fault)),
                }
            }
        }
    }

    fn implicit_fault(&self, ctx: &mut MessageContext, fault: TransportFault) -> MediationError {
        let code = fault.code.unwrap_or(if self.blocking {
            error_codes::BLOCKING_CALL_OPERATION_FAILED
        } else {
            error_codes::NON_BLOCKING_CALL_OPERATION_FAILED
        });
        let message = fault
            .message
            .unwrap_or_else(|| "Error while performing the call operation".to_string());
        ctx.set_error(code, &message, fault.detail.as_deref());
        MediationError::dispatch_fault(code, message, fault.detail)
    }

    #[instrument(skip_all, fields(mediator = %self.name, message_id = %ctx.id()))]
    async fn handle_blocking_call(
        &self,
        ctx: &mut MessageContext,
        original: &OriginalMessage,
    ) -> MediationResult<bool> {
        debug!("开始阻塞调用");
        ctx.set_property(properties::BLOCKING_MSG_SENDER, self.name.as_str());
        for key in [
            properties::RECEIVING_SEQUENCE,
            properties::DYNAMIC_URL_VALUE,
            properties::LAST_ENDPOINT,
            properties::BLOCKING_SENDER_ERROR,
        ] {
            ctx.remove_property(key);
        }

        let handler_before = ctx.fault_handlers.head_id();
        if let Some(id) = handler_before {
            ctx.set_property(properties::LAST_SEQ_FAULT_HANDLER, id.to_string());
        }

        if let Err(err) = self.send(ctx).await {
            ctx.set_property(properties::BLOCKING_SENDER_ERROR, true);
            return self.handle_fault(ctx, err).await;
        }

        if ctx.fault_handlers.head_id() != handler_before {
            debug!("阻塞调用期间故障序列已执行，终止后续处理");
            return Ok(false);
        }
        if ctx.property_bool(properties::BLOCKING_SENDER_ERROR) {
            error!("阻塞调用执行失败");
            return Ok(false);
        }
        if !ctx.is_out_only() && ctx.payload.is_empty() {
            debug!("服务返回了空响应");
        }

        self.post_mediate(
            ctx,
            original.message_type.as_deref(),
            original.content_type.as_deref(),
            &original.headers,
        )?;
        debug!("阻塞调用结束");
        Ok(true)
    }

    #[instrument(skip_all, fields(mediator = %self.name, message_id = %ctx.id()))]
    async fn handle_non_blocking_call(&self, ctx: &mut MessageContext) -> MediationResult<bool> {
        let Some(top) = ctx.continuation.peek().cloned() else {
            return Err(MediationError::invariant(
                "Continuation Stack Empty! Cannot proceed with the call",
            ));
        };
        for frame in ctx.continuation.iter() {
            debug!("续点栈: {}", frame);
        }

        if let Some(id) = ctx.fault_handlers.head_id() {
            ctx.set_property(properties::LAST_SEQ_FAULT_HANDLER, id.to_string());
        }
        ctx.clear_per_call_properties();

        let frame = top.resume_at(top.position);
        if ctx.is_out_only() {
            let mut out = ctx.fork();
            out.set_property(properties::CONTINUATION_CALL, true);
            out.continuation.push(frame);
            if let Err(err) = self.send(&mut out).await {
                copy_error(&out, ctx);
                return self.handle_fault(ctx, err).await;
            }
            debug!("单向消息 {} 已发出，原流程继续", out.id());
            return Ok(true);
        }

        ctx.set_property(properties::CONTINUATION_CALL, true);
        ctx.continuation.push(frame);
        if let Err(err) = self.send(ctx).await {
            ctx.continuation.pop();
            return self.handle_fault(ctx, err).await;
        }
        debug!("非阻塞调用已发出，等待响应");
        Ok(false)
    }

    /// Runs the message's fault-handler chain for a failed dispatch.
    /// Returns `Ok(false)` once the flow is diverted; without a handler the
    /// error propagates.
    async fn handle_fault(
        &self,
        ctx: &mut MessageContext,
        err: MediationError,
    ) -> MediationResult<bool> {
        if !err.is_dispatch_failure() {
            return Err(err);
        }
        if let MediationError::Timeout(_) = err {
            ctx.set_property(properties::RESPONSE_DISCARDED, true);
            info!("调用中介器 {} 超时，丢弃消息 {}", self.name, ctx.id());
            return Ok(false);
        }
        if let MediationError::EndpointSuspended { code, .. } = &err {
            ctx.set_error(*code, &err.to_string(), None);
        }

        ctx.set_property(properties::SENDING_FAULT, true);
        ctx.set_property(properties::ERROR_EXCEPTION, err.to_string());
        warn!("调用中介器 {} 发送失败: {}", self.name, err);

        if ctx.handle_fault().await? {
            Ok(false)
        } else {
            error!("调用中介器 {} 发送失败且没有故障处理器: {}", self.name, err);
            Err(err)
        }
    }

    /// Inbound rehoming on the response. Restores the original body, headers
    /// and content type when the outbound side replaced them.
    pub fn post_mediate(
        &self,
        response: &mut MessageContext,
        original_message_type: Option<&str>,
        original_content_type: Option<&str>,
        original_headers: &HashMap<String, String>,
    ) -> MediationResult<()> {
        let original = OriginalMessage {
            message_type: original_message_type.map(str::to_string),
            content_type: original_content_type.map(str::to_string),
            headers: original_headers.clone(),
        };
        self.rehoming.apply_inbound(response, &original)
    }

    /// 响应路径入口：弹出续点帧、记录端点成功并执行入站载荷搬移，
    /// 返回应从哪个帧继续。
    pub async fn on_response(
        &self,
        response: &mut MessageContext,
    ) -> MediationResult<ContinuationFrame> {
        let frame = response.continuation.resume()?;
        response.response = true;
        response.remove_property(properties::CONTINUATION_CALL);
        if let Some(endpoint) = &self.endpoint {
            endpoint.record_response(&self.env).await?;
        }

        let original = OriginalMessage::from_properties(response);
        self.post_mediate(
            response,
            original.message_type.as_deref(),
            original.content_type.as_deref(),
            &original.headers,
        )?;
        debug!("消息 {} 响应已关联，恢复至 {}", response.id(), frame);
        Ok(frame)
    }

    /// 异步故障响应：记录端点失败并交给故障处理链
    pub async fn on_fault_response(
        &self,
        response: &mut MessageContext,
        fault: TransportFault,
    ) -> MediationResult<bool> {
        response.continuation.resume()?;
        response.response = true;
        let err = match &self.endpoint {
            Some(endpoint) => {
                endpoint
                    .record_fault_response(response, fault, &self.env)
                    .await?
            }
            None => self.implicit_fault(response, fault),
        };
        self.handle_fault(response, err).await
    }
}

fn copy_error(from: &MessageContext, to: &mut MessageContext) {
    for key in [
        properties::ERROR_CODE,
        properties::ERROR_MESSAGE,
        properties::ERROR_DETAIL,
    ] {
        if let Some(value) = from.get_property(key) {
            to.set_property(key, value.clone());
        }
    }
}

#[async_trait]
impl Mediator for CallMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> MediationResult<bool> {
        // 非阻塞调用必须有续点可回，检查先于任何对消息的改写
        if !self.blocking && ctx.continuation.is_empty() {
            return Err(MediationError::invariant(
                "Continuation Stack Empty! Cannot proceed with the call",
            ));
        }
        let original = OriginalMessage::capture(ctx);
        self.rehoming.apply_outbound(ctx, &original)?;
        self.rehoming.record(ctx, &original);

        if self.blocking {
            self.handle_blocking_call(ctx, &original).await
        } else {
            self.handle_non_blocking_call(ctx).await
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> MediationResult<()> {
        if let Some(endpoint) = &self.endpoint {
            endpoint.init(&self.env).await?;
        }
        info!(
            "调用中介器 {} 初始化完成 ({})",
            self.name,
            if self.blocking { "阻塞" } else { "非阻塞" }
        );
        Ok(())
    }

    async fn destroy(&self) -> MediationResult<()> {
        if let Some(endpoint) = &self.endpoint {
            endpoint.destroy().await;
        }
        Ok(())
    }
}
