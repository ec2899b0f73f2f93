//! Scatter-Gather 引擎
//!
//! 把消息复制到每个分支序列，并行或顺序执行，按关联 ID 聚合分支结果。
//! 缓冲区在以下任一条件满足时关闭：结果数达到 max-messages、完成条件为真、
//! 超时、或所有分支都已有结论。

pub mod aggregator;
pub mod config;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use mediation_core::constants::properties;
use mediation_core::{
    ContinuationFrame, ExpressionEvaluator, Mediator, MessageContext, Payload, PolicyValue,
    SequenceType,
};
use mediation_endpoint::MediationEnvironment;
use mediation_errors::{MediationError, MediationResult};

pub use aggregator::{
    AggregationBuffer, Aggregator, BranchResult, BufferLimits, ClosedBuffer, CloseReason,
    Contribution, PartialAggregationWarning,
};
pub use config::{AggregateContentType, AggregationPolicy, ResultTarget, ScatterGatherConfig, Target};

/// Outcome of one [`ScatterGather::execute`] run
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationReport {
    pub correlation_id: String,
    pub merged: usize,
    pub excluded: usize,
    pub reason: CloseReason,
    pub warning: Option<PartialAggregationWarning>,
}

impl AggregationReport {
    pub fn is_partial(&self) -> bool {
        self.warning.is_some()
    }
}

struct BranchOutcome {
    index: usize,
    ctx: MessageContext,
    result: MediationResult<bool>,
}

pub struct ScatterGather {
    name: String,
    config: ScatterGatherConfig,
    env: MediationEnvironment,
    aggregator: Aggregator,
}

impl std::fmt::Debug for ScatterGather {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterGather")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl ScatterGather {
    pub fn new<S: Into<String>>(
        name: S,
        config: ScatterGatherConfig,
        env: MediationEnvironment,
    ) -> MediationResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            env,
            aggregator: Aggregator::new(),
        })
    }

    /// 共享聚合器，便于多个实例共用同一组缓冲区
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn config(&self) -> &ScatterGatherConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Forks the message into every target, gathers the outcomes and writes
    /// the merged result to the configured placement on `ctx`.
    #[instrument(skip_all, fields(mediator = %self.name, message_id = %ctx.id()))]
    pub async fn execute(&self, ctx: &mut MessageContext) -> MediationResult<AggregationReport> {
        let correlation_id = self.correlation_id(ctx);
        let aggregation = &self.config.aggregation;
        let evaluator = self.env.evaluator();
        let limits = BufferLimits {
            expected: self.config.targets.len(),
            min_messages: resolve_optional(aggregation.min_messages.as_ref(), ctx, evaluator, "min-messages"),
            max_messages: resolve_optional(aggregation.max_messages.as_ref(), ctx, evaluator, "max-messages"),
        };
        let timeout_ms = match resolve_optional(aggregation.timeout_ms.as_ref(), ctx, evaluator, "timeout") {
            Some(0) => {
                warn!("聚合超时解析为0，忽略");
                self.config.default_timeout_ms
            }
            Some(ms) => Some(ms),
            None => self.config.default_timeout_ms,
        };

        let buffer = self.aggregator.open(&correlation_id, limits).await?;
        info!(
            "scatter-gather {} 开始: 关联ID={}, 分支数={}, 并行={}, 超时={:?}ms",
            self.name,
            correlation_id,
            limits.expected,
            self.config.parallel_execution,
            timeout_ms
        );

        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        if let Err(err) = self.dispatch_branches(ctx, &correlation_id, &buffer, deadline).await {
            self.aggregator.remove(&correlation_id).await;
            return Err(err);
        }

        let closed = buffer.take().await;
        self.aggregator.remove(&correlation_id).await;
        let closed = closed?;

        let mut results = closed.results;
        if !self.config.parallel_execution {
            results.sort_by_key(|result| result.branch_index);
        }
        self.place(ctx, self.merge(&results));

        let warning = buffer.partial_warning(results.len(), closed.reason);
        ctx.set_property(properties::SCATTER_GATHER_PARTIAL, warning.is_some());
        if let Some(warning) = &warning {
            warn!("部分聚合: {}", warning);
        }
        self.env
            .metrics()
            .record_aggregation_closed(closed.reason.as_str(), warning.is_some());

        Ok(AggregationReport {
            correlation_id,
            merged: results.len(),
            excluded: closed.excluded,
            reason: closed.reason,
            warning,
        })
    }

    /// Delivers the result of a branch that suspended on a non-blocking call
    /// and was resumed by the response path. Rejected once the buffer for its
    /// correlation id has closed.
    pub async fn on_branch_response(&self, response: MessageContext) -> MediationResult<Contribution> {
        let Some(correlation_id) = response
            .property_str(properties::SCATTER_GATHER_CORRELATION_ID)
            .map(str::to_string)
        else {
            warn!("响应 {} 缺少 scatter-gather 关联ID，丢弃", response.id());
            return Ok(Contribution::Rejected);
        };
        let Some(buffer) = self.aggregator.get(&correlation_id).await else {
            debug!("聚合 {} 已结束，拒绝迟到的响应 {}", correlation_id, response.id());
            return Ok(Contribution::Rejected);
        };
        if buffer.is_closed() {
            return Ok(Contribution::Rejected);
        }

        let index = response
            .get_property(properties::SCATTER_GATHER_BRANCH_INDEX)
            .and_then(Value::as_u64)
            .and_then(|index| usize::try_from(index).ok())
            .ok_or_else(|| {
                MediationError::invariant(format!(
                    "scatter-gather 响应 {} 缺少分支序号",
                    response.id()
                ))
            })?;

        if !buffer.settle_awaiting(index).await {
            debug!("聚合 {} 分支 {} 已有结果，忽略重复响应", correlation_id, index);
            return Ok(Contribution::Rejected);
        }
        if response.property_bool(properties::SENDING_FAULT) {
            buffer.exclude(index).await;
            return Ok(Contribution::Accepted);
        }
        Ok(self.contribute(&buffer, index, &response).await)
    }

    fn correlation_id(&self, ctx: &MessageContext) -> String {
        if let Some(expression) = &self.config.aggregation.correlation_expression {
            match self.env.evaluator().evaluate_string(expression, ctx) {
                Ok(id) if !id.is_empty() => return id,
                Ok(_) => warn!("关联表达式 {} 结果为空，使用随机ID", expression),
                Err(e) => warn!("关联表达式求值失败，使用随机ID: {}", e),
            }
        }
        Uuid::new_v4().to_string()
    }

    fn fork_branch(&self, ctx: &MessageContext, correlation_id: &str, index: usize) -> MessageContext {
        let target = &self.config.targets[index];
        let mut branch = ctx.fork();
        branch.remove_property(properties::CONTINUATION_CALL);
        branch.remove_property(properties::SCATTER_GATHER_PARTIAL);
        branch.set_property(properties::SCATTER_GATHER_CORRELATION_ID, correlation_id);
        branch.set_property(properties::SCATTER_GATHER_BRANCH_INDEX, index as u64);
        branch.set_property(properties::SCATTER_GATHER_ASYNC, target.asynchronous);
        branch.continuation.push(ContinuationFrame::new(
            SequenceType::Anonymous,
            format!("{}-branch-{}", self.name, index),
        ));
        branch
    }

    async fn run_branch(&self, index: usize, mut ctx: MessageContext) -> BranchOutcome {
        let target = &self.config.targets[index];
        debug!(
            "分支 {} ({}) 开始执行: {}",
            index,
            target.id.as_deref().unwrap_or("-"),
            target.sequence.name()
        );
        let result = target.sequence.mediate(&mut ctx).await;
        BranchOutcome { index, ctx, result }
    }

    async fn dispatch_branches(
        &self,
        ctx: &MessageContext,
        correlation_id: &str,
        buffer: &AggregationBuffer,
        deadline: Option<Instant>,
    ) -> MediationResult<()> {
        let concurrency = if self.config.parallel_execution {
            self.config.targets.len()
        } else {
            1
        };
        let mut queue = (0..self.config.targets.len())
            .map(|index| (index, self.fork_branch(ctx, correlation_id, index)));
        let mut running = FuturesUnordered::new();
        for (index, branch) in queue.by_ref().take(concurrency) {
            running.push(self.run_branch(index, branch));
        }

        loop {
            if buffer.is_closed() {
                break;
            }
            if running.is_empty() && deadline.is_none() && buffer.awaiting().await > 0 {
                warn!(
                    "聚合 {} 在等待非阻塞分支响应，但没有配置超时",
                    correlation_id
                );
            }
            tokio::select! {
                biased;
                _ = buffer.wait_closed() => break,
                _ = wait_deadline(deadline) => {
                    if buffer.close(CloseReason::Timeout).await {
                        info!("聚合 {} 超时，剩余 {} 个分支", correlation_id, buffer.outstanding().await);
                    }
                    break;
                }
                Some(outcome) = running.next(), if !running.is_empty() => {
                    self.accept(buffer, outcome).await?;
                    if buffer.is_closed() {
                        break;
                    }
                    if let Some((index, branch)) = queue.next() {
                        running.push(self.run_branch(index, branch));
                    }
                }
            }
        }

        if !running.is_empty() {
            debug!("聚合 {} 已关闭，放弃 {} 个未完成分支", correlation_id, running.len());
        }
        Ok(())
    }

    async fn accept(&self, buffer: &AggregationBuffer, outcome: BranchOutcome) -> MediationResult<()> {
        let BranchOutcome { index, ctx, result } = outcome;
        match result {
            Ok(true) => {
                self.contribute(buffer, index, &ctx).await;
            }
            Ok(false) if is_awaiting_response(&ctx) => {
                debug!("分支 {} 挂起在非阻塞调用上，等待响应", index);
                buffer.mark_awaiting(index).await;
            }
            Ok(false) => {
                debug!("分支 {} 已转入故障序列或停止，排除", index);
                buffer.exclude(index).await;
            }
            Err(err) if matches!(err, MediationError::InvariantViolation(_)) => {
                warn!("分支 {} 违反调度不变量，终止聚合: {}", index, err);
                return Err(err);
            }
            Err(err) => {
                warn!("分支 {} 执行失败，排除: {}", index, err);
                buffer.exclude(index).await;
            }
        }
        Ok(())
    }

    async fn contribute(
        &self,
        buffer: &AggregationBuffer,
        index: usize,
        branch: &MessageContext,
    ) -> Contribution {
        let evaluator = self.env.evaluator();
        let aggregation = &self.config.aggregation;

        let payload = match &aggregation.value_expression {
            Some(expression) => match evaluator.evaluate(expression, branch) {
                Ok(value) => Payload::from_value(value, branch.message_type.as_deref()),
                Err(e) => {
                    warn!("分支 {} 聚合表达式求值失败，排除: {}", index, e);
                    buffer.exclude(index).await;
                    return Contribution::Rejected;
                }
            },
            None => branch.payload.clone(),
        };

        let completed = match &aggregation.completion_condition {
            Some(condition) => evaluator.evaluate_bool(condition, branch).unwrap_or_else(|e| {
                warn!("完成条件求值失败，视为未完成: {}", e);
                false
            }),
            None => false,
        };

        buffer
            .add(
                BranchResult {
                    branch_index: index,
                    payload,
                },
                completed,
            )
            .await
    }

    fn merge(&self, results: &[BranchResult]) -> Payload {
        match &self.config.content_type {
            AggregateContentType::Json => Payload::json(Value::Array(
                results.iter().map(|result| result.payload.to_value()).collect(),
            )),
            AggregateContentType::Xml { root_element } => {
                let mut xml = format!("<{root_element}>");
                for result in results {
                    xml.push_str(&result.payload.to_xml_fragment());
                }
                xml.push_str(&format!("</{root_element}>"));
                Payload::xml(xml)
            }
        }
    }

    fn place(&self, ctx: &mut MessageContext, merged: Payload) {
        match &self.config.result_target {
            ResultTarget::Body => ctx.set_payload(merged),
            ResultTarget::Variable(name) => ctx.set_variable(name.as_str(), merged.to_value()),
        }
    }
}

#[async_trait]
impl Mediator for ScatterGather {
    async fn mediate(&self, ctx: &mut MessageContext) -> MediationResult<bool> {
        self.execute(ctx).await?;
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> MediationResult<()> {
        for target in &self.config.targets {
            target.sequence.init().await?;
        }
        Ok(())
    }

    async fn destroy(&self) -> MediationResult<()> {
        for target in &self.config.targets {
            target.sequence.destroy().await?;
        }
        Ok(())
    }
}

fn is_awaiting_response(ctx: &MessageContext) -> bool {
    ctx.property_bool(properties::CONTINUATION_CALL)
        && !ctx.property_bool(properties::SENDING_FAULT)
        && !ctx.property_bool(properties::RESPONSE_DISCARDED)
        && !ctx.continuation.is_empty()
}

fn resolve_optional<T>(
    policy: Option<&PolicyValue<T>>,
    ctx: &MessageContext,
    evaluator: &dyn ExpressionEvaluator,
    field: &str,
) -> Option<T>
where
    T: Clone + serde::de::DeserializeOwned + std::str::FromStr,
{
    match policy?.resolve(ctx, evaluator) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("聚合策略字段 {} 解析失败，按未设置处理: {}", field, e);
            None
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
