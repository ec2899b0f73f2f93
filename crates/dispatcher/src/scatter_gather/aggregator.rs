//! 按关联 ID 划分的聚合缓冲区
//!
//! 每个关联 ID 对应一个缓冲区，支持并发追加，关闭有且仅有一次；
//! 关闭之后的任何贡献都会被拒绝。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use mediation_core::Payload;
use mediation_errors::{MediationError, MediationResult};

/// 缓冲区关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    MaxMessages,
    CompletionCondition,
    Timeout,
    AllBranches,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::MaxMessages => "max_messages",
            CloseReason::CompletionCondition => "completion_condition",
            CloseReason::Timeout => "timeout",
            CloseReason::AllBranches => "all_branches",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 聚合在达到 min-messages 之前关闭。非致命，随结果一起返回。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialAggregationWarning {
    pub correlation_id: String,
    pub received: usize,
    pub min_messages: u32,
    pub reason: CloseReason,
}

impl fmt::Display for PartialAggregationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "聚合 {} 仅收到 {}/{} 条结果 (关闭原因: {})",
            self.correlation_id, self.received, self.min_messages, self.reason
        )
    }
}

/// One accepted branch outcome
#[derive(Debug, Clone, PartialEq)]
pub struct BranchResult {
    pub branch_index: usize,
    pub payload: Payload,
}

/// Whether a late contribution made it into the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    Accepted,
    /// Buffer already closed, no buffer for the correlation id, or the
    /// branch has already been accounted for
    Rejected,
}

/// Limits resolved against the originating message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub expected: usize,
    pub min_messages: Option<u32>,
    pub max_messages: Option<u32>,
}

#[derive(Debug, Default)]
struct BufferState {
    results: Vec<BranchResult>,
    excluded: usize,
    /// 已合并或已排除的分支序号
    settled: HashSet<usize>,
    /// 已挂起在非阻塞调用上、等待响应的分支
    awaiting: usize,
    reason: Option<CloseReason>,
}

impl BufferState {
    fn accounted(&self) -> usize {
        self.results.len() + self.excluded
    }
}

/// Buffer for one correlation id
#[derive(Debug)]
pub struct AggregationBuffer {
    correlation_id: String,
    limits: BufferLimits,
    state: Mutex<BufferState>,
    closed: AtomicBool,
    notify: Notify,
}

/// Merged outcome of a closed buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedBuffer {
    pub results: Vec<BranchResult>,
    pub excluded: usize,
    pub reason: CloseReason,
}

impl AggregationBuffer {
    fn new(correlation_id: String, limits: BufferLimits) -> Self {
        Self {
            correlation_id,
            limits,
            state: Mutex::new(BufferState::default()),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Appends a branch result. `completed` is the completion condition as
    /// evaluated on that branch's message.
    pub async fn add(&self, result: BranchResult, completed: bool) -> Contribution {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            debug!(
                "聚合 {} 已关闭，拒绝分支 {} 的结果",
                self.correlation_id, result.branch_index
            );
            return Contribution::Rejected;
        }
        if !state.settled.insert(result.branch_index) {
            debug!(
                "聚合 {} 已收到分支 {} 的结果，忽略重复贡献",
                self.correlation_id, result.branch_index
            );
            return Contribution::Rejected;
        }
        state.results.push(result);

        let count = state.results.len();
        if self.limits.max_messages.is_some_and(|max| count >= max as usize) {
            self.close_locked(&mut state, CloseReason::MaxMessages);
        } else if completed {
            self.close_locked(&mut state, CloseReason::CompletionCondition);
        } else {
            self.close_if_accounted(&mut state);
        }
        Contribution::Accepted
    }

    /// Records a branch that diverted into its fault sequence or failed.
    pub async fn exclude(&self, branch_index: usize) {
        let mut state = self.state.lock().await;
        if self.is_closed() || !state.settled.insert(branch_index) {
            return;
        }
        debug!("聚合 {} 排除分支 {}", self.correlation_id, branch_index);
        state.excluded += 1;
        self.close_if_accounted(&mut state);
    }

    /// Records a branch whose result will arrive through the response path.
    /// The response may already have been delivered, in which case nothing
    /// is left to wait for.
    pub async fn mark_awaiting(&self, branch_index: usize) {
        let mut state = self.state.lock().await;
        if !state.settled.contains(&branch_index) {
            state.awaiting += 1;
        }
    }

    /// Resolves a branch that was awaiting a response. Returns false when
    /// that branch has already been merged or excluded.
    pub async fn settle_awaiting(&self, branch_index: usize) -> bool {
        let mut state = self.state.lock().await;
        if state.settled.contains(&branch_index) {
            return false;
        }
        state.awaiting = state.awaiting.saturating_sub(1);
        true
    }

    /// Closes the buffer unless it is already closed. Returns whether this
    /// call was the one that closed it.
    pub async fn close(&self, reason: CloseReason) -> bool {
        let mut state = self.state.lock().await;
        self.close_locked(&mut state, reason)
    }

    fn close_if_accounted(&self, state: &mut BufferState) {
        if state.accounted() >= self.limits.expected {
            self.close_locked(state, CloseReason::AllBranches);
        }
    }

    fn close_locked(&self, state: &mut BufferState, reason: CloseReason) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        state.reason = Some(reason);
        info!(
            "聚合 {} 关闭: {} (结果 {}, 排除 {}, 待响应 {})",
            self.correlation_id,
            reason,
            state.results.len(),
            state.excluded,
            state.awaiting
        );
        self.notify.notify_waiters();
        true
    }

    /// Waits until the buffer is closed.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Branches neither merged nor excluded yet.
    pub async fn outstanding(&self) -> usize {
        let state = self.state.lock().await;
        self.limits.expected.saturating_sub(state.accounted())
    }

    pub async fn awaiting(&self) -> usize {
        self.state.lock().await.awaiting
    }

    /// Takes the merged contents of a closed buffer.
    pub async fn take(&self) -> MediationResult<ClosedBuffer> {
        let mut state = self.state.lock().await;
        let reason = state.reason.ok_or_else(|| {
            MediationError::invariant(format!("聚合 {} 尚未关闭", self.correlation_id))
        })?;
        Ok(ClosedBuffer {
            results: std::mem::take(&mut state.results),
            excluded: state.excluded,
            reason,
        })
    }

    /// Warning for a buffer that closed with fewer than min-messages results
    pub fn partial_warning(
        &self,
        received: usize,
        reason: CloseReason,
    ) -> Option<PartialAggregationWarning> {
        let min = self.limits.min_messages?;
        if received >= min as usize {
            return None;
        }
        Some(PartialAggregationWarning {
            correlation_id: self.correlation_id.clone(),
            received,
            min_messages: min,
            reason,
        })
    }
}

/// Open buffers by correlation id. Closed buffers are removed so a late
/// contribution finds nothing and is rejected.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    buffers: Arc<Mutex<HashMap<String, Arc<AggregationBuffer>>>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(
        &self,
        correlation_id: &str,
        limits: BufferLimits,
    ) -> MediationResult<Arc<AggregationBuffer>> {
        let mut buffers = self.buffers.lock().await;
        if let Some(existing) = buffers.get(correlation_id) {
            if !existing.is_closed() {
                return Err(MediationError::Internal(format!(
                    "关联 ID {correlation_id} 已有进行中的聚合"
                )));
            }
        }
        let buffer = Arc::new(AggregationBuffer::new(correlation_id.to_string(), limits));
        buffers.insert(correlation_id.to_string(), Arc::clone(&buffer));
        Ok(buffer)
    }

    pub async fn get(&self, correlation_id: &str) -> Option<Arc<AggregationBuffer>> {
        self.buffers.lock().await.get(correlation_id).cloned()
    }

    pub async fn remove(&self, correlation_id: &str) {
        self.buffers.lock().await.remove(correlation_id);
    }

    pub async fn open_count(&self) -> usize {
        self.buffers.lock().await.len()
    }
}
