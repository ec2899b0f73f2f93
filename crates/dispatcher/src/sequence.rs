use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mediation_core::{ContinuationFrame, FaultHandler, Mediator, MessageContext, SequenceType};
use mediation_errors::{MediationError, MediationResult};

/// 顺序执行子中介器的序列
///
/// 进入时压入自身的续点帧，执行过程中帧的位置始终指向当前子中介器，
/// 非阻塞调用据此记录恢复位置。序列正常结束时弹出自身的帧。
pub struct SequenceMediator {
    name: String,
    sequence_type: SequenceType,
    children: Vec<Arc<dyn Mediator>>,
    on_error: Option<Arc<dyn Mediator>>,
}

impl std::fmt::Debug for SequenceMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceMediator")
            .field("name", &self.name)
            .field("sequence_type", &self.sequence_type)
            .field(
                "children",
                &self.children.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SequenceMediator {
    pub fn new<S: Into<String>>(name: S, sequence_type: SequenceType) -> Self {
        Self {
            name: name.into(),
            sequence_type,
            children: Vec::new(),
            on_error: None,
        }
    }

    pub fn anonymous<S: Into<String>>(name: S, children: Vec<Arc<dyn Mediator>>) -> Self {
        Self::new(name, SequenceType::Anonymous).with_children(children)
    }

    pub fn with_child(mut self, child: Arc<dyn Mediator>) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: Vec<Arc<dyn Mediator>>) -> Self {
        self.children.extend(children);
        self
    }

    /// 序列执行期间生效的故障序列
    pub fn with_on_error(mut self, on_error: Arc<dyn Mediator>) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn sequence_type(&self) -> SequenceType {
        self.sequence_type
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Continues after a correlated response. `frame` is the one returned by
    /// the call mediator's response path; mediation resumes with the child
    /// after the call.
    pub async fn resume(
        &self,
        ctx: &mut MessageContext,
        frame: &ContinuationFrame,
    ) -> MediationResult<bool> {
        if frame.sequence_name != self.name || frame.sequence_type != self.sequence_type {
            return Err(MediationError::invariant(format!(
                "续点帧 {} 不属于序列 {}",
                frame, self.name
            )));
        }
        debug!("序列 {} 从位置 {} 之后恢复", self.name, frame.position);
        self.run_from(ctx, frame.position + 1).await
    }

    async fn run_from(&self, ctx: &mut MessageContext, start: usize) -> MediationResult<bool> {
        for (position, child) in self.children.iter().enumerate().skip(start) {
            ctx.continuation.update_position(position);
            if !child.mediate(ctx).await? {
                debug!(
                    "序列 {} 在子中介器 {} ({}) 处暂停",
                    self.name,
                    position,
                    child.name()
                );
                return Ok(false);
            }
        }

        ctx.continuation.pop();
        if self.on_error.is_some()
            && ctx.fault_handlers.head().map(|h| h.name()) == Some(self.name.as_str())
        {
            ctx.fault_handlers.pop();
        }
        Ok(true)
    }
}

#[async_trait]
impl Mediator for SequenceMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> MediationResult<bool> {
        ctx.continuation
            .push(ContinuationFrame::new(self.sequence_type, self.name.as_str()));
        if let Some(on_error) = &self.on_error {
            ctx.fault_handlers
                .push(FaultHandler::new(self.name.as_str(), Arc::clone(on_error)));
        }
        self.run_from(ctx, 0).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> MediationResult<()> {
        for child in &self.children {
            child.init().await?;
        }
        Ok(())
    }

    async fn destroy(&self) -> MediationResult<()> {
        for child in &self.children {
            child.destroy().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallMediator;
    use mediation_core::Payload;
    use mediation_testing_utils::{MockTransport, RecordingMediator, TestEnv};
    use serde_json::json;

    #[tokio::test]
    async fn test_runs_children_and_pops_own_frame() {
        let first = RecordingMediator::new("first").with_property("a", json!(1));
        let second = RecordingMediator::new("second").with_property("b", json!(2));
        let sequence = SequenceMediator::new("main", SequenceType::Anonymous)
            .with_child(Arc::new(first.clone()))
            .with_child(Arc::new(second.clone()));
        let mut ctx = MessageContext::new();

        assert!(sequence.mediate(&mut ctx).await.unwrap());
        assert!(ctx.continuation.is_empty());
        assert_eq!(first.invocations(), 1);
        assert_eq!(second.invocations(), 1);
    }

    #[tokio::test]
    async fn test_suspends_on_non_blocking_call_and_resumes_after_it() {
        let env = TestEnv::environment();
        let transport = MockTransport::new();
        let call = Arc::new(CallMediator::new(
            "call",
            Arc::new(transport.clone()),
            env,
        ));
        let before = RecordingMediator::new("before");
        let after = RecordingMediator::new("after").with_payload(Payload::text("done"));
        let sequence = SequenceMediator::new("orders", SequenceType::Named)
            .with_child(Arc::new(before.clone()))
            .with_child(call.clone())
            .with_child(Arc::new(after.clone()));
        let mut ctx = MessageContext::new();

        assert!(!sequence.mediate(&mut ctx).await.unwrap());
        assert_eq!(after.invocations(), 0);

        let mut response = transport.last_sent().unwrap();
        let frame = call.on_response(&mut response).await.unwrap();
        assert_eq!(frame.position, 1);

        assert!(sequence.resume(&mut response, &frame).await.unwrap());
        assert_eq!(before.invocations(), 1);
        assert_eq!(after.invocations(), 1);
        assert_eq!(response.payload, Payload::text("done"));
        assert!(response.continuation.is_empty());
    }

    #[tokio::test]
    async fn test_on_error_handler_runs_for_child_fault() {
        let on_error = RecordingMediator::new("on-error");
        let failing = RecordingMediator::new("failing").diverting_to_fault();
        let never = RecordingMediator::new("never");
        let sequence = SequenceMediator::new("main", SequenceType::Proxy)
            .with_child(Arc::new(failing))
            .with_child(Arc::new(never.clone()))
            .with_on_error(Arc::new(on_error.clone()));
        let mut ctx = MessageContext::new();

        assert!(!sequence.mediate(&mut ctx).await.unwrap());
        assert_eq!(on_error.invocations(), 1);
        assert_eq!(never.invocations(), 0);
        assert!(ctx.continuation.is_empty());
    }

    #[tokio::test]
    async fn test_completion_removes_own_fault_handler() {
        let sequence = SequenceMediator::new("main", SequenceType::Named)
            .with_child(Arc::new(RecordingMediator::new("ok")))
            .with_on_error(Arc::new(RecordingMediator::new("on-error")));
        let mut ctx = MessageContext::new();

        assert!(sequence.mediate(&mut ctx).await.unwrap());
        assert!(ctx.fault_handlers.is_empty());
    }

    #[tokio::test]
    async fn test_resume_with_foreign_frame_is_rejected() {
        let sequence = SequenceMediator::new("main", SequenceType::Named);
        let frame = ContinuationFrame::new(SequenceType::Named, "other");
        let err = sequence
            .resume(&mut MessageContext::new(), &frame)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
