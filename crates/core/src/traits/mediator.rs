//! 中介器接口定义
//!
//! 中介器是消息流水线中的最小执行单元。`mediate` 返回的布尔值表示流程是否
//! 继续：`true` 立即执行下一个中介器，`false` 表示流程已挂起（等待异步响应）
//! 或已转入故障序列。

use async_trait::async_trait;

use crate::models::MessageContext;
use crate::MediationResult;

#[async_trait]
pub trait Mediator: Send + Sync {
    /// 处理消息，返回是否继续后续中介器
    async fn mediate(&self, ctx: &mut MessageContext) -> MediationResult<bool>;

    /// 中介器名称，用于日志与故障处理器标识
    fn name(&self) -> &str;

    /// 生命周期：部署时调用
    async fn init(&self) -> MediationResult<()> {
        Ok(())
    }

    /// 生命周期：卸载时调用
    async fn destroy(&self) -> MediationResult<()> {
        Ok(())
    }
}
