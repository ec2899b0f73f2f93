//! 中介调度层
//!
//! 调用中介器（阻塞与非阻塞两种模式）、载荷搬移、顺序序列以及
//! scatter-gather 引擎。非阻塞调用通过续点栈挂起和恢复，
//! 所有中介器都在调用方的 tokio 任务上运行。

pub mod call;
pub mod rehoming;
pub mod scatter_gather;
pub mod sequence;

pub use call::CallMediator;
pub use rehoming::{OriginalMessage, PayloadSource, PayloadTarget, Rehoming};
pub use scatter_gather::{
    AggregateContentType, AggregationPolicy, AggregationReport, Aggregator, CloseReason,
    Contribution, PartialAggregationWarning, ResultTarget, ScatterGather, ScatterGatherConfig,
    Target,
};
pub use sequence::SequenceMediator;
