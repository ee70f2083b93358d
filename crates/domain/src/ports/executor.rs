use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexflow_core::SchedulerResult;
use tokio_util::sync::CancellationToken;

use crate::models::Task;

/// 任务执行上下文
///
/// 超时回收只保证任务记录被重置，不保证底层协程停止；
/// 执行器应在阻塞点关注取消信号以便配合回收。
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub cancellation: CancellationToken,
    /// 租约到期时刻，超过后任务会被强制回收
    pub deadline: DateTime<Utc>,
}

/// 任务执行器接口
///
/// 每种任务类型注册一个执行器。执行器返回的错误只记录到
/// 任务记录的error字段，不会影响调度循环或其他任务。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext, task: &Task) -> SchedulerResult<()>;
}
