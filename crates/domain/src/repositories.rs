//! 任务存储接口
//!
//! 任务存储是 `running`/`next_run_time` 的唯一事实来源。
//! 所有状态变更都经过这里的条件更新，避免重复执行竞态。

use async_trait::async_trait;
use indexflow_core::SchedulerResult;

use crate::models::{RunCompletion, Task, TaskFilter};

/// 任务仓储接口
///
/// 实现必须是线程安全的，且 `try_lease` 必须是单条记录上的
/// 原子条件更新：两个并发租约恰有一个成功。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建新任务，返回带存储生成id的任务
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;

    /// 根据id获取任务
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;

    /// 根据身份键 `(username, name, type)` 获取任务
    async fn get_by_identity(
        &self,
        username: &str,
        name: &str,
        task_type: &str,
    ) -> SchedulerResult<Option<Task>>;

    /// 更新任务定义（参数、开关、间隔等）
    async fn update(&self, task: &Task) -> SchedulerResult<()>;

    /// 按过滤条件查询任务列表
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;

    /// 查询到期任务: `enabled AND NOT running AND next_run_time < now`
    async fn find_due(&self, now: i64) -> SchedulerResult<Vec<Task>>;

    /// 尝试租约：以 `running=false` 为条件原子置位
    /// `running=true, last_run_time=lease_time`。
    ///
    /// 返回false表示其他执行方已持有租约，调用方不得执行该任务。
    async fn try_lease(&self, id: i64, lease_time: i64) -> SchedulerResult<bool>;

    /// 运行结束回写：清除 `running`，写入下次到期时间、
    /// 平均运行时长和错误信息
    async fn complete_run(&self, id: i64, completion: &RunCompletion) -> SchedulerResult<()>;

    /// 只记录错误信息，不涉及租约状态（如未注册的任务类型）
    async fn record_error(&self, id: i64, message: &str) -> SchedulerResult<()>;
}
