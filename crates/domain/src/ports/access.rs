use async_trait::async_trait;
use indexflow_core::SchedulerResult;

/// 用户/项目鉴权
///
/// 任务引用项目时在写入前校验归属用户的访问权。
#[async_trait]
pub trait AccessResolver: Send + Sync {
    async fn has_access(&self, username: &str, project_id: i64) -> SchedulerResult<bool>;
}
