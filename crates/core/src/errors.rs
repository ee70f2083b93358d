use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("未注册的任务类型: {0}")]
    UnknownTaskType(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("用户 {username} 无权访问项目 {project_id}")]
    AccessDenied { username: String, project_id: i64 },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("调度器已启动")]
    AlreadyStarted,

    #[error("索引引擎错误: {0}")]
    IndexEngine(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
