//! 内置执行器
//!
//! 领域相关的任务体（抓取、同步、训练）由使用方注册；这里只提供
//! 两个通用执行器：空转执行器用于联调和烟雾测试，静态提交执行器
//! 把任务参数里携带的文档送进批量队列。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use indexflow_core::{SchedulerError, SchedulerResult};
use indexflow_domain::{
    DocumentSink, ExecutionContext, IndexDestination, IndexDocument, Task, TaskExecutor,
};

/// 空转执行器
///
/// 按 `params.sleep_ms` 睡眠指定时长，期间响应取消信号。
pub struct NoopExecutor;

#[async_trait]
impl TaskExecutor for NoopExecutor {
    async fn execute(&self, ctx: &ExecutionContext, task: &Task) -> SchedulerResult<()> {
        let sleep_ms = task
            .params
            .get("sleep_ms")
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        if sleep_ms == 0 {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => Ok(()),
            _ = ctx.cancellation.cancelled() => {
                Err(SchedulerError::TaskExecution("cancelled".to_string()))
            }
        }
    }
}

/// 静态提交执行器
///
/// 从 `params` 读取目标库和文档列表并提交到批量队列，
/// 是管理员做单条修正或小批量补录的入口。
pub struct IngestExecutor {
    sink: Arc<dyn DocumentSink>,
}

impl IngestExecutor {
    pub fn new(sink: Arc<dyn DocumentSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl TaskExecutor for IngestExecutor {
    async fn execute(&self, _ctx: &ExecutionContext, task: &Task) -> SchedulerResult<()> {
        let database = task
            .params
            .get("database")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                SchedulerError::InvalidTaskParams("ingest任务缺少database参数".to_string())
            })?;
        let priority = task
            .params
            .get("priority")
            .and_then(|value| value.as_i64())
            .unwrap_or(0) as i32;
        let documents: Vec<IndexDocument> = match task.params.get("documents") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };
        if documents.is_empty() {
            debug!("任务 '{}' 没有待提交的文档", task.name);
            return Ok(());
        }

        let destination = IndexDestination::new(database).with_priority(priority);
        debug!(
            "任务 '{}' 提交 {} 个文档 [库:{}, 优先级:{}]",
            task.name,
            documents.len(),
            database,
            priority
        );
        self.sink.submit(destination, documents, priority).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingSink {
        submissions: Mutex<Vec<(IndexDestination, Vec<IndexDocument>, i32)>>,
    }

    #[async_trait]
    impl DocumentSink for RecordingSink {
        async fn submit(
            &self,
            destination: IndexDestination,
            documents: Vec<IndexDocument>,
            priority: i32,
        ) {
            self.submissions
                .lock()
                .unwrap()
                .push((destination, documents, priority));
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            cancellation: CancellationToken::new(),
            deadline: Utc::now() + chrono::Duration::seconds(3600),
        }
    }

    fn task_with_params(params: serde_json::Value) -> Task {
        Task {
            id: 1,
            task_type: "ingest".to_string(),
            name: "manual-fix".to_string(),
            username: "admin".to_string(),
            project_id: None,
            params,
            enabled: true,
            startrun: false,
            interval_seconds: 60,
            running: true,
            last_run_time: 0,
            next_run_time: 0,
            avg_runtime: 0.0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn ingest_submits_documents_from_params() {
        let sink = Arc::new(RecordingSink::default());
        let executor = IngestExecutor::new(sink.clone());
        let task = task_with_params(json!({
            "database": "RSS_FEEDS",
            "priority": 100,
            "documents": [
                {"reference": "https://example.com/a", "content": "breaking news"}
            ]
        }));

        executor.execute(&ctx(), &task).await.unwrap();

        let submissions = sink.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        let (destination, documents, priority) = &submissions[0];
        assert_eq!(destination.database, "RSS_FEEDS");
        assert_eq!(documents[0].reference, "https://example.com/a");
        assert_eq!(*priority, 100);
    }

    #[tokio::test]
    async fn ingest_without_database_is_invalid() {
        let sink = Arc::new(RecordingSink::default());
        let executor = IngestExecutor::new(sink.clone());
        let task = task_with_params(json!({"documents": []}));

        let result = executor.execute(&ctx(), &task).await;
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidTaskParams(_))
        ));
        assert!(sink.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ingest_with_no_documents_is_a_noop() {
        let sink = Arc::new(RecordingSink::default());
        let executor = IngestExecutor::new(sink.clone());
        let task = task_with_params(json!({"database": "RSS_FEEDS"}));

        executor.execute(&ctx(), &task).await.unwrap();
        assert!(sink.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn noop_honors_cancellation() {
        let executor = NoopExecutor;
        let context = ctx();
        let task = task_with_params(json!({"sleep_ms": 60_000}));

        context.cancellation.cancel();
        let result = executor.execute(&context, &task).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn noop_without_sleep_finishes_immediately() {
        let executor = NoopExecutor;
        let task = task_with_params(json!({}));
        assert!(executor.execute(&ctx(), &task).await.is_ok());
    }
}
