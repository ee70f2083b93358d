//! 组合根
//!
//! 按配置装配任务存储、批量队列、调度核心和内置执行器，
//! 并在启动时写入配置声明的系统任务。

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use indexflow_core::AppConfig;
use indexflow_dispatcher::{IngestExecutor, NoopExecutor, TaskScheduler, TaskSchedulerBuilder};
use indexflow_domain::{Clock, DocumentSink, SystemClock, TaskDraft, TaskService};
use indexflow_infrastructure::{AllowAllAccessResolver, HttpIndexingClient, SqliteTaskRepository};
use indexflow_pipeline::BatchQueueManager;

pub struct Application {
    scheduler: Arc<TaskScheduler>,
    pipeline: Arc<BatchQueueManager>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let task_repo = Arc::new(
            SqliteTaskRepository::new_embedded(
                &config.database.url,
                config.database.max_connections,
            )
            .await
            .context("初始化任务存储失败")?,
        );

        let indexing_client =
            Arc::new(HttpIndexingClient::new(&config.index_engine).context("初始化索引客户端失败")?);
        let pipeline = Arc::new(BatchQueueManager::new(
            indexing_client,
            Arc::clone(&clock),
            config.batch.clone(),
        ));

        let task_service = TaskService::new(
            task_repo.clone(),
            Arc::new(AllowAllAccessResolver),
            Arc::clone(&clock),
            config.task_defaults.clone(),
        );
        for seed in &config.system_tasks {
            let draft = TaskDraft {
                id: None,
                name: seed.name.clone(),
                task_type: seed.task_type.clone(),
                project_id: None,
                params: seed.params.clone(),
                enabled: Some(seed.enabled),
                startrun: Some(seed.startrun),
                interval_seconds: seed.interval_seconds,
            };
            match task_service
                .upsert_user_task(&config.scheduler.system_user, draft)
                .await
            {
                Ok(task) => info!(
                    "系统任务 '{}' 就绪 [类型:{}, 下次执行:{}]",
                    task.name, task.task_type, task.next_run_time
                ),
                Err(err) => warn!("系统任务 '{}' 写入失败: {}", seed.name, err),
            }
        }

        let sink: Arc<dyn DocumentSink> = pipeline.clone();
        let scheduler = TaskSchedulerBuilder::new(task_repo, config.scheduler.clone())
            .clock(clock)
            .register_executor("noop", Arc::new(NoopExecutor))
            .register_executor("ingest", Arc::new(IngestExecutor::new(sink)))
            .build();

        Ok(Self { scheduler, pipeline })
    }

    pub async fn start(&self) -> Result<()> {
        self.pipeline.start().await?;
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("开始优雅停机");
        self.scheduler.stop().await;
        // 调度循环停止后再排空批量队列
        self.pipeline.stop().await;
        info!("停机完成");
    }
}
