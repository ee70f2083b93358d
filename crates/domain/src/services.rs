//! 任务写入服务
//!
//! 外围HTTP/CLI入口通过此服务创建和更新任务：合并按类型的参数
//! 默认模板、校验项目访问权，并按 `(username, name, type)` 身份键
//! 做幂等写入。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use indexflow_core::{SchedulerError, SchedulerResult};

use crate::models::{Task, TaskFilter, DEFAULT_INTERVAL_SECONDS};
use crate::ports::{AccessResolver, Clock};
use crate::repositories::TaskRepository;

/// 任务写入请求
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub id: Option<i64>,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub project_id: Option<i64>,
    #[serde(default)]
    pub params: Value,
    pub enabled: Option<bool>,
    pub startrun: Option<bool>,
    pub interval_seconds: Option<i64>,
}

pub struct TaskService {
    task_repo: Arc<dyn TaskRepository>,
    access: Arc<dyn AccessResolver>,
    clock: Arc<dyn Clock>,
    /// 按任务类型的参数默认模板
    defaults: HashMap<String, Value>,
}

impl TaskService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        access: Arc<dyn AccessResolver>,
        clock: Arc<dyn Clock>,
        defaults: HashMap<String, Value>,
    ) -> Self {
        Self {
            task_repo,
            access,
            clock,
            defaults,
        }
    }

    /// 创建或更新用户任务
    ///
    /// 已存在的任务（按id或身份键命中）保留其运行状态和统计字段，
    /// 只更新定义部分；新任务按 `startrun` 决定首次到期时间。
    pub async fn upsert_user_task(&self, username: &str, draft: TaskDraft) -> SchedulerResult<Task> {
        if draft.name.trim().is_empty() || draft.task_type.trim().is_empty() {
            return Err(SchedulerError::InvalidTaskParams(
                "任务名称和类型不能为空".to_string(),
            ));
        }
        let interval = draft.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS);
        if interval <= 0 {
            return Err(SchedulerError::InvalidTaskParams(format!(
                "执行间隔必须为正数: {interval}"
            )));
        }
        if let Some(project_id) = draft.project_id {
            if !self.access.has_access(username, project_id).await? {
                return Err(SchedulerError::AccessDenied {
                    username: username.to_string(),
                    project_id,
                });
            }
        }

        let params = self.merged_params(&draft.task_type, &draft.params)?;
        let now = self.clock.epoch_seconds();

        let existing = match draft.id {
            Some(id) => {
                let task = self
                    .task_repo
                    .get_by_id(id)
                    .await?
                    .ok_or(SchedulerError::TaskNotFound { id })?;
                if task.username != username {
                    return Err(SchedulerError::InvalidTaskParams(format!(
                        "任务 {id} 不属于用户 {username}"
                    )));
                }
                if task.task_type != draft.task_type {
                    return Err(SchedulerError::InvalidTaskParams(format!(
                        "任务类型不可变更: {} -> {}",
                        task.task_type, draft.task_type
                    )));
                }
                Some(task)
            }
            None => {
                self.task_repo
                    .get_by_identity(username, &draft.name, &draft.task_type)
                    .await?
            }
        };

        let startrun = draft.startrun.unwrap_or(false);

        match existing {
            Some(mut task) => {
                task.name = draft.name;
                task.project_id = draft.project_id;
                task.params = params;
                task.interval_seconds = interval;
                task.startrun = startrun;
                if let Some(enabled) = draft.enabled {
                    task.enabled = enabled;
                }
                if startrun {
                    task.next_run_time = now;
                }
                self.task_repo.update(&task).await?;
                info!("更新任务 '{}' (用户 {})", task.name, username);
                Ok(task)
            }
            None => {
                let task = Task {
                    id: 0,
                    task_type: draft.task_type,
                    name: draft.name,
                    username: username.to_string(),
                    project_id: draft.project_id,
                    params,
                    enabled: draft.enabled.unwrap_or(true),
                    startrun,
                    interval_seconds: interval,
                    running: false,
                    last_run_time: 0,
                    next_run_time: if startrun { now } else { now + interval },
                    avg_runtime: 0.0,
                    last_error: None,
                };
                let created = self.task_repo.create(&task).await?;
                info!(
                    "创建任务 '{}' (用户 {}, 类型 {}, 下次执行 {})",
                    created.name, username, created.task_type, created.next_run_time
                );
                Ok(created)
            }
        }
    }

    pub async fn list_user_tasks(&self, username: &str) -> SchedulerResult<Vec<Task>> {
        let filter = TaskFilter {
            username: Some(username.to_string()),
            ..TaskFilter::default()
        };
        self.task_repo.list(&filter).await
    }

    /// 模板键未被请求覆盖时继承默认值，被覆盖时以请求为准
    fn merged_params(&self, task_type: &str, overrides: &Value) -> SchedulerResult<Value> {
        let mut merged = match self.defaults.get(task_type) {
            Some(Value::Object(template)) => template.clone(),
            _ => serde_json::Map::new(),
        };
        match overrides {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
            other => {
                return Err(SchedulerError::InvalidTaskParams(format!(
                    "params必须是对象: {other}"
                )));
            }
        }
        Ok(Value::Object(merged))
    }
}
