use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use indexflow_core::{SchedulerError, SchedulerResult};
use indexflow_domain::{RunCompletion, Task, TaskFilter, TaskRepository};

/// 内存任务仓储，供测试和嵌入式运行使用
///
/// 租约在写锁内检查并置位，与SQLite实现一样满足
/// "并发租约恰有一个成功"。
#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: RwLock<HashMap<i64, Task>>,
    next_id: AtomicI64,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let mut tasks = self.tasks.write().await;
        let duplicate = tasks.values().any(|existing| {
            existing.username == task.username
                && existing.name == task.name
                && existing.task_type == task.task_type
        });
        if duplicate {
            return Err(SchedulerError::DatabaseOperation(format!(
                "任务身份键重复: ({}, {}, {})",
                task.username, task.name, task.task_type
            )));
        }
        let mut created = task.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn get_by_identity(
        &self,
        username: &str,
        name: &str,
        task_type: &str,
    ) -> SchedulerResult<Option<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .find(|task| {
                task.username == username && task.name == name && task.task_type == task_type
            })
            .cloned())
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or(SchedulerError::TaskNotFound { id: task.id })?;
        stored.name = task.name.clone();
        stored.project_id = task.project_id;
        stored.params = task.params.clone();
        stored.enabled = task.enabled;
        stored.startrun = task.startrun;
        stored.interval_seconds = task.interval_seconds;
        stored.next_run_time = task.next_run_time;
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|task| {
                filter
                    .username
                    .as_ref()
                    .map(|username| &task.username == username)
                    .unwrap_or(true)
                    && filter
                        .task_type
                        .as_ref()
                        .map(|task_type| &task.task_type == task_type)
                        .unwrap_or(true)
                    && filter
                        .enabled
                        .map(|enabled| task.enabled == enabled)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|task| task.next_run_time);
        if let Some(limit) = filter.limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn find_due(&self, now: i64) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<Task> = tasks
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|task| task.next_run_time);
        Ok(due)
    }

    async fn try_lease(&self, id: i64, lease_time: i64) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.running || !task.enabled {
            return Ok(false);
        }
        task.running = true;
        task.last_run_time = lease_time;
        Ok(true)
    }

    async fn complete_run(&self, id: i64, completion: &RunCompletion) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        task.running = false;
        task.next_run_time = completion.next_run_time;
        task.avg_runtime = completion.avg_runtime;
        task.last_error = completion.error.clone();
        if completion.disable {
            task.enabled = false;
        }
        Ok(())
    }

    async fn record_error(&self, id: i64, message: &str) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        task.last_error = Some(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn task(name: &str) -> Task {
        Task {
            id: 0,
            task_type: "ingest".to_string(),
            name: name.to_string(),
            username: "admin".to_string(),
            project_id: None,
            params: serde_json::json!({}),
            enabled: true,
            startrun: false,
            interval_seconds: 60,
            running: false,
            last_run_time: 0,
            next_run_time: 100,
            avg_runtime: 0.0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn simultaneous_leases_have_one_winner() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let created = repo.create(&task("contested")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let id = created.id;
            handles.push(tokio::spawn(
                async move { repo.try_lease(id, 500).await },
            ));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn due_scan_skips_leased_tasks() {
        let repo = MemoryTaskRepository::new();
        let created = repo.create(&task("feeds")).await.unwrap();
        assert_eq!(repo.find_due(200).await.unwrap().len(), 1);

        assert!(repo.try_lease(created.id, 150).await.unwrap());
        assert!(repo.find_due(200).await.unwrap().is_empty());

        repo.complete_run(
            created.id,
            &RunCompletion {
                completed_at: 160,
                next_run_time: 220,
                avg_runtime: 10.0,
                error: None,
                disable: false,
            },
        )
        .await
        .unwrap();
        assert!(repo.find_due(220).await.unwrap().is_empty());
        assert_eq!(repo.find_due(221).await.unwrap().len(), 1);
    }
}
