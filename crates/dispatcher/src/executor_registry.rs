//! 执行器注册表
//!
//! 任务类型到执行器的映射。注册在调度器启动前通过构建器完成，
//! 启动后不再变更；新增任务类型只需注册新执行器，不触及调度内部。

use std::collections::HashMap;
use std::sync::Arc;

use indexflow_domain::TaskExecutor;

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(task_type.into(), executor);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indexflow_core::SchedulerResult;
    use indexflow_domain::{ExecutionContext, Task};

    struct DummyExecutor;

    #[async_trait]
    impl TaskExecutor for DummyExecutor {
        async fn execute(&self, _ctx: &ExecutionContext, _task: &Task) -> SchedulerResult<()> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.is_empty());

        registry.register("ingest", Arc::new(DummyExecutor));
        assert!(registry.contains("ingest"));
        assert!(!registry.contains("retrain"));
        assert!(registry.get("ingest").is_some());
        assert!(registry.get("retrain").is_none());
        assert_eq!(registry.len(), 1);
    }
}
