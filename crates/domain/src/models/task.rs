use serde::{Deserialize, Serialize};

/// 任务未显式指定执行间隔时的默认值（秒）
pub const DEFAULT_INTERVAL_SECONDS: i64 = 3600;

/// 平均运行时长的指数滑动平均权重，每个样本各占一半
pub const RUNTIME_EMA_WEIGHT: f64 = 0.5;

/// 任务定义
///
/// 表示一个归属于某用户、按固定间隔重复执行的后台任务。
/// 调度状态（`running`、`next_run_time` 等）由任务存储持久化，
/// 且只能通过调度器的租约更新路径变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// 任务类型，作为执行器注册表的键，创建后不可变
    #[serde(rename = "type")]
    pub task_type: String,
    /// 人类可读名称；id缺失时与 `(username, type)` 一起作为身份键
    pub name: String,
    /// 归属用户
    pub username: String,
    /// 关联的项目，写入时用于鉴权
    pub project_id: Option<i64>,
    /// 执行器自定义参数，写入时与按类型的默认模板合并
    pub params: serde_json::Value,
    pub enabled: bool,
    /// 为true时首次调度立即执行，否则等待一个完整间隔
    pub startrun: bool,
    /// 两次完成之间的间隔（秒）
    pub interval_seconds: i64,
    /// 租约标志，成功租约到完成/超时回收之间为true
    pub running: bool,
    /// 最近一次租约时间（epoch秒）
    pub last_run_time: i64,
    /// 下次到期时间（epoch秒）
    pub next_run_time: i64,
    /// 运行时长的指数滑动平均（秒）
    pub avg_runtime: f64,
    /// 最近一次运行的错误，成功时清空
    pub last_error: Option<String>,
}

impl Task {
    pub fn is_due(&self, now: i64) -> bool {
        self.enabled && !self.running && self.next_run_time < now
    }

    /// 以本次运行时长更新平均运行时长
    pub fn next_average_runtime(&self, elapsed_seconds: f64) -> f64 {
        blend_average_runtime(self.avg_runtime, elapsed_seconds)
    }
}

/// 指数滑动平均，新样本权重0.5
pub fn blend_average_runtime(average: f64, sample: f64) -> f64 {
    if average <= 0.0 {
        return sample.max(0.0);
    }
    average * (1.0 - RUNTIME_EMA_WEIGHT) + sample.max(0.0) * RUNTIME_EMA_WEIGHT
}

/// 任务查询过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub username: Option<String>,
    pub task_type: Option<String>,
    pub enabled: Option<bool>,
    pub limit: Option<i64>,
}

/// 一次运行结束时写回任务存储的字段
///
/// 由调度器在回收时计算，存储侧只负责持久化并清除 `running` 标志。
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub completed_at: i64,
    pub next_run_time: i64,
    pub avg_runtime: f64,
    pub error: Option<String>,
    /// 间隔不为正的任务在完成后停用，不再重新排队
    pub disable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: 1,
            task_type: "ingest".to_string(),
            name: "rss-news".to_string(),
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

    #[test]
    fn due_requires_enabled_idle_and_elapsed() {
        let task = sample_task();
        assert!(!task.is_due(100));
        assert!(task.is_due(101));

        let disabled = Task {
            enabled: false,
            ..sample_task()
        };
        assert!(!disabled.is_due(1_000));

        let running = Task {
            running: true,
            ..sample_task()
        };
        assert!(!running.is_due(1_000));
    }

    #[test]
    fn average_runtime_converges_to_constant_sample() {
        let mut avg = 0.0;
        for _ in 0..10 {
            avg = blend_average_runtime(avg, 8.0);
        }
        assert!((avg - 8.0).abs() < 0.05, "avg={avg}");
    }

    #[test]
    fn average_runtime_first_sample_taken_as_is() {
        assert_eq!(blend_average_runtime(0.0, 5.0), 5.0);
        assert_eq!(blend_average_runtime(4.0, 8.0), 6.0);
    }

    #[test]
    fn average_runtime_never_negative() {
        assert_eq!(blend_average_runtime(0.0, -1.0), 0.0);
        assert!(blend_average_runtime(2.0, -1.0) >= 0.0);
    }

    #[test]
    fn task_type_serializes_as_type() {
        let task = sample_task();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "ingest");
        assert!(json.get("task_type").is_none());
    }
}
