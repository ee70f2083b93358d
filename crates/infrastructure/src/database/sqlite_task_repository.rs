use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, SqlitePool};
use tracing::debug;

use indexflow_core::{SchedulerError, SchedulerResult};
use indexflow_domain::{RunCompletion, Task, TaskFilter, TaskRepository};

/// SQLite任务仓储
///
/// 租约通过单条 `UPDATE ... WHERE running = 0` 条件更新实现，
/// 并发租约方恰有一个观察到受影响行数为1。
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建嵌入式SQLite仓储并初始化表结构
    pub async fn new_embedded(database_url: &str, max_connections: u32) -> SchedulerResult<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        debug!("打开任务存储: {}", database_url);
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                name TEXT NOT NULL,
                username TEXT NOT NULL,
                project_id INTEGER,
                params TEXT NOT NULL DEFAULT '{}',
                enabled INTEGER NOT NULL DEFAULT 1,
                startrun INTEGER NOT NULL DEFAULT 0,
                interval_seconds INTEGER NOT NULL DEFAULT 3600,
                running INTEGER NOT NULL DEFAULT 0,
                last_run_time INTEGER NOT NULL DEFAULT 0,
                next_run_time INTEGER NOT NULL DEFAULT 0,
                avg_runtime REAL NOT NULL DEFAULT 0,
                last_error TEXT,
                UNIQUE(username, name, task_type)
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(enabled, running, next_run_time)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_username ON tasks(username)",
        ];
        for index in indexes {
            sqlx::query(index).execute(pool).await?;
        }
        Ok(())
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let params_text: String = row.try_get("params")?;
        let params = serde_json::from_str(&params_text)
            .map_err(|err| SchedulerError::Serialization(format!("params解析失败: {err}")))?;
        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            name: row.try_get("name")?,
            username: row.try_get("username")?,
            project_id: row.try_get("project_id")?,
            params,
            enabled: row.try_get("enabled")?,
            startrun: row.try_get("startrun")?,
            interval_seconds: row.try_get("interval_seconds")?,
            running: row.try_get("running")?,
            last_run_time: row.try_get("last_run_time")?,
            next_run_time: row.try_get("next_run_time")?,
            avg_runtime: row.try_get("avg_runtime")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let params_text = serde_json::to_string(&task.params)?;
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                task_type, name, username, project_id, params, enabled, startrun,
                interval_seconds, running, last_run_time, next_run_time, avg_runtime, last_error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_type)
        .bind(&task.name)
        .bind(&task.username)
        .bind(task.project_id)
        .bind(&params_text)
        .bind(task.enabled)
        .bind(task.startrun)
        .bind(task.interval_seconds)
        .bind(task.running)
        .bind(task.last_run_time)
        .bind(task.next_run_time)
        .bind(task.avg_runtime)
        .bind(task.last_error.as_deref())
        .execute(&self.pool)
        .await?;

        let mut created = task.clone();
        created.id = result.last_insert_rowid();
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn get_by_identity(
        &self,
        username: &str,
        name: &str,
        task_type: &str,
    ) -> SchedulerResult<Option<Task>> {
        let row =
            sqlx::query("SELECT * FROM tasks WHERE username = ? AND name = ? AND task_type = ?")
                .bind(username)
                .bind(name)
                .bind(task_type)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        let params_text = serde_json::to_string(&task.params)?;
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET name = ?, project_id = ?, params = ?, enabled = ?, startrun = ?,
                interval_seconds = ?, next_run_time = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.name)
        .bind(task.project_id)
        .bind(&params_text)
        .bind(task.enabled)
        .bind(task.startrun)
        .bind(task.interval_seconds)
        .bind(task.next_run_time)
        .bind(task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT * FROM tasks WHERE 1 = 1");
        if let Some(username) = &filter.username {
            builder.push(" AND username = ").push_bind(username);
        }
        if let Some(task_type) = &filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type);
        }
        if let Some(enabled) = filter.enabled {
            builder.push(" AND enabled = ").push_bind(enabled);
        }
        builder.push(" ORDER BY next_run_time");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_due(&self, now: i64) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE enabled = 1 AND running = 0 AND next_run_time < ?
            ORDER BY next_run_time
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn try_lease(&self, id: i64, lease_time: i64) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET running = 1, last_run_time = ?
            WHERE id = ? AND running = 0 AND enabled = 1
            "#,
        )
        .bind(lease_time)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_run(&self, id: i64, completion: &RunCompletion) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET running = 0,
                next_run_time = ?,
                avg_runtime = ?,
                last_error = ?,
                enabled = CASE WHEN ? THEN 0 ELSE enabled END
            WHERE id = ?
            "#,
        )
        .bind(completion.next_run_time)
        .bind(completion.avg_runtime)
        .bind(completion.error.as_deref())
        .bind(completion.disable)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn record_error(&self, id: i64, message: &str) -> SchedulerResult<()> {
        sqlx::query("UPDATE tasks SET last_error = ? WHERE id = ?")
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
