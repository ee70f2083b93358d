//! 系统配置
//!
//! 配置按子系统分节，全部带默认值，可被TOML配置文件和
//! `INDEXFLOW_` 前缀的环境变量逐层覆盖。

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// 任务存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite连接串，例如 `sqlite://indexflow.db`
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://indexflow.db".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库连接串不能为空"));
        }
        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("数据库连接数必须大于0"));
        }
        Ok(())
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 轮询周期（秒）
    pub poll_interval_seconds: u64,
    /// 任务执行的最大并发数，同时也是唯一的准入控制
    pub max_concurrent_tasks: usize,
    /// 任务被判定为挂起并强制回收的时限（秒）
    pub task_timeout_seconds: i64,
    /// 系统任务归属的用户名
    pub system_user: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            max_concurrent_tasks: 4,
            task_timeout_seconds: 3600,
            system_user: "system".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询周期必须大于0"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }
        if self.task_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }
        if self.system_user.is_empty() {
            return Err(anyhow::anyhow!("系统用户名不能为空"));
        }
        Ok(())
    }
}

/// 批量队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// 批量触发评估周期（秒）
    pub evaluate_interval_seconds: u64,
    /// 触发提交的累计权重阈值
    pub size_threshold: u64,
    /// 队列最大滞留时间（秒），超过即提交
    pub expiry_seconds: i64,
    /// 达到该优先级的文档绕过队列直接提交
    pub bypass_priority: i32,
    /// 并发提交上限
    pub flush_workers: usize,
    /// 提交失败的重试间隔（毫秒）
    pub flush_retry_delay_ms: u64,
    /// 提交失败的累计重试时限（毫秒），超过即丢弃该批
    pub flush_retry_max_elapsed_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            evaluate_interval_seconds: 10,
            size_threshold: 100,
            expiry_seconds: 30,
            bypass_priority: 100,
            flush_workers: 2,
            flush_retry_delay_ms: 2_000,
            flush_retry_max_elapsed_ms: 10_000,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.evaluate_interval_seconds == 0 {
            return Err(anyhow::anyhow!("批量评估周期必须大于0"));
        }
        if self.size_threshold == 0 {
            return Err(anyhow::anyhow!("批量权重阈值必须大于0"));
        }
        if self.expiry_seconds <= 0 {
            return Err(anyhow::anyhow!("队列滞留时限必须大于0"));
        }
        if self.flush_workers == 0 {
            return Err(anyhow::anyhow!("并发提交数必须大于0"));
        }
        Ok(())
    }
}

/// 下游索引引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexEngineConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for IndexEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9001".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl IndexEngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(anyhow::anyhow!("索引引擎地址不能为空"));
        }
        Ok(())
    }
}

/// 配置中声明的系统任务，启动时写入任务存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSeed {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub startrun: bool,
    pub interval_seconds: Option<i64>,
}

fn default_enabled() -> bool {
    true
}

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub index_engine: IndexEngineConfig,
    /// 按任务类型划分的参数默认模板，写入任务时合并
    #[serde(default)]
    pub task_defaults: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub system_tasks: Vec<TaskSeed>,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 加载顺序：内置默认值 → TOML配置文件 → `INDEXFLOW_` 环境变量。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/indexflow.toml", "indexflow.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("INDEXFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.scheduler.validate()?;
        self.batch.validate()?;
        self.index_engine.validate()?;
        for seed in &self.system_tasks {
            if seed.name.is_empty() || seed.task_type.is_empty() {
                return Err(anyhow::anyhow!("系统任务的名称和类型不能为空"));
            }
        }
        Ok(())
    }
}
