pub mod config;
pub mod errors;
pub mod retry;

pub use config::{
    AppConfig, BatchConfig, DatabaseConfig, IndexEngineConfig, SchedulerConfig, TaskSeed,
};
pub use errors::{SchedulerError, SchedulerResult};
pub use retry::{retry_with_backoff, RetryPolicy};
