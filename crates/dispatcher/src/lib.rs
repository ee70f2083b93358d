pub mod executor_registry;
pub mod executors;
pub mod scheduler;

pub use executor_registry::ExecutorRegistry;
pub use executors::{IngestExecutor, NoopExecutor};
pub use scheduler::{TaskScheduler, TaskSchedulerBuilder, TIMEOUT_KILL_ERROR, UNKNOWN_TYPE_ERROR};
