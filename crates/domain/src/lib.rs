pub mod models;
pub mod ports;
pub mod repositories;
pub mod services;

pub use models::{
    blend_average_runtime, IndexDestination, IndexDocument, RunCompletion, Task, TaskFilter,
};
pub use ports::{
    AccessResolver, Clock, DocumentSink, ExecutionContext, IndexingClient, ManualClock,
    SystemClock, TaskExecutor,
};
pub use repositories::TaskRepository;
pub use services::{TaskDraft, TaskService};
