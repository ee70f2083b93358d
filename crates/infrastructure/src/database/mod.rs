mod memory_task_repository;
mod sqlite_task_repository;

pub use memory_task_repository::MemoryTaskRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
