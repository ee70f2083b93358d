mod document;
mod task;

pub use document::{IndexDestination, IndexDocument};
pub use task::{
    blend_average_runtime, RunCompletion, Task, TaskFilter, DEFAULT_INTERVAL_SECONDS,
    RUNTIME_EMA_WEIGHT,
};
