mod access;
mod clock;
mod executor;
mod indexing;

pub use access::AccessResolver;
pub use clock::{Clock, ManualClock, SystemClock};
pub use executor::{ExecutionContext, TaskExecutor};
pub use indexing::{DocumentSink, IndexingClient};
