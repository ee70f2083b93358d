pub mod access;
pub mod database;
pub mod indexing;

pub use access::{AllowAllAccessResolver, StaticAccessResolver};
pub use database::{MemoryTaskRepository, SqliteTaskRepository};
pub use indexing::HttpIndexingClient;
