pub mod batch_queue;

pub use batch_queue::BatchQueueManager;
