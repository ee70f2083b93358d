use async_trait::async_trait;
use indexflow_core::SchedulerResult;

use crate::models::{IndexDestination, IndexDocument};

/// 下游索引引擎客户端
#[async_trait]
pub trait IndexingClient: Send + Sync {
    /// 将一批文档提交到目标库，整批成功或整批失败
    async fn flush(
        &self,
        destination: &IndexDestination,
        documents: &[IndexDocument],
    ) -> SchedulerResult<()>;
}

/// 面向生产者的文档入口
///
/// 执行器通过该接口发出文档；实现方（批量队列）保证调用
/// 从不阻塞在网络I/O上。
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn submit(
        &self,
        destination: IndexDestination,
        documents: Vec<IndexDocument>,
        priority: i32,
    );
}
