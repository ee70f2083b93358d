//! 批量索引队列
//!
//! 把众多并发执行器产出的文档按目标指纹聚合，在权重或滞留时间
//! 达到阈值时整批提交给下游索引引擎。积累路径只操作内存队列，
//! 从不触碰网络；提交在独立的受限工作集上异步执行，慢的下游
//! 调用不会拖慢生产者，也不会拖慢触发评估。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use indexflow_core::{retry_with_backoff, BatchConfig, RetryPolicy, SchedulerError};
use indexflow_domain::{Clock, DocumentSink, IndexDestination, IndexDocument, IndexingClient};

/// 单个指纹的驻留队列
///
/// 提交时内容被整体换出、槽位清空复用，`arrived_at` 在下一个
/// 窗口的首条文档到达时重新记录。
struct BatchSlot {
    destination: IndexDestination,
    documents: Vec<IndexDocument>,
    /// 当前窗口首条文档的到达时间（epoch秒）
    arrived_at: i64,
}

impl BatchSlot {
    fn weight(&self) -> u64 {
        self.documents.len() as u64
    }
}

/// 批量队列管理器
pub struct BatchQueueManager {
    client: Arc<dyn IndexingClient>,
    clock: Arc<dyn Clock>,
    config: BatchConfig,
    retry: RetryPolicy,
    /// 指纹到驻留队列的映射；锁内不做任何await
    queues: Mutex<HashMap<u64, BatchSlot>>,
    /// 并发提交上限
    flush_slots: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    evaluator: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl BatchQueueManager {
    pub fn new(client: Arc<dyn IndexingClient>, clock: Arc<dyn Clock>, config: BatchConfig) -> Self {
        let retry = RetryPolicy::new(
            config.flush_retry_delay_ms,
            config.flush_retry_max_elapsed_ms,
        );
        let flush_slots = Arc::new(Semaphore::new(config.flush_workers));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            client,
            clock,
            config,
            retry,
            queues: Mutex::new(HashMap::new()),
            flush_slots,
            shutdown_tx,
            evaluator: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// 启动后台触发评估循环
    pub async fn start(self: &Arc<Self>) -> indexflow_core::SchedulerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.config.evaluate_interval_seconds);
        let handle = tokio::spawn(async move {
            info!(
                "批量队列评估启动 [周期:{}s, 权重阈值:{}, 滞留上限:{}s]",
                manager.config.evaluate_interval_seconds,
                manager.config.size_threshold,
                manager.config.expiry_seconds
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.evaluate_once().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("批量队列评估退出");
        });
        *self.evaluator.lock().await = Some(handle);
        Ok(())
    }

    /// 停止评估循环并把所有驻留文档提交出去
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.evaluator.lock().await.take() {
            let _ = handle.await;
        }
        self.drain().await;
    }

    /// 对每个非空队列评估一次触发条件：权重达到阈值或滞留超时
    pub async fn evaluate_once(&self) {
        let now = self.clock.epoch_seconds();
        let ready = {
            let mut queues = self.queues.lock().await;
            let mut ready = Vec::new();
            for slot in queues.values_mut() {
                if slot.documents.is_empty() {
                    continue;
                }
                let expired = now - slot.arrived_at > self.config.expiry_seconds;
                if slot.weight() >= self.config.size_threshold || expired {
                    ready.push((slot.destination.clone(), std::mem::take(&mut slot.documents)));
                }
            }
            ready
        };
        for (destination, documents) in ready {
            debug!(
                "触发批量提交 [库:{}, 文档:{}]",
                destination.database,
                documents.len()
            );
            self.spawn_flush(destination, documents);
        }
    }

    /// 把所有驻留文档提交出去并等待完成，用于优雅停机
    pub async fn drain(&self) {
        let pending = {
            let mut queues = self.queues.lock().await;
            queues
                .values_mut()
                .filter(|slot| !slot.documents.is_empty())
                .map(|slot| (slot.destination.clone(), std::mem::take(&mut slot.documents)))
                .collect::<Vec<_>>()
        };
        if pending.is_empty() {
            return;
        }
        info!("停机排空批量队列，共 {} 批", pending.len());
        let flushes = pending.into_iter().map(|(destination, documents)| {
            flush_batch(
                Arc::clone(&self.client),
                self.retry.clone(),
                destination,
                documents,
            )
        });
        futures::future::join_all(flushes).await;
    }

    /// 当前驻留的文档总数，用于观测
    pub async fn pending_documents(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.values().map(|slot| slot.documents.len()).sum()
    }

    fn spawn_flush(&self, destination: IndexDestination, documents: Vec<IndexDocument>) {
        let client = Arc::clone(&self.client);
        let retry = self.retry.clone();
        let slots = Arc::clone(&self.flush_slots);
        tokio::spawn(async move {
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            flush_batch(client, retry, destination, documents).await;
        });
    }
}

#[async_trait]
impl DocumentSink for BatchQueueManager {
    async fn submit(
        &self,
        destination: IndexDestination,
        documents: Vec<IndexDocument>,
        priority: i32,
    ) {
        if documents.is_empty() {
            return;
        }
        if priority >= self.config.bypass_priority {
            debug!(
                "高优先级提交绕过队列 [库:{}, 文档:{}, 优先级:{}]",
                destination.database,
                documents.len(),
                priority
            );
            self.spawn_flush(destination, documents);
            return;
        }

        let now = self.clock.epoch_seconds();
        let mut queues = self.queues.lock().await;
        let fingerprint = destination.fingerprint();
        let slot = queues.entry(fingerprint).or_insert_with(|| BatchSlot {
            destination: destination.clone(),
            documents: Vec::new(),
            arrived_at: now,
        });
        if slot.documents.is_empty() {
            slot.arrived_at = now;
        }
        slot.documents.extend(documents);
    }
}

/// 带重试的单批提交；重试耗尽后丢弃该批，只留下错误日志，
/// 不回灌驻留队列。
async fn flush_batch(
    client: Arc<dyn IndexingClient>,
    retry: RetryPolicy,
    destination: IndexDestination,
    documents: Vec<IndexDocument>,
) {
    let count = documents.len();
    let result = retry_with_backoff(&retry, "index-flush", || {
        client.flush(&destination, &documents)
    })
    .await;
    match result {
        Ok(()) => info!(
            "批量提交完成 [库:{}, 文档:{}]",
            destination.database, count
        ),
        Err(err) => error!(
            "批量提交重试耗尽，丢弃 {} 个文档 [库:{}]: {}",
            count, destination.database, err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexflow_core::SchedulerResult;
    use indexflow_domain::ManualClock;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    struct RecordingClient {
        flushes: StdMutex<Vec<(IndexDestination, Vec<IndexDocument>)>>,
        fail_remaining: AtomicU32,
        attempts: AtomicU32,
    }

    impl RecordingClient {
        fn new() -> Self {
            Self {
                flushes: StdMutex::new(Vec::new()),
                fail_remaining: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
            }
        }

        fn failing(times: u32) -> Self {
            let client = Self::new();
            client.fail_remaining.store(times, Ordering::SeqCst);
            client
        }

        fn flushed(&self) -> Vec<(IndexDestination, Vec<IndexDocument>)> {
            self.flushes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IndexingClient for RecordingClient {
        async fn flush(
            &self,
            destination: &IndexDestination,
            documents: &[IndexDocument],
        ) -> SchedulerResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(SchedulerError::IndexEngine("engine unavailable".into()));
            }
            self.flushes
                .lock()
                .unwrap()
                .push((destination.clone(), documents.to_vec()));
            Ok(())
        }
    }

    fn doc(reference: &str) -> IndexDocument {
        IndexDocument {
            reference: reference.to_string(),
            content: format!("content of {reference}"),
            fields: vec![],
        }
    }

    fn docs(n: usize) -> Vec<IndexDocument> {
        (0..n).map(|i| doc(&format!("ref-{i}"))).collect()
    }

    fn small_config() -> BatchConfig {
        BatchConfig {
            size_threshold: 5,
            expiry_seconds: 30,
            bypass_priority: 100,
            ..BatchConfig::default()
        }
    }

    fn manager_with(client: Arc<RecordingClient>, clock: Arc<ManualClock>) -> BatchQueueManager {
        BatchQueueManager::new(client, clock, small_config())
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn size_trigger_flushes_whole_queue() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);

        let destination = IndexDestination::new("RSS_FEEDS");
        manager.submit(destination.clone(), docs(5), 0).await;
        assert_eq!(manager.pending_documents().await, 5);

        manager.evaluate_once().await;
        wait_until(|| !client.flushed().is_empty()).await;

        let flushed = client.flushed();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, destination);
        assert_eq!(flushed[0].1.len(), 5);
        // 槽位清空复用
        assert_eq!(manager.pending_documents().await, 0);
    }

    #[tokio::test]
    async fn below_threshold_and_fresh_stays_queued() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);

        manager
            .submit(IndexDestination::new("RSS_FEEDS"), docs(2), 0)
            .await;
        manager.evaluate_once().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(client.flushed().is_empty());
        assert_eq!(manager.pending_documents().await, 2);
    }

    #[tokio::test]
    async fn age_trigger_flushes_small_queue() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock.clone());

        manager
            .submit(IndexDestination::new("RSS_FEEDS"), docs(1), 0)
            .await;

        // 恰好等于滞留上限时还不触发
        clock.set(1_030);
        manager.evaluate_once().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.flushed().is_empty());

        clock.set(1_031);
        manager.evaluate_once().await;
        wait_until(|| !client.flushed().is_empty()).await;
        assert_eq!(client.flushed()[0].1.len(), 1);
    }

    #[tokio::test]
    async fn arrival_window_restarts_after_flush() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock.clone());
        let destination = IndexDestination::new("RSS_FEEDS");

        manager.submit(destination.clone(), docs(1), 0).await;
        clock.set(1_031);
        manager.evaluate_once().await;
        wait_until(|| client.flushed().len() == 1).await;

        // 新窗口从第二批首条文档重新计时
        clock.set(1_040);
        manager.submit(destination.clone(), docs(1), 0).await;
        clock.set(1_060);
        manager.evaluate_once().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.flushed().len(), 1);

        clock.set(1_071);
        manager.evaluate_once().await;
        wait_until(|| client.flushed().len() == 2).await;
    }

    #[tokio::test]
    async fn priority_bypass_skips_resident_queue() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);
        let destination = IndexDestination::new("RSS_FEEDS");

        manager.submit(destination.clone(), docs(2), 0).await;
        manager
            .submit(destination.clone(), vec![doc("urgent")], 100)
            .await;

        // 未经过评估周期即提交，且驻留队列原样保留
        wait_until(|| !client.flushed().is_empty()).await;
        let flushed = client.flushed();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].1[0].reference, "urgent");
        assert_eq!(manager.pending_documents().await, 2);
    }

    #[tokio::test]
    async fn fingerprints_are_isolated_and_fifo_within_one() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);

        let feeds = IndexDestination::new("RSS_FEEDS");
        let stocks = IndexDestination::new("STOCK_SYMBOLS");
        manager.submit(feeds.clone(), vec![doc("a")], 0).await;
        manager.submit(stocks.clone(), docs(5), 0).await;
        manager.submit(feeds.clone(), vec![doc("b")], 0).await;

        manager.evaluate_once().await;
        wait_until(|| !client.flushed().is_empty()).await;

        // 只有STOCK_SYMBOLS达到阈值
        let flushed = client.flushed();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, stocks);
        assert_eq!(manager.pending_documents().await, 2);

        // RSS_FEEDS窗口内保持到达顺序
        let queues = manager.queues.lock().await;
        let slot = queues.get(&feeds.fingerprint()).unwrap();
        assert_eq!(slot.documents[0].reference, "a");
        assert_eq!(slot.documents[1].reference, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_retries_transient_failure_then_succeeds() {
        let client = Arc::new(RecordingClient::failing(2));
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);

        manager
            .submit(IndexDestination::new("RSS_FEEDS"), docs(5), 0)
            .await;
        manager.evaluate_once().await;

        wait_until(|| !client.flushed().is_empty()).await;
        assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_drops_batch_after_retry_exhaustion() {
        let client = Arc::new(RecordingClient::failing(u32::MAX));
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);

        manager
            .submit(IndexDestination::new("RSS_FEEDS"), docs(5), 0)
            .await;
        manager.evaluate_once().await;

        // 2秒间隔、10秒上限，重试停止后批次被丢弃
        wait_until(|| client.attempts.load(Ordering::SeqCst) >= 2).await;
        tokio::time::sleep(Duration::from_secs(15)).await;
        let attempts = client.attempts.load(Ordering::SeqCst);
        assert!(attempts <= 6, "attempts={attempts}");
        assert!(client.flushed().is_empty());
        // 丢弃的批次不会回灌队列
        assert_eq!(manager.pending_documents().await, 0);
    }

    #[tokio::test]
    async fn drain_flushes_small_resident_queues() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);

        manager
            .submit(IndexDestination::new("RSS_FEEDS"), docs(2), 0)
            .await;
        manager
            .submit(IndexDestination::new("STOCK_SYMBOLS"), docs(1), 0)
            .await;

        manager.drain().await;

        assert_eq!(client.flushed().len(), 2);
        assert_eq!(manager.pending_documents().await, 0);
    }

    #[tokio::test]
    async fn empty_submit_is_ignored() {
        let client = Arc::new(RecordingClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_with(client.clone(), clock);

        manager
            .submit(IndexDestination::new("RSS_FEEDS"), vec![], 100)
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.flushed().is_empty());
        assert_eq!(manager.pending_documents().await, 0);
    }
}
