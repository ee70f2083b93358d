//! 调度核心
//!
//! 单个轮询循环驱动三件事：回收在途任务（完成统计或超时强杀）、
//! 扫描到期任务、经由原子租约把任务放入受限执行池。任务存储是
//! `running`/`next_run_time` 的唯一事实来源，租约冲突的一方放弃
//! 执行，因此任意时刻每个任务至多有一次在途运行。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use indexflow_core::{SchedulerConfig, SchedulerError, SchedulerResult};
use indexflow_domain::{
    blend_average_runtime, Clock, ExecutionContext, RunCompletion, SystemClock, Task,
    TaskExecutor, TaskRepository,
};

use crate::executor_registry::ExecutorRegistry;

/// 超时强制回收时写入任务记录的错误
pub const TIMEOUT_KILL_ERROR: &str = "killed due to timeout";

/// 类型未注册时写入任务记录的错误
pub const UNKNOWN_TYPE_ERROR: &str = "unknown task type";

/// 一次执行的结果，由执行包装协程返回
struct RunOutcome {
    elapsed_seconds: f64,
    result: Result<(), String>,
}

/// 在途运行的登记项
///
/// `interval_seconds` 和 `avg_runtime` 取租约时的快照，回收时
/// 据此计算重新排队字段，不再回读存储。
struct InFlightRun {
    handle: JoinHandle<RunOutcome>,
    cancellation: CancellationToken,
    leased_at: i64,
    task_name: String,
    interval_seconds: i64,
    avg_runtime: f64,
}

/// 调度器构建器
///
/// 所有依赖显式注入；执行器必须在 `build` 之前注册完毕，
/// 注册表在调度器运行期间不可变。
pub struct TaskSchedulerBuilder {
    task_repo: Arc<dyn TaskRepository>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    registry: ExecutorRegistry,
}

impl TaskSchedulerBuilder {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: SchedulerConfig) -> Self {
        Self {
            task_repo,
            config,
            clock: Arc::new(SystemClock),
            registry: ExecutorRegistry::new(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register_executor(
        mut self,
        task_type: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        self.registry.register(task_type, executor);
        self
    }

    pub fn build(self) -> Arc<TaskScheduler> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(TaskScheduler {
            task_repo: self.task_repo,
            registry: Arc::new(self.registry),
            clock: self.clock,
            pool: Arc::new(Semaphore::new(self.config.max_concurrent_tasks)),
            config: self.config,
            in_flight: Mutex::new(HashMap::new()),
            pending_completions: Mutex::new(Vec::new()),
            shutdown_tx,
            loop_handle: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }
}

/// 调度核心
pub struct TaskScheduler {
    task_repo: Arc<dyn TaskRepository>,
    registry: Arc<ExecutorRegistry>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    /// 执行池准入：池满时分发阻塞
    pool: Arc<Semaphore>,
    in_flight: Mutex<HashMap<i64, InFlightRun>>,
    /// 完成回写失败后暂存，下个周期补写，避免任务卡在running状态
    pending_completions: Mutex<Vec<(i64, RunCompletion)>>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl TaskScheduler {
    /// 启动轮询循环，立即返回；重复启动报错
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);
        let handle = tokio::spawn(async move {
            info!(
                "调度器启动 [轮询:{}s, 并发:{}, 超时:{}s, 执行器:{:?}]",
                scheduler.config.poll_interval_seconds,
                scheduler.config.max_concurrent_tasks,
                scheduler.config.task_timeout_seconds,
                scheduler.registry.task_types()
            );
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.run_cycle().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            // 退出前最后回收一轮；仍在执行的任务不被强杀
            scheduler.reconcile_in_flight().await;
            info!("调度循环退出");
        });
        *self.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    /// 通知循环退出并等待其完成收尾回收
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// 一个完整的轮询周期。任何一步失败都只记日志，循环永不终止。
    pub async fn run_cycle(&self) {
        self.reconcile_in_flight().await;
        self.dispatch_due().await;
    }

    /// 当前在途运行数
    pub async fn active_task_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// 回收在途任务：完成的写回统计，超时的强制收回
    async fn reconcile_in_flight(&self) {
        let deferred: Vec<(i64, RunCompletion)> = {
            let mut pending = self.pending_completions.lock().await;
            pending.drain(..).collect()
        };
        for (id, completion) in deferred {
            self.persist_completion(id, completion).await;
        }

        let now = self.clock.epoch_seconds();
        let mut finished = Vec::new();
        let mut timed_out = Vec::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            let ids: Vec<i64> = in_flight.keys().copied().collect();
            for id in ids {
                let Some(run) = in_flight.get(&id) else {
                    continue;
                };
                if run.handle.is_finished() {
                    if let Some(run) = in_flight.remove(&id) {
                        finished.push((id, run));
                    }
                } else if now - run.leased_at > self.config.task_timeout_seconds {
                    if let Some(run) = in_flight.remove(&id) {
                        timed_out.push((id, run));
                    }
                }
            }
        }

        for (id, run) in finished {
            let outcome = match run.handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => RunOutcome {
                    elapsed_seconds: (now - run.leased_at).max(0) as f64,
                    result: Err(format!("执行器异常退出: {join_err}")),
                },
            };
            match &outcome.result {
                Ok(()) => info!(
                    "任务 '{}' 运行完成 [耗时:{:.2}s]",
                    run.task_name, outcome.elapsed_seconds
                ),
                Err(err) => warn!("任务 '{}' 运行失败: {}", run.task_name, err),
            }
            let completed_at = self.clock.epoch_seconds();
            let completion = RunCompletion {
                completed_at,
                next_run_time: completed_at + run.interval_seconds.max(0),
                avg_runtime: blend_average_runtime(run.avg_runtime, outcome.elapsed_seconds),
                error: outcome.result.err(),
                disable: run.interval_seconds <= 0,
            };
            self.persist_completion(id, completion).await;
        }

        for (id, run) in timed_out {
            warn!(
                "任务 '{}' 运行超过 {}s，强制回收",
                run.task_name, self.config.task_timeout_seconds
            );
            run.cancellation.cancel();
            run.handle.abort();
            let completed_at = self.clock.epoch_seconds();
            let completion = RunCompletion {
                completed_at,
                next_run_time: completed_at + run.interval_seconds.max(0),
                // 超时没有有效的运行时长样本，平均值保持不变
                avg_runtime: run.avg_runtime,
                error: Some(TIMEOUT_KILL_ERROR.to_string()),
                disable: run.interval_seconds <= 0,
            };
            self.persist_completion(id, completion).await;
        }
    }

    async fn persist_completion(&self, id: i64, completion: RunCompletion) {
        if let Err(err) = self.task_repo.complete_run(id, &completion).await {
            error!("任务 {} 的完成状态写回失败，下个周期重试: {}", id, err);
            self.pending_completions.lock().await.push((id, completion));
        }
    }

    /// 扫描到期任务并逐个分发
    async fn dispatch_due(&self) {
        let now = self.clock.epoch_seconds();
        let due = match self.task_repo.find_due(now).await {
            Ok(due) => due,
            Err(err) => {
                error!("扫描到期任务失败，等待下个周期: {}", err);
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        debug!("本周期发现 {} 个到期任务", due.len());
        for task in due {
            let task_name = task.name.clone();
            if let Err(err) = self.dispatch(task).await {
                error!("分发任务 '{}' 失败: {}", task_name, err);
            }
        }
    }

    /// 租约并提交单个任务
    ///
    /// 顺序固定：查注册表（未注册则只记错误，不持有租约）→
    /// 原子租约（冲突方放弃）→ 进入执行池（池满阻塞形成背压）。
    async fn dispatch(&self, task: Task) -> SchedulerResult<()> {
        {
            let in_flight = self.in_flight.lock().await;
            if in_flight.contains_key(&task.id) {
                return Ok(());
            }
        }

        let Some(executor) = self.registry.get(&task.task_type) else {
            warn!(
                "任务 '{}' 的类型 '{}' 没有注册执行器，跳过执行",
                task.name, task.task_type
            );
            self.task_repo.record_error(task.id, UNKNOWN_TYPE_ERROR).await?;
            return Ok(());
        };

        let lease_time = self.clock.epoch_seconds();
        if !self.task_repo.try_lease(task.id, lease_time).await? {
            debug!("任务 '{}' 租约冲突，本周期跳过", task.name);
            return Ok(());
        }

        let permit = match Arc::clone(&self.pool).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Ok(()),
        };

        let cancellation = CancellationToken::new();
        let ctx = ExecutionContext {
            cancellation: cancellation.clone(),
            deadline: self.clock.now()
                + chrono::Duration::seconds(self.config.task_timeout_seconds),
        };
        let clock = Arc::clone(&self.clock);
        let run_task = task.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let started = clock.now();
            let result = tokio::select! {
                result = executor.execute(&ctx, &run_task) => {
                    result.map_err(|err| err.to_string())
                }
                _ = ctx.cancellation.cancelled() => Err(TIMEOUT_KILL_ERROR.to_string()),
            };
            let elapsed_seconds =
                ((clock.now() - started).num_milliseconds() as f64 / 1000.0).max(0.0);
            RunOutcome {
                elapsed_seconds,
                result,
            }
        });

        info!(
            "任务 '{}' 已租约并进入执行池 [类型:{}]",
            task.name, task.task_type
        );
        let mut in_flight = self.in_flight.lock().await;
        in_flight.insert(
            task.id,
            InFlightRun {
                handle,
                cancellation,
                leased_at: lease_time,
                task_name: task.name,
                interval_seconds: task.interval_seconds,
                avg_runtime: task.avg_runtime,
            },
        );
        Ok(())
    }
}
