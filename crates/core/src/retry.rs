//! 有界退避重试工具
//!
//! 所有"至少一次"的网络操作（批量索引提交等）统一复用此工具，
//! 固定间隔重试直到累计等待超过上限。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::SchedulerResult;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 每次重试之间的固定等待
    pub delay: Duration,
    /// 从首次失败起允许的最长总等待
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(delay_ms: u64, max_elapsed_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            max_elapsed: Duration::from_millis(max_elapsed_ms),
        }
    }
}

/// 以固定间隔重试操作，总等待时间受 `policy.max_elapsed` 约束。
///
/// 首次尝试立即执行；失败后每隔 `policy.delay` 重试一次，
/// 若下一次等待会超出上限则返回最后一次的错误。
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> SchedulerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SchedulerResult<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("操作 {} 在第 {} 次尝试后成功", operation, attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                if started.elapsed() + policy.delay > policy.max_elapsed {
                    warn!(
                        "操作 {} 在 {} 次尝试后放弃: {}",
                        operation, attempt, err
                    );
                    return Err(err);
                }
                debug!(
                    "操作 {} 第 {} 次尝试失败: {}，{}ms 后重试",
                    operation,
                    attempt,
                    err,
                    policy.delay.as_millis()
                );
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
