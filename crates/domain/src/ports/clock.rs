use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// 时间源
///
/// 调度判定和批量滞留判定都经由此接口取时间，保证可注入测试时钟。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 当前epoch秒，持久化的时间戳统一使用该精度
    fn epoch_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的测试时钟
#[derive(Debug, Default)]
pub struct ManualClock {
    epoch_seconds: AtomicI64,
}

impl ManualClock {
    pub fn new(epoch_seconds: i64) -> Self {
        Self {
            epoch_seconds: AtomicI64::new(epoch_seconds),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.epoch_seconds.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, epoch_seconds: i64) {
        self.epoch_seconds.store(epoch_seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.epoch_seconds.load(Ordering::SeqCst), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
