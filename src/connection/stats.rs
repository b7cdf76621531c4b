use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::utils::{current_millis, millis_to_datetime};

/// 会话运行统计，进程重启后丢失
#[derive(Debug)]
pub struct SessionStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    last_activity_ms: AtomicI64,
    started_at: DateTime<Utc>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(current_millis()),
            started_at: Utc::now(),
        }
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// 在协议客户端的投递线程上调用，只做原子操作
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .fetch_max(current_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Utc::now();
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_activity: millis_to_datetime(self.last_activity_ms.load(Ordering::Relaxed)),
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_concurrent_receive_counting() {
        let stats = Arc::new(SessionStats::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        stats.record_received();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        stats.record_sent();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, 4_000);
        assert_eq!(snapshot.messages_sent, 1);
        assert!(snapshot.last_activity.is_some());
    }
}
