//! 登录限流
//!
//! 按客户端键（通常是 IP）的滑动窗口计数。检查与占位是同一个原子操作，
//! 并发请求不会同时越过阈值。窗口清空的键会被移除，
//! 每 `SWEEP_INTERVAL` 次尝试再整体清理一遍过期的键。

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use dashmap::DashMap;

const SWEEP_INTERVAL: u64 = 256;

#[derive(Debug)]
pub struct LoginThrottle {
    max_attempts: usize,
    decay: Duration,
    attempts: DashMap<String, VecDeque<Instant>>,
    calls: AtomicU64,
}

impl LoginThrottle {
    pub fn new(max_attempts: u32, decay_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1) as usize,
            decay: Duration::from_secs(decay_secs),
            attempts: DashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    /// 占用一次尝试名额；超限时返回距最早一次尝试过期的秒数
    pub fn attempt(&self, key: &str) -> Result<(), u64> {
        self.attempt_at(key, Instant::now())
    }

    fn attempt_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.purge_expired_at(now);
        }

        let mut window = self.attempts.entry(key.to_string()).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.decay)
        {
            window.pop_front();
        }

        if window.len() >= self.max_attempts {
            let retry_after = window
                .front()
                .map(|t| self.decay.saturating_sub(now.duration_since(*t)))
                .unwrap_or(self.decay);
            // 向上取整，至少 1 秒
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return Err(secs.max(1));
        }

        window.push_back(now);
        Ok(())
    }

    /// 归还最近一次占位（非凭据错误的失败不计入）
    pub fn release(&self, key: &str) {
        if let Some(mut window) = self.attempts.get_mut(key) {
            window.pop_back();
        }
        self.attempts.remove_if(key, |_, window| window.is_empty());
    }

    /// 登录成功后清空
    pub fn clear(&self, key: &str) {
        self.attempts.remove(key);
    }

    /// 移除窗口已全部过期的键
    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    fn purge_expired_at(&self, now: Instant) {
        self.attempts.retain(|_, window| {
            window
                .back()
                .is_some_and(|t| now.duration_since(*t) < self.decay)
        });
    }

    /// 当前跟踪的键数
    pub fn tracked_keys(&self) -> usize {
        self.attempts.len()
    }

    pub fn remaining(&self, key: &str) -> usize {
        let now = Instant::now();
        let used = self
            .attempts
            .get(key)
            .map(|w| w.iter().filter(|t| now.duration_since(**t) < self.decay).count())
            .unwrap_or(0);
        self.max_attempts.saturating_sub(used)
    }
}
