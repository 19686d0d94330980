use std::fmt::Debug;
use std::time::{Duration, Instant};

/// 单次触发的最大补偿次数（调用方长时间没有 pump 时避免一次性触发过多）
const MAX_CATCH_UP: usize = 64;

#[derive(Debug)]
struct Timer<K> {
    key: K,
    deadline: Instant,
    period: Option<Duration>,
}

/// 可取消定时器集合
///
/// 会话里所有的周期/一次性定时器（进度上报、健康检查、倒计时、引擎轮询）
/// 都注册在这里。时间由调用方传入，`clear()` 一次性释放全部定时器，
/// 所以会话销毁时只要清空集合就不会留下任何悬挂的定时器。
///
/// 每个 key 同时最多只有一个定时器。
#[derive(Debug)]
pub struct TimerSet<K> {
    timers: Vec<Timer<K>>,
}

impl<K: Copy + Eq + Debug> TimerSet<K> {
    pub fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// 启动周期定时器，已存在同名定时器时不做任何事并返回 false
    pub fn start_interval(&mut self, key: K, period: Duration, now: Instant) -> bool {
        if self.is_active(key) {
            return false;
        }
        self.timers.push(Timer {
            key,
            deadline: now + period,
            period: Some(period),
        });
        true
    }

    /// 启动一次性定时器，已存在同名定时器时不做任何事并返回 false
    pub fn start_timeout(&mut self, key: K, delay: Duration, now: Instant) -> bool {
        if self.is_active(key) {
            return false;
        }
        self.timers.push(Timer {
            key,
            deadline: now + delay,
            period: None,
        });
        true
    }

    pub fn cancel(&mut self, key: K) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.key != key);
        before != self.timers.len()
    }

    pub fn is_active(&self, key: K) -> bool {
        self.timers.iter().any(|t| t.key == key)
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// 取出到期的定时器
    ///
    /// 周期定时器每错过一个周期返回一次（按到期顺序），一次性定时器触发后移除。
    pub fn fire_due(&mut self, now: Instant) -> Vec<K> {
        let mut fired: Vec<(Instant, K)> = Vec::new();

        self.timers.retain_mut(|timer| {
            let mut count = 0;
            while timer.deadline <= now && count < MAX_CATCH_UP {
                fired.push((timer.deadline, timer.key));
                count += 1;
                match timer.period {
                    Some(period) => timer.deadline += period,
                    None => return false,
                }
            }
            if count == MAX_CATCH_UP {
                // 丢弃剩余的积压周期
                if let Some(period) = timer.period {
                    while timer.deadline <= now {
                        timer.deadline += period;
                    }
                }
            }
            true
        });

        fired.sort_by_key(|(deadline, _)| *deadline);
        fired.into_iter().map(|(_, key)| key).collect()
    }
}

impl<K: Copy + Eq + Debug> Default for TimerSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key {
        A,
        B,
    }

    #[test]
    fn test_interval_fires_each_period() {
        let t0 = Instant::now();
        let mut timers = TimerSet::new();
        assert!(timers.start_interval(Key::A, Duration::from_secs(1), t0));

        assert!(timers.fire_due(t0 + Duration::from_millis(999)).is_empty());
        assert_eq!(timers.fire_due(t0 + Duration::from_secs(1)), vec![Key::A]);
        // 错过 3 个周期
        assert_eq!(timers.fire_due(t0 + Duration::from_secs(4)), vec![Key::A, Key::A, Key::A]);
        assert!(timers.is_active(Key::A));
    }

    #[test]
    fn test_timeout_fires_once() {
        let t0 = Instant::now();
        let mut timers = TimerSet::new();
        timers.start_timeout(Key::B, Duration::from_millis(500), t0);
        assert_eq!(timers.fire_due(t0 + Duration::from_secs(2)), vec![Key::B]);
        assert!(!timers.is_active(Key::B));
        assert!(timers.fire_due(t0 + Duration::from_secs(3)).is_empty());
    }

    #[test]
    fn test_start_is_idempotent_per_key() {
        let t0 = Instant::now();
        let mut timers = TimerSet::new();
        assert!(timers.start_interval(Key::A, Duration::from_secs(1), t0));
        assert!(!timers.start_interval(Key::A, Duration::from_secs(1), t0));
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.fire_due(t0 + Duration::from_secs(1)), vec![Key::A]);
    }

    #[test]
    fn test_cancel_and_clear() {
        let t0 = Instant::now();
        let mut timers = TimerSet::new();
        timers.start_interval(Key::A, Duration::from_secs(1), t0);
        timers.start_timeout(Key::B, Duration::from_secs(1), t0);
        assert!(timers.cancel(Key::A));
        assert!(!timers.cancel(Key::A));
        assert_eq!(timers.fire_due(t0 + Duration::from_secs(5)), vec![Key::B]);

        timers.start_interval(Key::A, Duration::from_secs(1), t0);
        timers.clear();
        assert!(timers.is_empty());
        assert!(timers.fire_due(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_fired_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = TimerSet::new();
        timers.start_interval(Key::A, Duration::from_secs(2), t0);
        timers.start_interval(Key::B, Duration::from_secs(3), t0);
        assert_eq!(timers.fire_due(t0 + Duration::from_secs(4)), vec![Key::A, Key::B, Key::A]);
    }
}
